//! Field Type IR: a tagged-variant type tree living in
//! an arena of small integer handles. Structure members, array/sequence elements and variant options all
//! hold `FieldTypeId`s rather than owning pointers, so mutually-referential
//! graphs never need `Rc`/`Weak`.

use crate::error::Error;
use crate::path::FieldPath;
use derive_more::Display;
use internment::Intern;

/// Arena handle for a field type. Stable for the lifetime of the `TypeArena`
/// that produced it.
pub type FieldTypeId = usize;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Display)]
pub enum ByteOrder {
    #[display("be")]
    BigEndian,
    #[display("le")]
    LittleEndian,
    /// Always big-endian on the wire; kept distinct from `BigEndian` only so
    /// error messages can echo back the metadata's own spelling.
    #[display("network")]
    Network,
    /// Resolved away at visiting time (trace byte order is substituted in);
    /// never reaches a constructed `IntegerFieldType`/`FloatFieldType`.
    #[display("native")]
    Native,
}

impl ByteOrder {
    pub fn is_big_endian(self) -> bool {
        matches!(self, ByteOrder::BigEndian | ByteOrder::Network)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Display, Default)]
pub enum DisplayBase {
    #[display("bin")]
    Binary,
    #[display("oct")]
    Octal,
    #[default]
    #[display("dec")]
    Decimal,
    #[display("hex")]
    Hexadecimal,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Default)]
pub enum StringEncoding {
    #[default]
    None,
    Ascii,
    Utf8,
}

impl StringEncoding {
    pub fn is_text(self) -> bool {
        matches!(self, StringEncoding::Ascii | StringEncoding::Utf8)
    }
}

/// What a well-known integer field means to the notification iterator.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Default)]
pub enum Meaning {
    #[default]
    None,
    EventClassId,
    StreamClassId,
    DataStreamId,
    Magic,
    PacketTotalSize,
    PacketContentSize,
    PacketBeginTime,
    PacketEndTime,
    PacketCounter,
    DiscardedEventCounter,
}

#[derive(Clone, Debug)]
pub struct IntegerFieldType {
    /// 1..=64
    pub size_bits: u8,
    pub signed: bool,
    pub byte_order: ByteOrder,
    pub display_base: DisplayBase,
    pub encoding: StringEncoding,
    /// Positive power of two.
    pub alignment: u32,
    pub mapped_clock: Option<Intern<String>>,
    pub meaning: Meaning,
    /// Assigned by the visitor's sequence/variant resolution pass (4.D) the
    /// first time this integer is referenced as a length or tag target.
    pub stored_value_index: Option<usize>,
}

impl IntegerFieldType {
    pub fn default_alignment(size_bits: u8) -> u32 {
        if size_bits % 8 == 0 {
            8
        } else {
            1
        }
    }
}

#[derive(Clone, Debug)]
pub struct FloatFieldType {
    pub exp_bits: u8,
    pub mant_bits: u8,
    pub byte_order: ByteOrder,
    pub alignment: u32,
}

impl FloatFieldType {
    pub fn size_bits(&self) -> u16 {
        1 + self.exp_bits as u16 + self.mant_bits as u16
    }
}

/// One `(label, [lo, hi])` mapping of an enumeration. Ranges may overlap;
/// consumers take the first match in declaration order.
#[derive(Clone, Debug)]
pub struct EnumerationRange {
    pub label: Intern<String>,
    pub lo: i64,
    pub hi: i64,
}

#[derive(Clone, Debug)]
pub struct EnumerationFieldType {
    pub container: IntegerFieldType,
    pub ranges: Vec<EnumerationRange>,
}

impl EnumerationFieldType {
    /// First range containing `value`, in declaration order.
    pub fn label_for(&self, value: i64) -> Option<Intern<String>> {
        self.ranges
            .iter()
            .find(|r| value >= r.lo && value <= r.hi)
            .map(|r| r.label)
    }

    pub fn range_for_label(&self, label: Intern<String>) -> Option<&EnumerationRange> {
        self.ranges.iter().find(|r| r.label == label)
    }
}

#[derive(Clone, Debug)]
pub struct StringFieldType {
    pub encoding: StringEncoding,
}

#[derive(Clone, Debug)]
pub struct StructureFieldType {
    pub members: Vec<(Intern<String>, FieldTypeId)>,
    pub alignment: u32,
}

impl StructureFieldType {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|(n, _)| n.as_str() == name)
    }
}

#[derive(Clone, Debug)]
pub struct ArrayFieldType {
    pub element: FieldTypeId,
    pub length: usize,
}

#[derive(Clone, Debug)]
pub enum LengthRef {
    Unresolved(String),
    Resolved(FieldPath),
}

#[derive(Clone, Debug)]
pub struct SequenceFieldType {
    pub element: FieldTypeId,
    pub length: LengthRef,
}

#[derive(Clone, Debug)]
pub enum TagRef {
    Unresolved(String),
    /// Resolved path to the tag field, plus the tag's (enumeration) field type.
    Resolved {
        path: FieldPath,
        tag_type: FieldTypeId,
    },
}

#[derive(Clone, Debug)]
pub struct VariantFieldType {
    pub tag: TagRef,
    pub options: Vec<(Intern<String>, FieldTypeId)>,
}

impl VariantFieldType {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.options.iter().position(|(n, _)| n.as_str() == name)
    }

    pub fn option_for_label(&self, label: Intern<String>) -> Option<FieldTypeId> {
        self.options
            .iter()
            .find(|(n, _)| *n == label)
            .map(|(_, ty)| *ty)
    }
}

#[derive(Clone, Debug)]
pub enum FieldTypeKind {
    Integer(IntegerFieldType),
    Float(FloatFieldType),
    Enumeration(EnumerationFieldType),
    String(StringFieldType),
    Structure(StructureFieldType),
    Array(ArrayFieldType),
    Sequence(SequenceFieldType),
    Variant(VariantFieldType),
}

impl FieldTypeKind {
    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, FieldTypeKind::Integer(i) if !i.signed)
    }

    pub fn is_enumeration(&self) -> bool {
        matches!(self, FieldTypeKind::Enumeration(_))
    }

    /// True for an array/sequence whose element is an 8-bit integer with a
    /// text encoding — the BTR's "character array/sequence" case (4.E).
    pub fn is_text_compound(&self, arena: &TypeArena) -> bool {
        let elem = match self {
            FieldTypeKind::Array(a) => a.element,
            FieldTypeKind::Sequence(s) => s.element,
            _ => return false,
        };
        matches!(
            arena.kind(elem),
            FieldTypeKind::Integer(i) if i.size_bits == 8 && i.encoding.is_text()
        )
    }

    /// Number of direct children this field type has, if it's a compound.
    pub fn element_count(&self) -> usize {
        match self {
            FieldTypeKind::Structure(s) => s.members.len(),
            FieldTypeKind::Array(a) => a.length,
            FieldTypeKind::Sequence(_) => 1,
            FieldTypeKind::Variant(_) => 1,
            _ => 0,
        }
    }

    /// Looks up a member's index by name (structure/variant only).
    pub fn field_index_by_name(&self, name: &str) -> Option<usize> {
        match self {
            FieldTypeKind::Structure(s) => s.index_of(name),
            FieldTypeKind::Variant(v) => v.index_of(name),
            _ => None,
        }
    }

    /// Bit width of a scalar field type, if it has a fixed one.
    pub fn basic_size_bits(&self) -> Option<u16> {
        match self {
            FieldTypeKind::Integer(i) => Some(i.size_bits as u16),
            FieldTypeKind::Float(f) => Some(f.size_bits()),
            FieldTypeKind::Enumeration(e) => Some(e.container.size_bits as u16),
            FieldTypeKind::String(_) => Some(8),
            _ => None,
        }
    }

    pub fn alignment(&self) -> u32 {
        match self {
            FieldTypeKind::Integer(i) => i.alignment,
            FieldTypeKind::Float(f) => f.alignment,
            FieldTypeKind::Enumeration(e) => e.container.alignment,
            FieldTypeKind::String(_) => 8,
            FieldTypeKind::Structure(s) => s.alignment,
            FieldTypeKind::Array(_) | FieldTypeKind::Sequence(_) | FieldTypeKind::Variant(_) => 1,
        }
    }
}

#[derive(Debug)]
struct TypeEntry {
    kind: FieldTypeKind,
    frozen: bool,
}

/// The arena backing every `FieldTypeId` in a trace.
#[derive(Default, Debug)]
pub struct TypeArena {
    entries: Vec<TypeEntry>,
}

impl TypeArena {
    pub fn new() -> Self {
        TypeArena { entries: Vec::new() }
    }

    pub fn insert(&mut self, kind: FieldTypeKind) -> FieldTypeId {
        self.entries.push(TypeEntry {
            kind,
            frozen: false,
        });
        self.entries.len() - 1
    }

    pub fn kind(&self, id: FieldTypeId) -> &FieldTypeKind {
        &self.entries[id].kind
    }

    pub fn is_frozen(&self, id: FieldTypeId) -> bool {
        self.entries[id].frozen
    }

    /// Marks `id` (and transitively reachable ids) frozen. Called once a
    /// structure is attached to a stream class or event class.
    pub fn freeze(&mut self, id: FieldTypeId) {
        self.entries[id].frozen = true;
    }

    pub fn field_at_index(&self, id: FieldTypeId, index: usize) -> Option<FieldTypeId> {
        match self.kind(id) {
            FieldTypeKind::Structure(s) => s.members.get(index).map(|(_, t)| *t),
            FieldTypeKind::Array(a) => Some(a.element),
            FieldTypeKind::Sequence(s) => Some(s.element),
            // Variant: "currently selected" has no meaning at the type level;
            // resolved at the Field IR layer instead.
            FieldTypeKind::Variant(_) => None,
            _ => None,
        }
    }

    /// Attaches a resolved length path to a sequence. Errors if the type is
    /// frozen or not a sequence.
    pub fn set_sequence_path(&mut self, id: FieldTypeId, path: FieldPath) -> Result<(), Error> {
        if self.is_frozen(id) {
            return Err(Error::DuplicateDeclaration(
                "sequence length resolved after freeze".into(),
            ));
        }
        match &mut self.entries[id].kind {
            FieldTypeKind::Sequence(s) => {
                s.length = LengthRef::Resolved(path);
                Ok(())
            }
            _ => Err(Error::UnknownTypeReference("not a sequence".into())),
        }
    }

    /// Attaches a resolved tag path and tag type to a variant.
    pub fn set_variant_tag(
        &mut self,
        id: FieldTypeId,
        path: FieldPath,
        tag_type: FieldTypeId,
    ) -> Result<(), Error> {
        if self.is_frozen(id) {
            return Err(Error::DuplicateDeclaration(
                "variant tag resolved after freeze".into(),
            ));
        }
        match &mut self.entries[id].kind {
            FieldTypeKind::Variant(v) => {
                v.tag = TagRef::Resolved { path, tag_type };
                Ok(())
            }
            _ => Err(Error::UnknownTypeReference("not a variant".into())),
        }
    }

    /// Assigns (or returns the existing) stored-value slot for an integer or
    /// enumeration field type. Sequence
    /// lengths always target a plain integer; variant tags always target an
    /// enumeration, whose container integer is embedded rather than its own
    /// arena entry, so both cases are handled here.
    pub fn assign_stored_value_index(
        &mut self,
        id: FieldTypeId,
        next: &mut usize,
    ) -> Result<usize, Error> {
        let slot = match &mut self.entries[id].kind {
            FieldTypeKind::Integer(i) => &mut i.stored_value_index,
            FieldTypeKind::Enumeration(e) => &mut e.container.stored_value_index,
            _ => return Err(Error::UnknownTypeReference("not an integer or enumeration".into())),
        };
        if let Some(existing) = *slot {
            Ok(existing)
        } else {
            let idx = *next;
            *next += 1;
            *slot = Some(idx);
            Ok(idx)
        }
    }

    /// Sets the well-known meaning of a top-level packet-header/context/
    /// event-header integer member.
    pub fn set_meaning(&mut self, id: FieldTypeId, meaning: crate::ir::field_type::Meaning) -> Result<(), Error> {
        match &mut self.entries[id].kind {
            FieldTypeKind::Integer(i) => {
                i.meaning = meaning;
                Ok(())
            }
            _ => Err(Error::UnknownTypeReference("meaning applies only to integer fields".into())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
