//! Metadata Visitor: lowers a [`crate::ast`] tree into
//! the Field Type IR and the Trace IR, driving the Field-Path Resolver
//! for every sequence length and variant tag it finds.

use crate::ast::{
    self, ArraySuffix, EnumSpec, EnumValue, EventBlock, StructEntry, StructSpec, Typealias,
    Typedef, TypeDeclarator, TypeSpecifier, TypeSpecifierList, VariantSpec,
};
use crate::error::Error;
use crate::ir::field_type::{
    ArrayFieldType, ByteOrder, DisplayBase, EnumerationFieldType, EnumerationRange, FieldTypeId,
    FieldTypeKind, FloatFieldType, IntegerFieldType, LengthRef, Meaning, SequenceFieldType,
    StringEncoding, StringFieldType, StructureFieldType, TagRef, TypeArena, VariantFieldType,
};
use crate::ir::trace::{ClockType, EnvValue, EventClass, StreamClass, Trace};
use crate::path::{PathIndex, Scope};
use crate::resolver::{resolve_path, ResolutionContext, ScopeRoots, StackFrame};
use fxhash::FxHashMap;
use internment::Intern;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Turns a fully-formed [`ast::Root`] into a [`Trace`]. This is the entry
/// point a TSDL-source parser's caller should reach for once it has a tree
/// to hand over.
pub fn build_trace(root: &ast::Root) -> Result<Trace, Error> {
    let mut v = Visitor::new();
    v.visit(root)
}

struct Visitor {
    arena: TypeArena,
    scopes: Vec<FxHashMap<String, FieldTypeId>>,
    trace_byte_order: Option<ByteOrder>,
    next_stored_value: usize,
}

impl Visitor {
    fn new() -> Self {
        Visitor {
            arena: TypeArena::new(),
            scopes: vec![FxHashMap::default()],
            trace_byte_order: None,
            next_stored_value: 0,
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn register(&mut self, prefix: char, name: &str, ty: FieldTypeId) -> Result<(), Error> {
        let key = format!("{prefix}#{name}");
        let scope = self.scopes.last_mut().expect("root scope is always open");
        if scope.contains_key(&key) {
            return Err(Error::DuplicateDeclaration(key));
        }
        scope.insert(key, ty);
        Ok(())
    }

    fn lookup(&self, prefix: char, name: &str) -> Option<FieldTypeId> {
        let key = format!("{prefix}#{name}");
        self.scopes.iter().rev().find_map(|s| s.get(&key).copied())
    }

    // ---- top-level visit order ----

    fn visit(&mut self, root: &ast::Root) -> Result<Trace, Error> {
        if root.traces.len() > 1 {
            return Err(Error::MultipleTraceBlocks);
        }
        let trace_block = root.traces.first().ok_or(Error::MissingAttribute("trace"))?;

        // Step 1: trace.byte_order, needed before any integer/float is lowered.
        let byte_order = match trace_block.byte_order {
            Some(ast::ByteOrderSpec::Be) => ByteOrder::BigEndian,
            Some(ast::ByteOrderSpec::Le) => ByteOrder::LittleEndian,
            Some(ast::ByteOrderSpec::Native) => return Err(Error::NativeByteOrderAtTrace),
            None => return Err(Error::MissingAttribute("byte_order")),
        };
        self.trace_byte_order = Some(byte_order);

        // Step 2: clocks. This core only carries a single default clock
        // forward; more than one is rejected outright rather than guessed at.
        if root.clocks.len() > 1 {
            return Err(Error::not_implemented("more than one clock declaration"));
        }
        let clock = root.clocks.first().map(|c| self.lower_clock(c)).transpose()?;

        // Step 3: root-level typedef/typealias/naked declarations, in order.
        for decl in &root.top_level_decls {
            self.visit_top_level_decl(decl)?;
        }

        // Step 4: env blocks.
        let mut env: FxHashMap<String, EnvValue> = FxHashMap::default();
        for block in &root.envs {
            for (key, value) in &block.entries {
                let v = match value {
                    ast::UnaryExpr::Str(s) => EnvValue::String(s.clone()),
                    ast::UnaryExpr::UInt(n) => EnvValue::Integer(*n as i64),
                    ast::UnaryExpr::SInt(n) => EnvValue::Integer(*n),
                    _ => return Err(Error::not_implemented("non-scalar env value")),
                };
                env.insert(key.clone(), v);
            }
        }

        // Step 5: the trace block's own attributes plus optional packet header.
        let major = trace_block.major.ok_or(Error::MissingAttribute("major"))?;
        let minor = trace_block.minor.ok_or(Error::MissingAttribute("minor"))?;
        let uuid = trace_block
            .uuid
            .as_ref()
            .map(|s| Uuid::parse_str(s).map_err(|_| Error::UnknownTypeReference(format!("malformed trace uuid '{s}'"))))
            .transpose()?;
        let packet_header = trace_block
            .packet_header
            .as_ref()
            .map(|decl| self.lower_field_decl(decl))
            .transpose()?;
        if let Some(ty) = packet_header {
            self.require_structure(ty, "trace.packet.header")?;
            self.assign_well_known_meanings(
                ty,
                &[
                    ("magic", Meaning::Magic),
                    ("stream_id", Meaning::StreamClassId),
                    ("stream_instance_id", Meaning::DataStreamId),
                ],
            )?;
            let roots = ScopeRoots {
                packet_header: Some(ty),
                ..Default::default()
            };
            self.resolve_refs_in_subtree(Scope::PacketHeader, ty, &[], &roots)?;
            self.arena.freeze(ty);
        }

        // Step 6: streams, then events.
        let mut stream_classes: FxHashMap<u64, StreamClass> = FxHashMap::default();
        for (i, stream) in root.streams.iter().enumerate() {
            let id = stream.id.unwrap_or(i as u64);
            let mut roots = ScopeRoots {
                packet_header,
                ..Default::default()
            };

            let packet_context = stream
                .packet_context
                .as_ref()
                .map(|decl| self.lower_field_decl(decl))
                .transpose()?;
            if let Some(ty) = packet_context {
                self.require_structure(ty, "stream.packet.context")?;
                self.assign_well_known_meanings(
                    ty,
                    &[
                        ("packet_size", Meaning::PacketTotalSize),
                        ("content_size", Meaning::PacketContentSize),
                        ("timestamp_begin", Meaning::PacketBeginTime),
                        ("timestamp_end", Meaning::PacketEndTime),
                        ("events_discarded", Meaning::DiscardedEventCounter),
                        ("packet_seq_num", Meaning::PacketCounter),
                    ],
                )?;
                roots.packet_context = Some(ty);
                self.resolve_refs_in_subtree(Scope::PacketContext, ty, &[], &roots)?;
                self.arena.freeze(ty);
            }

            let event_header = stream
                .event_header
                .as_ref()
                .map(|decl| self.lower_field_decl(decl))
                .transpose()?;
            if let Some(ty) = event_header {
                self.require_structure(ty, "stream.event.header")?;
                self.assign_well_known_meanings(ty, &[("id", Meaning::EventClassId)])?;
                roots.event_header = Some(ty);
                self.resolve_refs_in_subtree(Scope::EventHeader, ty, &[], &roots)?;
                self.arena.freeze(ty);
            }

            let event_context = stream
                .event_context
                .as_ref()
                .map(|decl| self.lower_field_decl(decl))
                .transpose()?;
            if let Some(ty) = event_context {
                self.require_structure(ty, "stream.event.context")?;
                roots.stream_event_context = Some(ty);
                self.resolve_refs_in_subtree(Scope::StreamEventContext, ty, &[], &roots)?;
                self.arena.freeze(ty);
            }

            debug!(stream_id = id, "visited stream block");
            stream_classes.insert(
                id,
                StreamClass {
                    id,
                    packet_context,
                    event_header,
                    event_context,
                    event_classes: FxHashMap::default(),
                },
            );
        }

        // Single-stream metadata commonly omits an explicit `stream {}`
        // block entirely; synthesize an empty one so events still have
        // somewhere to attach.
        if stream_classes.is_empty() {
            stream_classes.insert(
                0,
                StreamClass {
                    id: 0,
                    packet_context: None,
                    event_header: None,
                    event_context: None,
                    event_classes: FxHashMap::default(),
                },
            );
        }

        let single_stream_id = if stream_classes.len() == 1 {
            stream_classes.keys().next().copied()
        } else {
            None
        };

        for (i, event) in root.events.iter().enumerate() {
            self.visit_event_block(event, i as u64, single_stream_id, packet_header, &mut stream_classes)?;
        }

        Ok(Trace {
            type_arena: std::mem::take(&mut self.arena),
            byte_order,
            major,
            minor,
            uuid,
            packet_header,
            clock,
            env,
            stream_classes,
            num_stored_values: self.next_stored_value,
        })
    }

    fn visit_event_block(
        &mut self,
        event: &EventBlock,
        fallback_id: u64,
        single_stream_id: Option<u64>,
        packet_header: Option<FieldTypeId>,
        stream_classes: &mut FxHashMap<u64, StreamClass>,
    ) -> Result<(), Error> {
        let stream_id = event
            .stream_id
            .or(single_stream_id)
            .ok_or(Error::MissingAttribute("stream_id"))?;
        let (packet_context, event_header, stream_event_context) = {
            let sc = stream_classes
                .get(&stream_id)
                .ok_or(Error::UnknownStreamClassId(stream_id))?;
            (sc.packet_context, sc.event_header, sc.event_context)
        };

        let event_id = event.id.unwrap_or(fallback_id);
        let name = event
            .name
            .clone()
            .ok_or(Error::MissingAttribute("event.name"))?;

        let mut roots = ScopeRoots {
            packet_header,
            packet_context,
            event_header,
            stream_event_context,
            ..Default::default()
        };

        let context = event
            .context
            .as_ref()
            .map(|decl| self.lower_field_decl(decl))
            .transpose()?;
        if let Some(ty) = context {
            self.require_structure(ty, "event.context")?;
            roots.event_context = Some(ty);
            self.resolve_refs_in_subtree(Scope::EventContext, ty, &[], &roots)?;
            self.arena.freeze(ty);
        }

        let payload = match &event.fields {
            Some(decl) => {
                let ty = self.lower_field_decl(decl)?;
                self.require_structure(ty, "event.fields")?;
                roots.event_payload = Some(ty);
                self.resolve_refs_in_subtree(Scope::EventPayload, ty, &[], &roots)?;
                self.arena.freeze(ty);
                ty
            }
            None => self.arena.insert(FieldTypeKind::Structure(StructureFieldType {
                members: Vec::new(),
                alignment: 8,
            })),
        };

        trace!(stream_id, event_id, %name, "visited event block");
        let sc = stream_classes.get_mut(&stream_id).expect("checked above");
        if sc.event_classes.insert(
            event_id,
            EventClass {
                id: event_id,
                name: Intern::new(name),
                context,
                payload,
            },
        ).is_some()
        {
            return Err(Error::DuplicateDeclaration(format!(
                "event id {event_id} in stream class {stream_id}"
            )));
        }
        Ok(())
    }

    fn visit_top_level_decl(&mut self, decl: &ast::TopLevelDecl) -> Result<(), Error> {
        match decl {
            ast::TopLevelDecl::Typedef(td) => self.visit_typedef(td),
            ast::TopLevelDecl::Typealias(ta) => self.visit_typealias(ta),
            ast::TopLevelDecl::Naked(tsl) => self.lower_type_specifier_list(tsl).map(|_| ()),
        }
    }

    fn visit_typedef(&mut self, td: &Typedef) -> Result<(), Error> {
        let name = td
            .declarator
            .identifier
            .clone()
            .ok_or(Error::MissingAttribute("typedef identifier"))?;
        let ty = self.lower_declared_type(&td.type_specifier_list, &td.declarator)?;
        self.register('a', &name, ty)?;
        if td.declarator.pointer_depth > 0 {
            let key = pointer_key(&td.type_specifier_list, td.declarator.pointer_depth);
            self.register('a', &key, ty)?;
        }
        Ok(())
    }

    fn visit_typealias(&mut self, ta: &Typealias) -> Result<(), Error> {
        let ty = self.lower_declared_type(&ta.target_specifier_list, &ta.target_declarator)?;
        let name = ta
            .alias_declarator
            .identifier
            .clone()
            .ok_or(Error::MissingAttribute("typealias alias identifier"))?;
        self.register('a', &name, ty)?;
        if ta.alias_declarator.pointer_depth > 0 {
            let key = pointer_key(&ta.target_specifier_list, ta.alias_declarator.pointer_depth);
            self.register('a', &key, ty)?;
        }
        Ok(())
    }

    fn lower_clock(&mut self, c: &ast::ClockBlock) -> Result<ClockType, Error> {
        Ok(ClockType {
            name: Intern::new(c.name.clone()),
            frequency: c.freq.unwrap_or(1_000_000_000),
            uuid: c
                .uuid
                .as_ref()
                .map(|s| Uuid::parse_str(s).map_err(|_| Error::UnknownTypeReference(format!("malformed clock uuid '{s}'"))))
                .transpose()?,
            offset_seconds: c.offset_s.unwrap_or(0),
            offset_cycles: c.offset_cycles.unwrap_or(0),
            precision: c.precision.unwrap_or(0),
            origin_is_unix_epoch: c.absolute.unwrap_or(false),
            description: c.description.clone(),
        })
    }

    // ---- type-specifier-list / declarator lowering ----

    fn lower_declared_type(
        &mut self,
        tsl: &TypeSpecifierList,
        declarator: &TypeDeclarator,
    ) -> Result<FieldTypeId, Error> {
        let mut ty = if declarator.pointer_depth > 0 {
            self.resolve_pointer(tsl, declarator.pointer_depth)?
        } else {
            self.lower_type_specifier_list(tsl)?
        };
        for suffix in declarator.array_suffixes.iter().rev() {
            ty = match suffix {
                ArraySuffix::Fixed(n) => self.arena.insert(FieldTypeKind::Array(ArrayFieldType {
                    element: ty,
                    length: *n as usize,
                })),
                ArraySuffix::Sequence(name) => {
                    self.arena.insert(FieldTypeKind::Sequence(SequenceFieldType {
                        element: ty,
                        length: LengthRef::Unresolved(name.clone()),
                    }))
                }
            };
        }
        Ok(ty)
    }

    fn lower_field_decl(&mut self, decl: &ast::FieldDecl) -> Result<FieldTypeId, Error> {
        self.lower_declared_type(&decl.type_specifier_list, &decl.declarator)
    }

    fn lower_type_specifier_list(&mut self, tsl: &TypeSpecifierList) -> Result<FieldTypeId, Error> {
        let spec = tsl
            .0
            .first()
            .ok_or_else(|| Error::UnknownTypeReference("empty type-specifier-list".into()))?;
        match spec {
            TypeSpecifier::Integer(exprs) => self.lower_integer(exprs),
            TypeSpecifier::FloatingPoint(exprs) => self.lower_float(exprs),
            TypeSpecifier::String(exprs) => self.lower_string(exprs),
            TypeSpecifier::Struct(s) => self.lower_struct(s),
            TypeSpecifier::Variant(v) => self.lower_variant(v),
            TypeSpecifier::Enum(e) => self.lower_enum(e),
            TypeSpecifier::Named(name) => self
                .lookup('a', name)
                .ok_or_else(|| Error::UnknownTypeReference(name.clone())),
        }
    }

    fn resolve_pointer(&mut self, tsl: &TypeSpecifierList, depth: usize) -> Result<FieldTypeId, Error> {
        let key = pointer_key(tsl, depth);
        let found = self
            .lookup('a', &key)
            .ok_or_else(|| Error::not_implemented("pointer declarator not previously registered as an alias"))?;
        match self.arena.kind(found).clone() {
            FieldTypeKind::Integer(mut i) => {
                i.display_base = DisplayBase::Hexadecimal;
                Ok(self.arena.insert(FieldTypeKind::Integer(i)))
            }
            _ => Err(Error::not_implemented("pointer declarator aliasing a non-integer type")),
        }
    }

    fn lower_integer(&mut self, exprs: &[ast::CtfExpression]) -> Result<FieldTypeId, Error> {
        let size = expr_value(exprs, "size")?
            .and_then(|v| v.as_uint())
            .ok_or(Error::MissingAttribute("size"))?;
        if size == 0 || size > 64 {
            return Err(Error::IntegerSizeOutOfRange(size as usize));
        }
        let signed = expr_value(exprs, "signed")?
            .and_then(|v| v.as_uint())
            .map(|v| v != 0)
            .unwrap_or(false);
        let byte_order = self.resolve_byte_order(expr_value(exprs, "byte_order")?)?;
        let display_base = parse_display_base(expr_value(exprs, "base")?)?;
        let encoding = parse_encoding(expr_value(exprs, "encoding")?)?;
        let alignment = match expr_value(exprs, "align")? {
            Some(v) => {
                let a = v.as_uint().ok_or(Error::MissingAttribute("align"))? as u32;
                if !a.is_power_of_two() {
                    return Err(Error::InvalidAlignment(a));
                }
                a
            }
            None => IntegerFieldType::default_alignment(size as u8),
        };
        let mapped_clock = expr_value(exprs, "map")?
            .and_then(parse_clock_map)
            .map(Intern::new);
        Ok(self.arena.insert(FieldTypeKind::Integer(IntegerFieldType {
            size_bits: size as u8,
            signed,
            byte_order,
            display_base,
            encoding,
            alignment,
            mapped_clock,
            meaning: Meaning::default(),
            stored_value_index: None,
        })))
    }

    fn lower_float(&mut self, exprs: &[ast::CtfExpression]) -> Result<FieldTypeId, Error> {
        let exp_bits = expr_value(exprs, "exp_dig")?
            .and_then(|v| v.as_uint())
            .ok_or(Error::MissingAttribute("exp_dig"))? as u8;
        let mant_bits = expr_value(exprs, "mant_dig")?
            .and_then(|v| v.as_uint())
            .ok_or(Error::MissingAttribute("mant_dig"))? as u8;
        let byte_order = self.resolve_byte_order(expr_value(exprs, "byte_order")?)?;
        let alignment = match expr_value(exprs, "align")? {
            Some(v) => v.as_uint().ok_or(Error::MissingAttribute("align"))? as u32,
            None => 8,
        };
        Ok(self.arena.insert(FieldTypeKind::Float(FloatFieldType {
            exp_bits,
            mant_bits,
            byte_order,
            alignment,
        })))
    }

    fn lower_string(&mut self, exprs: &[ast::CtfExpression]) -> Result<FieldTypeId, Error> {
        let encoding = match expr_value(exprs, "encoding")? {
            Some(v) => parse_encoding_value(v.as_ident())?,
            None => StringEncoding::Utf8,
        };
        Ok(self.arena.insert(FieldTypeKind::String(StringFieldType { encoding })))
    }

    fn resolve_byte_order(&self, expr: Option<&ast::UnaryExpr>) -> Result<ByteOrder, Error> {
        match expr.and_then(|v| v.as_ident()) {
            Some("be") => Ok(ByteOrder::BigEndian),
            Some("network") => Ok(ByteOrder::Network),
            Some("le") => Ok(ByteOrder::LittleEndian),
            Some("native") | None => self
                .trace_byte_order
                .ok_or(Error::MissingAttribute("byte_order")),
            Some(_) => Err(Error::MissingAttribute("byte_order")),
        }
    }

    // ---- compound declarations ----

    fn lower_struct(&mut self, s: &StructSpec) -> Result<FieldTypeId, Error> {
        if !s.has_body {
            let name = s.name.as_ref().ok_or_else(|| {
                Error::UnknownTypeReference("bodyless struct reference missing a name".into())
            })?;
            return self
                .lookup('s', name)
                .ok_or_else(|| Error::UnknownTypeReference(format!("struct {name} not declared")));
        }
        self.push_scope();
        let mut members = Vec::new();
        for entry in &s.entries {
            self.visit_struct_entry(entry, &mut members)?;
        }
        self.pop_scope();
        let id = self.arena.insert(FieldTypeKind::Structure(StructureFieldType {
            members,
            alignment: s.min_align.unwrap_or(8),
        }));
        if let Some(name) = &s.name {
            self.register('s', name, id)?;
        }
        Ok(id)
    }

    fn lower_variant(&mut self, v: &VariantSpec) -> Result<FieldTypeId, Error> {
        if !v.has_body {
            let name = v.name.as_ref().ok_or_else(|| {
                Error::UnknownTypeReference("bodyless variant reference missing a name".into())
            })?;
            return self
                .lookup('v', name)
                .ok_or_else(|| Error::UnknownTypeReference(format!("variant {name} not declared")));
        }
        self.push_scope();
        let mut options = Vec::new();
        for entry in &v.entries {
            self.visit_struct_entry(entry, &mut options)?;
        }
        self.pop_scope();
        let tag = v
            .tag
            .clone()
            .map(TagRef::Unresolved)
            .ok_or(Error::MissingAttribute("variant tag"))?;
        let id = self.arena.insert(FieldTypeKind::Variant(VariantFieldType { tag, options }));
        if let Some(name) = &v.name {
            self.register('v', name, id)?;
        }
        Ok(id)
    }

    fn visit_struct_entry(
        &mut self,
        entry: &StructEntry,
        members: &mut Vec<(Intern<String>, FieldTypeId)>,
    ) -> Result<(), Error> {
        match entry {
            StructEntry::Typedef(td) => self.visit_typedef(td),
            StructEntry::Typealias(ta) => self.visit_typealias(ta),
            StructEntry::Field(f) => {
                let ty = self.lower_field_decl(f)?;
                let name = f
                    .declarator
                    .identifier
                    .clone()
                    .ok_or(Error::MissingAttribute("field identifier"))?;
                members.push((Intern::new(name), ty));
                Ok(())
            }
        }
    }

    fn lower_enum(&mut self, e: &EnumSpec) -> Result<FieldTypeId, Error> {
        if !e.has_body {
            let name = e.name.as_ref().ok_or_else(|| {
                Error::UnknownTypeReference("bodyless enum reference missing a name".into())
            })?;
            return self
                .lookup('e', name)
                .ok_or_else(|| Error::UnknownTypeReference(format!("enum {name} not declared")));
        }
        let container = match &e.container {
            Some(tsl) => self.lower_type_specifier_list(tsl)?,
            None => {
                let byte_order = self.trace_byte_order.ok_or(Error::MissingAttribute("byte_order"))?;
                self.arena.insert(FieldTypeKind::Integer(IntegerFieldType {
                    size_bits: 32,
                    signed: false,
                    byte_order,
                    display_base: DisplayBase::default(),
                    encoding: StringEncoding::default(),
                    alignment: IntegerFieldType::default_alignment(32),
                    mapped_clock: None,
                    meaning: Meaning::default(),
                    stored_value_index: None,
                }))
            }
        };
        let container_int = match self.arena.kind(container).clone() {
            FieldTypeKind::Integer(i) => i,
            _ => return Err(Error::EnumContainerNotInteger),
        };
        let mut ranges = Vec::with_capacity(e.entries.len());
        let mut next_val: i64 = 0;
        for entry in &e.entries {
            let (lo, hi) = match &entry.value {
                Some(EnumValue::Single(v)) => (*v, *v),
                Some(EnumValue::Range(a, b)) => (*a, *b),
                None => (next_val, next_val),
            };
            ranges.push(EnumerationRange {
                label: Intern::new(entry.label.clone()),
                lo,
                hi,
            });
            next_val = hi + 1;
        }
        let id = self.arena.insert(FieldTypeKind::Enumeration(EnumerationFieldType {
            container: container_int,
            ranges,
        }));
        if let Some(name) = &e.name {
            self.register('e', name, id)?;
        }
        Ok(id)
    }

    fn require_structure(&self, ty: FieldTypeId, what: &'static str) -> Result<(), Error> {
        match self.arena.kind(ty) {
            FieldTypeKind::Structure(_) => Ok(()),
            _ => Err(Error::UnknownTypeReference(format!("{what} must be a structure"))),
        }
    }

    fn assign_well_known_meanings(
        &mut self,
        ty: FieldTypeId,
        names: &[(&str, Meaning)],
    ) -> Result<(), Error> {
        let members = match self.arena.kind(ty) {
            FieldTypeKind::Structure(s) => s.members.clone(),
            _ => return Ok(()),
        };
        for (member_name, member_ty) in members {
            if let Some((_, meaning)) = names.iter().find(|(n, _)| *n == member_name.as_str()) {
                // Non-integer well-known members (e.g. a raw `uuid` byte
                // array) simply carry no meaning; that's fine.
                let _ = self.arena.set_meaning(member_ty, *meaning);
            }
        }
        Ok(())
    }

    // ---- sequence/variant resolution pass ----

    fn resolve_refs_in_subtree(
        &mut self,
        scope: Scope,
        ty: FieldTypeId,
        stack: &[StackFrame],
        roots: &ScopeRoots,
    ) -> Result<(), Error> {
        match self.arena.kind(ty).clone() {
            FieldTypeKind::Structure(s) => {
                for (i, (_, member_ty)) in s.members.iter().enumerate() {
                    let mut next_stack: Vec<StackFrame> = stack.to_vec();
                    next_stack.push(StackFrame { ty, index: i });
                    self.resolve_one(scope, *member_ty, &next_stack, roots)?;
                    self.resolve_refs_in_subtree(scope, *member_ty, &next_stack, roots)?;
                }
            }
            FieldTypeKind::Variant(v) => {
                for (i, (_, opt_ty)) in v.options.iter().enumerate() {
                    let mut next_stack: Vec<StackFrame> = stack.to_vec();
                    next_stack.push(StackFrame { ty, index: i });
                    self.resolve_one(scope, *opt_ty, &next_stack, roots)?;
                    self.resolve_refs_in_subtree(scope, *opt_ty, &next_stack, roots)?;
                }
            }
            FieldTypeKind::Array(a) => {
                self.resolve_one(scope, a.element, stack, roots)?;
                self.resolve_refs_in_subtree(scope, a.element, stack, roots)?;
            }
            FieldTypeKind::Sequence(s) => {
                self.resolve_one(scope, s.element, stack, roots)?;
                self.resolve_refs_in_subtree(scope, s.element, stack, roots)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolves `ty` itself if it is a sequence/variant still carrying an
    /// unresolved name, using `stack` as the in-progress type-stack state.
    fn resolve_one(
        &mut self,
        scope: Scope,
        ty: FieldTypeId,
        stack: &[StackFrame],
        roots: &ScopeRoots,
    ) -> Result<(), Error> {
        match self.arena.kind(ty).clone() {
            FieldTypeKind::Sequence(s) => {
                if let LengthRef::Unresolved(name) = &s.length {
                    let ctx = ResolutionContext {
                        arena: &self.arena,
                        roots,
                        stack,
                        current_scope: scope,
                    };
                    let path = resolve_path(name, &ctx)?;
                    let target = type_at_path(&self.arena, roots, &path)
                        .ok_or_else(|| Error::UnknownTypeReference(name.clone()))?;
                    if !self.arena.kind(target).is_unsigned_integer() {
                        return Err(Error::SequenceTargetNotUnsigned(name.clone()));
                    }
                    self.arena.assign_stored_value_index(target, &mut self.next_stored_value)?;
                    self.arena.set_sequence_path(ty, path)?;
                }
            }
            FieldTypeKind::Variant(v) => {
                if let TagRef::Unresolved(name) = &v.tag {
                    let ctx = ResolutionContext {
                        arena: &self.arena,
                        roots,
                        stack,
                        current_scope: scope,
                    };
                    let path = resolve_path(name, &ctx)?;
                    let target = type_at_path(&self.arena, roots, &path)
                        .ok_or_else(|| Error::UnknownTypeReference(name.clone()))?;
                    let enumeration = match self.arena.kind(target) {
                        FieldTypeKind::Enumeration(e) => e.clone(),
                        _ => return Err(Error::VariantTargetNotEnumeration(name.clone())),
                    };
                    for (label, _) in &v.options {
                        if enumeration.range_for_label(*label).is_none() {
                            warn!(%label, "variant option has no matching enumeration label");
                        }
                    }
                    self.arena.assign_stored_value_index(target, &mut self.next_stored_value)?;
                    self.arena.set_variant_tag(ty, path, target)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn type_at_path(arena: &TypeArena, roots: &ScopeRoots, path: &crate::path::FieldPath) -> Option<FieldTypeId> {
    let mut ty = roots.get(path.root)?;
    for idx in &path.indices {
        ty = match idx {
            PathIndex::Index(i) => arena.field_at_index(ty, *i)?,
            PathIndex::CurrentElement => arena.field_at_index(ty, 0)?,
        };
    }
    Some(ty)
}

fn pointer_key(tsl: &TypeSpecifierList, depth: usize) -> String {
    format!("{} {}", tsl.repr(), "*".repeat(depth))
}

fn expr_value<'e>(exprs: &'e [ast::CtfExpression], key: &'static str) -> Result<Option<&'e ast::UnaryExpr>, Error> {
    let mut found = None;
    for e in exprs {
        if e.left.len() == 1 && e.left[0] == key {
            if found.is_some() {
                return Err(Error::DuplicateAttribute(key));
            }
            found = Some(&e.right);
        }
    }
    Ok(found)
}

fn parse_display_base(expr: Option<&ast::UnaryExpr>) -> Result<DisplayBase, Error> {
    let v = match expr {
        None => return Ok(DisplayBase::default()),
        Some(v) => v,
    };
    if let Some(ident) = v.as_ident() {
        return match ident {
            "bin" | "binary" => Ok(DisplayBase::Binary),
            "oct" | "octal" => Ok(DisplayBase::Octal),
            "dec" | "decimal" => Ok(DisplayBase::Decimal),
            "hex" | "hexadecimal" => Ok(DisplayBase::Hexadecimal),
            _ => Err(Error::MissingAttribute("base")),
        };
    }
    match v.as_uint() {
        Some(2) => Ok(DisplayBase::Binary),
        Some(8) => Ok(DisplayBase::Octal),
        Some(10) => Ok(DisplayBase::Decimal),
        Some(16) => Ok(DisplayBase::Hexadecimal),
        _ => Err(Error::MissingAttribute("base")),
    }
}

fn parse_encoding(expr: Option<&ast::UnaryExpr>) -> Result<StringEncoding, Error> {
    match expr {
        None => Ok(StringEncoding::default()),
        Some(v) => parse_encoding_value(v.as_ident()),
    }
}

fn parse_encoding_value(ident: Option<&str>) -> Result<StringEncoding, Error> {
    match ident {
        None | Some("none") => Ok(StringEncoding::None),
        Some("ascii") => Ok(StringEncoding::Ascii),
        Some("utf8") | Some("UTF8") | Some("utf-8") => Ok(StringEncoding::Utf8),
        Some(_) => Err(Error::MissingAttribute("encoding")),
    }
}

/// Parses a `map = clock.NAME.value;` unary expression into the clock name.
fn parse_clock_map(v: &ast::UnaryExpr) -> Option<String> {
    match v {
        ast::UnaryExpr::DotLink(segs) | ast::UnaryExpr::ArrowLink(segs)
            if segs.len() == 3 && segs[0] == "clock" && segs[2] == "value" =>
        {
            Some(segs[1].clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::*;
    use pretty_assertions::assert_eq;

    fn int_specifier(size: u64, signed: bool) -> TypeSpecifier {
        let mut exprs = vec![CtfExpression {
            left: vec!["size".to_owned()],
            right: UnaryExpr::UInt(size),
        }];
        if signed {
            exprs.push(CtfExpression {
                left: vec!["signed".to_owned()],
                right: UnaryExpr::UInt(1),
            });
        }
        TypeSpecifier::Integer(exprs)
    }

    fn field(name: &str, spec: TypeSpecifier) -> StructEntry {
        StructEntry::Field(FieldDecl {
            type_specifier_list: TypeSpecifierList::single(spec),
            declarator: TypeDeclarator::named(name),
        })
    }

    fn minimal_root() -> Root {
        Root {
            traces: vec![TraceBlock {
                byte_order: Some(ByteOrderSpec::Be),
                major: Some(1),
                minor: Some(8),
                uuid: None,
                packet_header: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn rejects_missing_trace_block() {
        let root = Root::default();
        assert!(matches!(build_trace(&root), Err(Error::MissingAttribute("trace"))));
    }

    #[test]
    fn rejects_native_byte_order_at_trace_scope() {
        let mut root = minimal_root();
        root.traces[0].byte_order = Some(ByteOrderSpec::Native);
        assert!(matches!(build_trace(&root), Err(Error::NativeByteOrderAtTrace)));
    }

    #[test]
    fn builds_single_stream_single_event_trace() {
        let mut root = minimal_root();
        root.events.push(EventBlock {
            name: Some("init".to_owned()),
            id: Some(0),
            stream_id: None,
            context: None,
            fields: Some(FieldDecl {
                type_specifier_list: TypeSpecifierList::single(TypeSpecifier::Struct(StructSpec {
                    name: None,
                    has_body: true,
                    entries: vec![field("value", int_specifier(8, false))],
                    min_align: Some(8),
                })),
                declarator: TypeDeclarator::default(),
            }),
        });

        let trace = build_trace(&root).unwrap();
        assert_eq!(trace.major, 1);
        assert_eq!(trace.minor, 8);
        let sc = trace.stream_class(0).unwrap();
        let ec = sc.event_class(0).unwrap();
        assert_eq!(ec.name.as_str(), "init");
        match trace.type_arena.kind(ec.payload) {
            FieldTypeKind::Structure(s) => assert_eq!(s.members.len(), 1),
            other => panic!("expected a structure payload, got {other:?}"),
        }
    }

    #[test]
    fn resolves_sequence_length_sibling_and_assigns_stored_value() {
        let mut root = minimal_root();
        let payload_struct = StructSpec {
            name: None,
            has_body: true,
            entries: vec![
                field("len", int_specifier(8, false)),
                StructEntry::Field(FieldDecl {
                    type_specifier_list: TypeSpecifierList::single(int_specifier(8, false)),
                    declarator: TypeDeclarator {
                        pointer_depth: 0,
                        identifier: Some("data".to_owned()),
                        array_suffixes: vec![ArraySuffix::Sequence("len".to_owned())],
                    },
                }),
            ],
            min_align: Some(8),
        };
        root.events.push(EventBlock {
            name: Some("evt".to_owned()),
            id: Some(0),
            stream_id: None,
            context: None,
            fields: Some(FieldDecl {
                type_specifier_list: TypeSpecifierList::single(TypeSpecifier::Struct(payload_struct)),
                declarator: TypeDeclarator::default(),
            }),
        });

        let trace = build_trace(&root).unwrap();
        let sc = trace.stream_class(0).unwrap();
        let ec = sc.event_class(0).unwrap();
        let members = match trace.type_arena.kind(ec.payload) {
            FieldTypeKind::Structure(s) => s.members.clone(),
            other => panic!("expected a structure, got {other:?}"),
        };
        let (_, len_ty) = members[0];
        match trace.type_arena.kind(len_ty) {
            FieldTypeKind::Integer(i) => assert_eq!(i.stored_value_index, Some(0)),
            other => panic!("expected an integer, got {other:?}"),
        }
        let (_, seq_ty) = members[1];
        match trace.type_arena.kind(seq_ty) {
            FieldTypeKind::Sequence(s) => assert!(matches!(s.length, LengthRef::Resolved(_))),
            other => panic!("expected a sequence, got {other:?}"),
        }
        assert_eq!(trace.num_stored_values, 1);
    }
}
