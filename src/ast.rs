//! TSDL AST: the node-kind vocabulary the Metadata Visitor consumes. Parsing
//! TSDL source text into this tree is out of scope for this crate —
//! something upstream (a grammar-generated parser, a hand-rolled
//! recursive-descent one, whatever fits the embedding application) is
//! expected to produce it. This module only fixes the shape of that tree so
//! the visitor has something concrete to walk.

use std::collections::BTreeMap;

/// A TSDL unary expression: the right-hand side of a `key = value;`
/// ctf-expression, or one element of a dotted/arrow-linked path.
#[derive(Clone, Debug, PartialEq)]
pub enum UnaryExpr {
    UInt(u64),
    SInt(i64),
    Str(String),
    /// `a.b.c`
    DotLink(Vec<String>),
    /// `a->b->c`; TSDL treats this identically to a dot-link.
    ArrowLink(Vec<String>),
    DotDotDot,
}

impl UnaryExpr {
    pub fn as_path(&self) -> Option<String> {
        match self {
            UnaryExpr::DotLink(segs) | UnaryExpr::ArrowLink(segs) => Some(segs.join(".")),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            UnaryExpr::UInt(v) => Some(*v),
            UnaryExpr::SInt(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_sint(&self) -> Option<i64> {
        match self {
            UnaryExpr::SInt(v) => Some(*v),
            UnaryExpr::UInt(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            UnaryExpr::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Accepts either a quoted string or a single-segment dot-link, since a
    /// bareword identifier like `be` or `native` can show up as either
    /// depending on how the upstream parser lexed it.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            UnaryExpr::Str(s) => Some(s.as_str()),
            UnaryExpr::DotLink(segs) if segs.len() == 1 => Some(segs[0].as_str()),
            _ => None,
        }
    }
}

/// One `left = right;` statement inside a primitive-type, trace, stream,
/// event or clock block.
#[derive(Clone, Debug)]
pub struct CtfExpression {
    pub left: Vec<String>,
    pub right: UnaryExpr,
}

/// A single specifier naming a type: one of the three primitive keyword
/// blocks, a compound body, or a reference to something already declared.
#[derive(Clone, Debug)]
pub enum TypeSpecifier {
    Integer(Vec<CtfExpression>),
    FloatingPoint(Vec<CtfExpression>),
    String(Vec<CtfExpression>),
    Struct(StructSpec),
    Variant(VariantSpec),
    Enum(EnumSpec),
    /// `foo_t`, `struct foo`, `variant foo`, `enum foo` — anything that must
    /// be looked up in the declaration scope stack rather than built fresh.
    Named(String),
}

impl TypeSpecifier {
    /// A stable textual key for alias/pointer lookups. Only named
    /// references round-trip exactly; bodies get
    /// a best-effort tag since TSDL pointers practically always sit on a
    /// `typedef`'d alias name.
    pub fn repr(&self) -> String {
        match self {
            TypeSpecifier::Integer(_) => "integer".to_owned(),
            TypeSpecifier::FloatingPoint(_) => "floating_point".to_owned(),
            TypeSpecifier::String(_) => "string".to_owned(),
            TypeSpecifier::Struct(s) => format!("struct {}", s.name.as_deref().unwrap_or("")),
            TypeSpecifier::Variant(v) => format!("variant {}", v.name.as_deref().unwrap_or("")),
            TypeSpecifier::Enum(e) => format!("enum {}", e.name.as_deref().unwrap_or("")),
            TypeSpecifier::Named(n) => n.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TypeSpecifierList(pub Vec<TypeSpecifier>);

impl TypeSpecifierList {
    pub fn single(spec: TypeSpecifier) -> Self {
        TypeSpecifierList(vec![spec])
    }

    pub fn repr(&self) -> String {
        self.0.iter().map(TypeSpecifier::repr).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Clone, Debug)]
pub enum ArraySuffix {
    Fixed(u64),
    /// Length field name, resolved later by the Field-Path Resolver (4.C).
    Sequence(String),
}

/// A declarator: pointer depth, optional identifier, and any array/sequence
/// suffixes. Multiple suffixes nest outer-to-inner: `foo[4][8]` is an array
/// of 4 arrays of 8, so `suffixes[0]` (the `[4]`) is the outermost wrapper.
#[derive(Clone, Debug, Default)]
pub struct TypeDeclarator {
    pub pointer_depth: usize,
    pub identifier: Option<String>,
    pub array_suffixes: Vec<ArraySuffix>,
}

impl TypeDeclarator {
    pub fn named(identifier: impl Into<String>) -> Self {
        TypeDeclarator {
            pointer_depth: 0,
            identifier: Some(identifier.into()),
            array_suffixes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub type_specifier_list: TypeSpecifierList,
    pub declarator: TypeDeclarator,
}

#[derive(Clone, Debug)]
pub struct Typedef {
    pub type_specifier_list: TypeSpecifierList,
    pub declarator: TypeDeclarator,
}

#[derive(Clone, Debug)]
pub struct Typealias {
    pub target_specifier_list: TypeSpecifierList,
    pub target_declarator: TypeDeclarator,
    pub alias_declarator: TypeDeclarator,
}

#[derive(Clone, Debug)]
pub enum StructEntry {
    Typedef(Typedef),
    Typealias(Typealias),
    Field(FieldDecl),
}

#[derive(Clone, Debug, Default)]
pub struct StructSpec {
    pub name: Option<String>,
    /// `false` for a bodyless reference (`struct foo field_name;`).
    pub has_body: bool,
    pub entries: Vec<StructEntry>,
    pub min_align: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct VariantSpec {
    pub name: Option<String>,
    /// The `<tag_name>` path, unresolved until 4.D's resolution pass runs it
    /// through the Field-Path Resolver (4.C).
    pub tag: Option<String>,
    pub has_body: bool,
    pub entries: Vec<StructEntry>,
}

#[derive(Clone, Debug)]
pub enum EnumValue {
    Single(i64),
    Range(i64, i64),
}

#[derive(Clone, Debug)]
pub struct EnumEntry {
    pub label: String,
    pub value: Option<EnumValue>,
}

#[derive(Clone, Debug, Default)]
pub struct EnumSpec {
    pub name: Option<String>,
    pub has_body: bool,
    pub container: Option<TypeSpecifierList>,
    pub entries: Vec<EnumEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrderSpec {
    Native,
    Be,
    Le,
}

#[derive(Clone, Debug, Default)]
pub struct ClockBlock {
    pub name: String,
    pub freq: Option<u64>,
    pub uuid: Option<String>,
    pub offset_s: Option<i64>,
    pub offset_cycles: Option<i64>,
    pub precision: Option<u64>,
    pub absolute: Option<bool>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct EnvBlock {
    pub entries: Vec<(String, UnaryExpr)>,
}

#[derive(Clone, Debug, Default)]
pub struct TraceBlock {
    pub byte_order: Option<ByteOrderSpec>,
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub uuid: Option<String>,
    pub packet_header: Option<FieldDecl>,
}

#[derive(Clone, Debug, Default)]
pub struct StreamBlock {
    pub id: Option<u64>,
    pub packet_context: Option<FieldDecl>,
    pub event_header: Option<FieldDecl>,
    pub event_context: Option<FieldDecl>,
}

#[derive(Clone, Debug, Default)]
pub struct EventBlock {
    pub name: Option<String>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub context: Option<FieldDecl>,
    pub fields: Option<FieldDecl>,
}

#[derive(Clone, Debug)]
pub enum TopLevelDecl {
    Typedef(Typedef),
    Typealias(Typealias),
    /// A naked type-specifier-list declaration at root scope, e.g.
    /// `struct foo { ... };` with no declarator — registers `foo` in the
    /// root scope without producing a field anywhere.
    Naked(TypeSpecifierList),
}

/// The whole metadata document, already split by node kind the way a real
/// grammar-generated parser would hand it to this crate.
#[derive(Clone, Debug, Default)]
pub struct Root {
    pub top_level_decls: Vec<TopLevelDecl>,
    pub clocks: Vec<ClockBlock>,
    pub envs: Vec<EnvBlock>,
    pub traces: Vec<TraceBlock>,
    pub streams: Vec<StreamBlock>,
    pub events: Vec<EventBlock>,
}

/// Convenience accessor mirroring the visitor's need to look env values up
/// by key once collected (duplicate keys keep the last value, matching
/// ordinary TSDL key=value semantics).
pub fn env_map(env: &EnvBlock) -> BTreeMap<&str, &UnaryExpr> {
    env.entries.iter().map(|(k, v)| (k.as_str(), v)).collect()
}
