//! Shared fixture builders for the integration tests: small `ast` trees and
//! a one-byte-at-a-time [`Medium`] for exercising the stitch buffer.

#![allow(dead_code)]

use ctf_reader::ast::*;
use ctf_reader::medium::{Medium, MediumStatus};

pub fn uint_expr(key: &str, v: u64) -> CtfExpression {
    CtfExpression {
        left: vec![key.to_owned()],
        right: UnaryExpr::UInt(v),
    }
}

pub fn str_expr(key: &str, v: &str) -> CtfExpression {
    CtfExpression {
        left: vec![key.to_owned()],
        right: UnaryExpr::Str(v.to_owned()),
    }
}

pub fn path_expr(key: &str, segs: &[&str]) -> CtfExpression {
    CtfExpression {
        left: vec![key.to_owned()],
        right: UnaryExpr::DotLink(segs.iter().map(|s| s.to_string()).collect()),
    }
}

/// `integer { size = N; byte_order = bo; }`, `bo` one of "be"/"le"/"network".
pub fn int_ty(size: u64, byte_order: Option<&str>) -> TypeSpecifier {
    let mut exprs = vec![uint_expr("size", size)];
    if let Some(bo) = byte_order {
        exprs.push(str_expr("byte_order", bo));
    }
    TypeSpecifier::Integer(exprs)
}

/// A `map = clock.NAME.value;`-mapped integer.
pub fn clock_mapped_int_ty(size: u64, byte_order: Option<&str>, clock_name: &str) -> TypeSpecifier {
    let mut exprs = vec![uint_expr("size", size)];
    if let Some(bo) = byte_order {
        exprs.push(str_expr("byte_order", bo));
    }
    exprs.push(path_expr("map", &["clock", clock_name, "value"]));
    TypeSpecifier::Integer(exprs)
}

/// `enum { A = 0, B = 1, ... } : container;`
pub fn enum_ty(container_size: u64, entries: &[(&str, i64)]) -> TypeSpecifier {
    TypeSpecifier::Enum(EnumSpec {
        name: None,
        has_body: true,
        container: Some(TypeSpecifierList::single(int_ty(container_size, Some("be")))),
        entries: entries
            .iter()
            .map(|(label, value)| EnumEntry {
                label: (*label).to_owned(),
                value: Some(EnumValue::Single(*value)),
            })
            .collect(),
    })
}

/// `variant<tag_name> { option: spec; ... };`
pub fn variant_ty(tag_name: &str, options: Vec<(&str, TypeSpecifier)>) -> TypeSpecifier {
    TypeSpecifier::Variant(VariantSpec {
        name: None,
        tag: Some(tag_name.to_owned()),
        has_body: true,
        entries: options.into_iter().map(|(name, spec)| field(name, spec)).collect(),
    })
}

pub fn field(name: &str, spec: TypeSpecifier) -> StructEntry {
    StructEntry::Field(FieldDecl {
        type_specifier_list: TypeSpecifierList::single(spec),
        declarator: TypeDeclarator::named(name),
    })
}

/// A sequence field: `spec name[length_field];`.
pub fn sequence_field(name: &str, spec: TypeSpecifier, length_field: &str) -> StructEntry {
    StructEntry::Field(FieldDecl {
        type_specifier_list: TypeSpecifierList::single(spec),
        declarator: TypeDeclarator {
            pointer_depth: 0,
            identifier: Some(name.to_owned()),
            array_suffixes: vec![ArraySuffix::Sequence(length_field.to_owned())],
        },
    })
}

pub fn struct_decl(entries: Vec<StructEntry>) -> FieldDecl {
    FieldDecl {
        type_specifier_list: TypeSpecifierList::single(TypeSpecifier::Struct(StructSpec {
            name: None,
            has_body: true,
            entries,
            min_align: Some(8),
        })),
        declarator: TypeDeclarator::default(),
    }
}

/// `trace { byte_order = be; major = 1; minor = 8; packet.header := struct { integer { size = 32; } magic; }; };`
pub fn trace_block(header_fields: Vec<StructEntry>) -> TraceBlock {
    TraceBlock {
        byte_order: Some(ByteOrderSpec::Be),
        major: Some(1),
        minor: Some(8),
        uuid: None,
        packet_header: Some(struct_decl(header_fields)),
    }
}

pub fn stream_block(context_fields: Vec<StructEntry>, event_header_fields: Vec<StructEntry>) -> StreamBlock {
    StreamBlock {
        id: Some(0),
        packet_context: Some(struct_decl(context_fields)),
        event_header: Some(struct_decl(event_header_fields)),
        event_context: None,
    }
}

pub fn event_block(id: u64, payload_fields: Vec<StructEntry>) -> EventBlock {
    EventBlock {
        name: Some(format!("evt{id}")),
        id: Some(id),
        stream_id: Some(0),
        context: None,
        fields: Some(struct_decl(payload_fields)),
    }
}

/// A [`Medium`] that hands out at most one byte per `request_bytes` call,
/// regardless of the requested size, to exercise the BTR's stitch buffer
/// (§8 "cross-buffer stitch").
pub struct OneByteMedium<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> OneByteMedium<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        OneByteMedium { data, cursor: 0 }
    }
}

impl<'a> Medium for OneByteMedium<'a> {
    type Stream = ();

    fn request_bytes(&mut self, _max_size: usize) -> MediumStatus<'_> {
        if self.cursor >= self.data.len() {
            return MediumStatus::Eof;
        }
        let addr = &self.data[self.cursor..self.cursor + 1];
        self.cursor += 1;
        MediumStatus::Ok { addr }
    }

    fn borrow_stream(&mut self, _stream_class_id: u64, _data_stream_id: i64) -> Self::Stream {}
}
