use ctf_reader::ast::{
    ByteOrderSpec, CtfExpression, EventBlock, FieldDecl, Root, StructEntry, StructSpec,
    TraceBlock, TypeDeclarator, TypeSpecifier, TypeSpecifierList, UnaryExpr,
};

/// `trace { byte_order = be; major = 1; minor = 8; };`
/// `event { name = "sample"; fields := struct { integer { size = 32; } value; }; };`
///
/// Shared by both demos so they only need a binary stream file on the
/// command line; a real embedding application gets its `Root` from its own
/// TSDL grammar front-end instead of hard-coding one like this.
pub fn minimal_root() -> Root {
    let value_field = StructEntry::Field(FieldDecl {
        type_specifier_list: TypeSpecifierList::single(TypeSpecifier::Integer(vec![CtfExpression {
            left: vec!["size".to_owned()],
            right: UnaryExpr::UInt(32),
        }])),
        declarator: TypeDeclarator::named("value"),
    });
    Root {
        traces: vec![TraceBlock {
            byte_order: Some(ByteOrderSpec::Be),
            major: Some(1),
            minor: Some(8),
            uuid: None,
            packet_header: None,
        }],
        events: vec![EventBlock {
            name: Some("sample".to_owned()),
            id: Some(0),
            stream_id: None,
            context: None,
            fields: Some(FieldDecl {
                type_specifier_list: TypeSpecifierList::single(TypeSpecifier::Struct(StructSpec {
                    name: None,
                    has_body: true,
                    entries: vec![value_field],
                    min_align: Some(8),
                })),
                declarator: TypeDeclarator::default(),
            }),
        }],
        ..Default::default()
    }
}
