//! Field-Path Resolver: turns a dot-delimited TSDL path
//! token sequence into a resolved [`FieldPath`] against the in-progress
//! Field Type IR.

use crate::error::Error;
use crate::ir::field_type::{FieldTypeId, TypeArena};
use crate::path::{FieldPath, PathIndex, Scope};

/// One frame of the "current type stack" the visitor maintains while
/// walking into nested structures/variants.
#[derive(Copy, Clone, Debug)]
pub struct StackFrame {
    pub ty: FieldTypeId,
    pub index: usize,
}

/// The root field type of each dynamic scope, as far as the visitor has
/// built them so far.
#[derive(Copy, Clone, Debug, Default)]
pub struct ScopeRoots {
    pub packet_header: Option<FieldTypeId>,
    pub packet_context: Option<FieldTypeId>,
    pub event_header: Option<FieldTypeId>,
    pub stream_event_context: Option<FieldTypeId>,
    pub event_context: Option<FieldTypeId>,
    pub event_payload: Option<FieldTypeId>,
}

impl ScopeRoots {
    pub fn get(&self, scope: Scope) -> Option<FieldTypeId> {
        match scope {
            Scope::PacketHeader => self.packet_header,
            Scope::PacketContext => self.packet_context,
            Scope::EventHeader => self.event_header,
            Scope::StreamEventContext => self.stream_event_context,
            Scope::EventContext => self.event_context,
            Scope::EventPayload => self.event_payload,
        }
    }
}

/// Resolution context: the scope roots plus the type stack for the scope
/// currently being visited.
pub struct ResolutionContext<'a> {
    pub arena: &'a TypeArena,
    pub roots: &'a ScopeRoots,
    /// Top of stack is the innermost enclosing structure/variant.
    pub stack: &'a [StackFrame],
    pub current_scope: Scope,
}

const ABSOLUTE_PREFIXES: &[(&[&str], Scope)] = &[
    (&["trace", "packet", "header"], Scope::PacketHeader),
    (&["stream", "packet", "context"], Scope::PacketContext),
    (&["stream", "event", "header"], Scope::EventHeader),
    (&["stream", "event", "context"], Scope::StreamEventContext),
    (&["event", "context"], Scope::EventContext),
    (&["event", "fields"], Scope::EventPayload),
];

pub fn resolve_path(path: &str, ctx: &ResolutionContext) -> Result<FieldPath, Error> {
    let tokens: Vec<&str> = path.split('.').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(Error::UnknownTypeReference(format!(
            "path '{path}' contains an empty token"
        )));
    }

    if tokens.first() == Some(&"env") {
        return Err(Error::not_implemented("env.* field path references"));
    }

    for (prefix, scope) in ABSOLUTE_PREFIXES {
        if tokens.len() > prefix.len() && tokens[..prefix.len()] == **prefix {
            let root = ctx
                .roots
                .get(*scope)
                .ok_or_else(|| Error::UnknownScope(path.to_owned()))?;
            let tail = &tokens[prefix.len()..];
            let indices = descend(ctx.arena, root, tail)?;
            return Ok(FieldPath::new(*scope, indices));
        }
    }

    resolve_relative(&tokens, ctx, path)
}

fn resolve_relative(
    tokens: &[&str],
    ctx: &ResolutionContext,
    original: &str,
) -> Result<FieldPath, Error> {
    // Step 3: walk the type stack from the top (innermost) down, trying the
    // full token list against each ancestor frame's type.
    for k in (0..ctx.stack.len()).rev() {
        let frame = ctx.stack[k];
        if let Ok(tail_indices) = descend(ctx.arena, frame.ty, tokens) {
            let mut indices: Vec<PathIndex> = ctx.stack[..k]
                .iter()
                .map(|f| PathIndex::Index(f.index))
                .collect();
            indices.extend(tail_indices);
            return Ok(FieldPath::new(ctx.current_scope, indices));
        }
    }

    // Step 3 fallback: fresh descent from each scope root in fixed order.
    for scope in Scope::ORDER {
        if let Some(root) = ctx.roots.get(scope) {
            if let Ok(indices) = descend(ctx.arena, root, tokens) {
                return Ok(FieldPath::new(scope, indices));
            }
        }
    }

    Err(Error::UnknownTypeReference(format!(
        "could not resolve relative path '{original}'"
    )))
}

/// Step 4: consume `tokens` against `ty`, descending through
/// structure/variant members (consuming a token each time) and
/// array/sequence elements (appending the current-element sentinel without
/// consuming a token), until the token list is exhausted.
fn descend(arena: &TypeArena, mut ty: FieldTypeId, tokens: &[&str]) -> Result<Vec<PathIndex>, Error> {
    let mut out = Vec::new();
    let mut remaining = tokens;
    loop {
        let kind = arena.kind(ty);
        if kind.field_index_by_name(remaining.first().copied().unwrap_or("")).is_some()
            || matches!(
                kind,
                crate::ir::field_type::FieldTypeKind::Structure(_)
                    | crate::ir::field_type::FieldTypeKind::Variant(_)
            )
        {
            let tok = remaining
                .first()
                .ok_or_else(|| Error::UnknownTypeReference("path exhausted".into()))?;
            let idx = kind
                .field_index_by_name(tok)
                .ok_or_else(|| Error::UnknownTypeReference(format!("no member named '{tok}'")))?;
            out.push(PathIndex::Index(idx));
            ty = arena
                .field_at_index(ty, idx)
                .ok_or_else(|| Error::UnknownTypeReference("member has no field type".into()))?;
            remaining = &remaining[1..];
            if remaining.is_empty() {
                return Ok(out);
            }
        } else if matches!(
            kind,
            crate::ir::field_type::FieldTypeKind::Array(_)
                | crate::ir::field_type::FieldTypeKind::Sequence(_)
        ) {
            out.push(PathIndex::CurrentElement);
            ty = arena
                .field_at_index(ty, 0)
                .ok_or_else(|| Error::UnknownTypeReference("element has no field type".into()))?;
            if remaining.is_empty() {
                return Ok(out);
            }
        } else {
            return Err(Error::UnknownTypeReference(
                "path descends into a non-compound type".into(),
            ));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::field_type::{FieldTypeKind, IntegerFieldType, StructureFieldType};
    use internment::Intern;

    fn uint(arena: &mut TypeArena, size: u8) -> FieldTypeId {
        arena.insert(FieldTypeKind::Integer(IntegerFieldType {
            size_bits: size,
            signed: false,
            byte_order: crate::ir::field_type::ByteOrder::BigEndian,
            display_base: Default::default(),
            encoding: Default::default(),
            alignment: IntegerFieldType::default_alignment(size),
            mapped_clock: None,
            meaning: Default::default(),
            stored_value_index: None,
        }))
    }

    #[test]
    fn resolves_absolute_path() {
        let mut arena = TypeArena::new();
        let stream_id = uint(&mut arena, 32);
        let header = arena.insert(FieldTypeKind::Structure(StructureFieldType {
            members: vec![(Intern::new("stream_id".to_owned()), stream_id)],
            alignment: 8,
        }));

        let roots = ScopeRoots {
            packet_header: Some(header),
            ..Default::default()
        };
        let ctx = ResolutionContext {
            arena: &arena,
            roots: &roots,
            stack: &[],
            current_scope: Scope::PacketHeader,
        };

        let resolved = resolve_path("trace.packet.header.stream_id", &ctx).unwrap();
        assert_eq!(resolved.root, Scope::PacketHeader);
        assert_eq!(resolved.indices, vec![PathIndex::Index(0)]);
    }

    #[test]
    fn resolves_relative_sibling() {
        let mut arena = TypeArena::new();
        let len = uint(&mut arena, 8);
        let payload = arena.insert(FieldTypeKind::Structure(StructureFieldType {
            members: vec![
                (Intern::new("len".to_owned()), len),
                (Intern::new("data".to_owned()), len),
            ],
            alignment: 8,
        }));

        let roots = ScopeRoots {
            event_payload: Some(payload),
            ..Default::default()
        };
        // Simulate being inside `payload`, about to visit member index 1 ("data"),
        // when resolving "len" for its sequence length.
        let stack = [StackFrame {
            ty: payload,
            index: 1,
        }];
        let ctx = ResolutionContext {
            arena: &arena,
            roots: &roots,
            stack: &stack,
            current_scope: Scope::EventPayload,
        };

        let resolved = resolve_path("len", &ctx).unwrap();
        assert_eq!(resolved.root, Scope::EventPayload);
        assert_eq!(resolved.indices, vec![PathIndex::Index(0)]);
    }

    #[test]
    fn env_paths_are_not_implemented() {
        let arena = TypeArena::new();
        let roots = ScopeRoots::default();
        let ctx = ResolutionContext {
            arena: &arena,
            roots: &roots,
            stack: &[],
            current_scope: Scope::EventPayload,
        };
        assert!(matches!(
            resolve_path("env.foo", &ctx),
            Err(Error::NotImplemented(_))
        ));
    }
}
