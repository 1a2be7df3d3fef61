//! Field IR: a tagged tree of runtime values mirroring
//! the Field Type IR (A). Lives in its own arena, parallel to `TypeArena`,
//! since field instances are created and torn down per-packet/per-event
//! while the type arena is immutable for the trace's lifetime.

use crate::error::Error;
use crate::ir::field_type::{FieldTypeId, FieldTypeKind, TypeArena};
use ordered_float::OrderedFloat;
use serde::Serialize;

pub type FieldId = usize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum FieldValue {
    Unset,
    UnsignedInteger(u64),
    SignedInteger(i64),
    Real(OrderedFloat<f64>),
    /// Raw integer value plus the resolved label, if any (the label is
    /// filled in by whoever wrote the value, not by the Field layer itself).
    Enumeration(i64, Option<String>),
    Str(String),
    Structure(Vec<FieldId>),
    Array(Vec<FieldId>),
    Sequence(Vec<FieldId>),
    Variant {
        selected_index: Option<usize>,
        selected_field: Option<FieldId>,
    },
}

#[derive(Clone, Debug)]
pub struct FieldNode {
    pub ty: FieldTypeId,
    pub value: FieldValue,
}

/// Owns every `Field` node reachable from one dynamic-scope root
/// "Lifecycle"). A fresh `FieldArena` is instantiated per dscope-begin and
/// released once the iterator moves past that dscope (for event-scoped
/// arenas) or attached to the live packet (for packet-header/context).
#[derive(Default)]
pub struct FieldArena {
    nodes: Vec<FieldNode>,
}

impl FieldArena {
    pub fn new() -> Self {
        FieldArena { nodes: Vec::new() }
    }

    pub fn get(&self, id: FieldId) -> &FieldNode {
        &self.nodes[id]
    }

    fn push(&mut self, ty: FieldTypeId, value: FieldValue) -> FieldId {
        self.nodes.push(FieldNode { ty, value });
        self.nodes.len() - 1
    }

    /// Builds a default-initialized tree from `ty`.
    ///
    /// Structures and fixed arrays are instantiated eagerly since their
    /// shape is static. Sequences start empty (true length is known only at
    /// decode time) and variants start unselected. A character array/sequence
    /// (detected the same way the BTR detects a text compound) collapses
    /// directly to a string-valued field rather than one child per byte —
    /// the only shape a consumer can usefully read it as.
    pub fn instantiate(&mut self, type_arena: &TypeArena, ty: FieldTypeId) -> FieldId {
        if type_arena.kind(ty).is_text_compound(type_arena) {
            return self.push(ty, FieldValue::Str(String::new()));
        }
        match type_arena.kind(ty).clone() {
            FieldTypeKind::Integer(_) | FieldTypeKind::Float(_) | FieldTypeKind::Enumeration(_) => {
                self.push(ty, FieldValue::Unset)
            }
            FieldTypeKind::String(_) => self.push(ty, FieldValue::Str(String::new())),
            FieldTypeKind::Structure(s) => {
                let children: Vec<FieldId> = s
                    .members
                    .iter()
                    .map(|(_, mty)| self.instantiate(type_arena, *mty))
                    .collect();
                self.push(ty, FieldValue::Structure(children))
            }
            FieldTypeKind::Array(a) => {
                let children: Vec<FieldId> = (0..a.length)
                    .map(|_| self.instantiate(type_arena, a.element))
                    .collect();
                self.push(ty, FieldValue::Array(children))
            }
            FieldTypeKind::Sequence(_) => self.push(ty, FieldValue::Sequence(Vec::new())),
            FieldTypeKind::Variant(_) => self.push(
                ty,
                FieldValue::Variant {
                    selected_index: None,
                    selected_field: None,
                },
            ),
        }
    }

    pub fn set_unsigned(&mut self, id: FieldId, v: u64) {
        self.nodes[id].value = FieldValue::UnsignedInteger(v);
    }

    pub fn set_signed(&mut self, id: FieldId, v: i64) {
        self.nodes[id].value = FieldValue::SignedInteger(v);
    }

    pub fn set_real(&mut self, id: FieldId, v: f64) {
        self.nodes[id].value = FieldValue::Real(OrderedFloat(v));
    }

    pub fn set_enumeration(&mut self, id: FieldId, v: i64, label: Option<String>) {
        self.nodes[id].value = FieldValue::Enumeration(v, label);
    }

    /// Appends one more element to a sequence field, instantiating its
    /// default value from `element_ty`, and returns the new child's id.
    pub fn sequence_push_default(
        &mut self,
        type_arena: &TypeArena,
        seq_id: FieldId,
        element_ty: FieldTypeId,
    ) -> FieldId {
        let child = self.instantiate(type_arena, element_ty);
        match &mut self.nodes[seq_id].value {
            FieldValue::Sequence(children) => children.push(child),
            _ => unreachable!("sequence_push_default called on a non-sequence field"),
        }
        child
    }

    /// Appends one byte to a text-compound field's accumulated string,
    /// unless it has already seen its terminating zero.
    pub fn append_text_byte(&mut self, id: FieldId, byte: u8, already_terminated: bool) -> bool {
        if already_terminated || byte == 0 {
            return true;
        }
        if let FieldValue::Str(s) = &mut self.nodes[id].value {
            s.push(byte as char);
        }
        false
    }

    pub fn append_string_chunk(&mut self, id: FieldId, bytes: &[u8]) {
        if let FieldValue::Str(s) = &mut self.nodes[id].value {
            for &b in bytes {
                s.push(b as char);
            }
        }
    }

    /// Selects a variant option by index, instantiating its subtree.
    pub fn select_variant_option(
        &mut self,
        type_arena: &TypeArena,
        variant_id: FieldId,
        option_index: usize,
        option_ty: FieldTypeId,
    ) -> FieldId {
        let child = self.instantiate(type_arena, option_ty);
        match &mut self.nodes[variant_id].value {
            FieldValue::Variant {
                selected_index,
                selected_field,
            } => {
                *selected_index = Some(option_index);
                *selected_field = Some(child);
            }
            _ => unreachable!("select_variant_option called on a non-variant field"),
        }
        child
    }

    pub fn child_at_index(&self, parent: FieldId, index: usize) -> Result<FieldId, Error> {
        match &self.nodes[parent].value {
            FieldValue::Structure(c) | FieldValue::Array(c) | FieldValue::Sequence(c) => c
                .get(index)
                .copied()
                .ok_or_else(|| Error::UnknownTypeReference("field index out of range".into())),
            FieldValue::Variant { selected_field, .. } => {
                selected_field.ok_or(Error::UnknownTypeReference(
                    "variant has no option selected".into(),
                ))
            }
            _ => Err(Error::UnknownTypeReference(
                "field has no children".into(),
            )),
        }
    }
}
