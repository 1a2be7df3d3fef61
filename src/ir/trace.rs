//! Trace IR: `Trace` → stream classes → event classes.

use crate::ir::field_type::{ByteOrder, FieldTypeId, TypeArena};
use fxhash::FxHashMap;
use internment::Intern;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ClockType {
    pub name: Intern<String>,
    pub frequency: u64,
    pub uuid: Option<Uuid>,
    /// Offset in seconds and in cycles, both relative to `origin_is_unix_epoch`.
    pub offset_seconds: i64,
    pub offset_cycles: i64,
    pub precision: u64,
    pub origin_is_unix_epoch: bool,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EventClass {
    pub id: u64,
    pub name: Intern<String>,
    pub context: Option<FieldTypeId>,
    pub payload: FieldTypeId,
}

#[derive(Clone, Debug)]
pub struct StreamClass {
    pub id: u64,
    pub packet_context: Option<FieldTypeId>,
    pub event_header: Option<FieldTypeId>,
    pub event_context: Option<FieldTypeId>,
    pub event_classes: FxHashMap<u64, EventClass>,
}

impl StreamClass {
    pub fn event_class(&self, id: u64) -> Option<&EventClass> {
        self.event_classes.get(&id)
    }
}

/// A scalar value from an `env` block.
#[derive(Clone, Debug)]
pub enum EnvValue {
    String(String),
    Integer(i64),
}

#[derive(Debug)]
pub struct Trace {
    pub type_arena: TypeArena,
    pub byte_order: ByteOrder,
    pub major: u64,
    pub minor: u64,
    pub uuid: Option<Uuid>,
    pub packet_header: Option<FieldTypeId>,
    pub clock: Option<ClockType>,
    pub env: FxHashMap<String, EnvValue>,
    pub stream_classes: FxHashMap<u64, StreamClass>,
    /// Total count of stored-value slots assigned during sequence/variant
    /// resolution; sizes the iterator's stored-value array.
    pub num_stored_values: usize,
}

impl Trace {
    pub fn stream_class(&self, id: u64) -> Option<&StreamClass> {
        self.stream_classes.get(&id)
    }
}
