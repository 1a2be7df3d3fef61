//! Components A and B: the Field Type IR and Field IR, plus the Trace IR
//! that owns the stream/event class hierarchy.

pub mod field;
pub mod field_type;
pub mod trace;

pub use field::{FieldArena, FieldId, FieldNode, FieldValue};
pub use field_type::{
    ArrayFieldType, ByteOrder, DisplayBase, EnumerationFieldType, EnumerationRange,
    FieldTypeId, FieldTypeKind, FloatFieldType, IntegerFieldType, LengthRef, Meaning,
    SequenceFieldType, StringEncoding, StringFieldType, StructureFieldType, TagRef, TypeArena,
    VariantFieldType,
};
pub use trace::{ClockType, EnvValue, EventClass, StreamClass, Trace};
