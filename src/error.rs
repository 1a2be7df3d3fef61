use std::io;
use thiserror::Error;

/// The fatal error kinds a resolver or decoder can surface. `again` and `eof`
/// are modeled separately (see [`crate::iterator::Advance`]) as non-fatal
/// status codes, not exceptions.
#[derive(Debug, Error)]
pub enum Error {
    // --- invalid-metadata ---
    #[error("metadata is missing the mandatory attribute '{0}'")]
    MissingAttribute(&'static str),

    #[error("metadata declares the attribute '{0}' more than once")]
    DuplicateAttribute(&'static str),

    #[error("metadata references an unknown scope in path '{0}'")]
    UnknownScope(String),

    #[error("enumeration container type must be an integer")]
    EnumContainerNotInteger,

    #[error("variant tag '{0}' does not resolve to an enumeration type")]
    VariantTargetNotEnumeration(String),

    #[error("sequence length '{0}' does not resolve to an unsigned integer type")]
    SequenceTargetNotUnsigned(String),

    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(u32),

    #[error("integer size {0} is out of the supported range 1..=64")]
    IntegerSizeOutOfRange(usize),

    #[error("trace byte_order cannot be 'native'")]
    NativeByteOrderAtTrace,

    #[error("metadata declares more than one 'trace' block")]
    MultipleTraceBlocks,

    #[error("declaration '{0}' collides with an existing entry in the same scope")]
    DuplicateDeclaration(String),

    #[error("unknown type reference '{0}'")]
    UnknownTypeReference(String),

    // --- invalid-stream ---
    #[error("medium reached end of stream in the middle of a field")]
    EofMidField,

    #[error("packet content size ({content}) exceeds total size ({total})")]
    ContentSizeExceedsTotalSize { content: u64, total: u64 },

    #[error("packet context declares a content size ({0}) but no total size")]
    ContentSizeWithoutTotalSize(u64),

    #[error("packet declares stream class {found} but a prior packet declared {expected}")]
    StreamClassMismatch { expected: u64, found: u64 },

    #[error("unknown stream class id {0}")]
    UnknownStreamClassId(u64),

    #[error("unknown event class id {0} in stream class {1}")]
    UnknownEventClassId(u64, u64),

    #[error("packet boundary is not byte-aligned (bit offset {0})")]
    PacketNotByteAligned(u64),

    #[error("event decoding ran past the declared content size ({offset} > {content})")]
    DecodedPastContentEnd { offset: u64, content: u64 },

    #[error("packet magic mismatch: expected {expected:#010x}, found {found:#010x}")]
    MagicMismatch { expected: u32, found: u32 },

    #[error("tag value {0} is not a member of the enumeration")]
    LabelNotInEnumeration(i64),

    #[error("negative data-stream-id (-1) with more than one data stream instance")]
    AmbiguousDataStreamInstance,

    // --- medium-error ---
    #[error("medium returned an error: {0}")]
    Medium(String),

    #[error("I/O error: {}", .0.kind())]
    Io(#[from] io::Error),

    // --- memory-error ---
    #[error("allocation failed")]
    Memory,

    // --- not-implemented ---
    #[error("'{0}' is not implemented by this core")]
    NotImplemented(&'static str),
}

impl Error {
    pub(crate) fn not_implemented(what: &'static str) -> Self {
        Error::NotImplemented(what)
    }
}
