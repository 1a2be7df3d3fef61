//! Field paths: the resolved `(root-scope, indices)` addressing scheme used
//! by sequence lengths and variant tags to name another field in the same
//! packet.

use derive_more::Display;

/// One of the six name-addressable dynamic scopes a field path can root at.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Display)]
pub enum Scope {
    #[display("packet-header")]
    PacketHeader,
    #[display("packet-context")]
    PacketContext,
    #[display("event-header")]
    EventHeader,
    #[display("stream-event-context")]
    StreamEventContext,
    #[display("event-context")]
    EventContext,
    #[display("event-payload")]
    EventPayload,
}

impl Scope {
    /// The fixed fallback order used by the relative-path resolver (4.C step 3).
    pub const ORDER: [Scope; 6] = [
        Scope::PacketHeader,
        Scope::PacketContext,
        Scope::EventHeader,
        Scope::StreamEventContext,
        Scope::EventContext,
        Scope::EventPayload,
    ];
}

/// One step of a field path: either a concrete structure/variant member
/// index, or the *current-element* sentinel used to descend into an
/// array/sequence's element type without consuming a path token.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum PathIndex {
    Index(usize),
    CurrentElement,
}

/// A resolved reference to a field type reachable from a dynamic scope root.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct FieldPath {
    pub root: Scope,
    pub indices: Vec<PathIndex>,
}

impl FieldPath {
    pub fn new(root: Scope, indices: Vec<PathIndex>) -> Self {
        FieldPath { root, indices }
    }
}
