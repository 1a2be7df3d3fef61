//! Notification Iterator (component F, §4.F): the outer state machine that
//! drives the BTR across packet header, packet context, event header,
//! contexts and payload, stitching in default-clock reconstruction,
//! stored-value bookkeeping and packet switching.

use crate::btr::{self, BinaryTypeReader, Callbacks};
use crate::error::Error;
use crate::ir::field::{FieldArena, FieldId};
use crate::ir::field_type::{FieldTypeId, FieldTypeKind, IntegerFieldType, Meaning, TypeArena};
use crate::ir::trace::Trace;
use crate::medium::{Medium, MediumStatus};
use crate::path::{FieldPath, PathIndex, Scope};
use tracing::{debug, trace, warn};

const MAGIC: u32 = 0xC1FC_1FC1;
const REQUEST_CHUNK: usize = 4096;

/// One field-producing event seen by a consumer.
#[derive(Clone, Debug)]
pub struct EventNotification {
    pub event_class_id: u64,
    pub default_clock_value: Option<u64>,
    pub stream_event_context: Option<FieldId>,
    pub event_context: Option<FieldId>,
    pub payload: FieldId,
}

#[derive(Clone, Debug)]
pub enum Notification {
    StreamBegin { stream_class_id: u64, stream_id: i64 },
    PacketBegin { packet_index: u64 },
    Event(EventNotification),
    PacketEnd { packet_index: u64 },
    StreamEnd,
}

/// What one call to [`NotificationIterator::advance`] produced.
pub enum Advance {
    Notification(Notification),
    /// The medium has no bytes ready right now; call `advance` again later.
    Again,
    /// The medium is cleanly exhausted and every open stream/packet has been
    /// closed out.
    Done,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum State {
    Init,
    DecodingPacketHeader,
    DecodingPacketContext,
    DecodingEventHeader,
    DecodingEventCommonContext,
    DecodingEventSpecContext,
    DecodingEventPayload,
    EmitNewStream,
    EmitNewPacket,
    EmitEvent,
    EmitEndOfPacket,
    SkippingPadding,
    EmitEndOfStream,
    Done,
}

#[derive(Default)]
struct PacketMeta {
    stream_class_id: Option<u64>,
    data_stream_id: i64,
    total_size_bits: Option<u64>,
    content_size_bits: Option<u64>,
    begin_time: Option<u64>,
    end_time: Option<u64>,
    counter: Option<u64>,
    discarded_event_counter: Option<u64>,
}

#[derive(Default)]
struct EventMeta {
    event_class_id: Option<u64>,
}

struct FieldFrame {
    field_id: FieldId,
    next_index: usize,
    is_text: bool,
    text_stopped: bool,
}

/// Drives a [`Medium`] through one trace's worth of packets, yielding
/// [`Notification`]s. Owns the `Trace` IR, the live `FieldArena`, and every
/// piece of cross-field bookkeeping (stored values, default clock) the
/// callback routing needs.
pub struct NotificationIterator<M: Medium> {
    trace: Trace,
    medium: M,
    state: State,
    btr: Option<BinaryTypeReader>,
    field_arena: FieldArena,
    stored_values: Vec<Option<i64>>,
    default_clock: u64,
    packet_index: u64,
    packet_meta: PacketMeta,
    event_meta: EventMeta,

    // Live scope roots for the packet/event currently being decoded.
    packet_header_root: Option<FieldId>,
    packet_context_root: Option<FieldId>,
    event_header_root: Option<FieldId>,
    stream_event_context_root: Option<FieldId>,
    event_context_root: Option<FieldId>,
    event_payload_root: Option<FieldId>,

    // BTR callback routing state, valid only while a BTR walk is in flight.
    field_stack: Vec<FieldFrame>,
    pending_string: Option<FieldId>,
    pending_variant_selection: Option<(usize, FieldTypeId)>,

    stream_begun: bool,
    /// Stream class every packet in this data stream must agree on (§4.F
    /// "Packet switching"); set by the first packet's context.
    locked_stream_class_id: Option<u64>,
    /// Bits still to discard between `content_size_bits` and
    /// `total_size_bits` before the next packet's header can start.
    padding_remaining_bits: u64,
    /// Running absolute bit offset within the current packet. Survives
    /// across dscopes (each dscope's BTR is seeded from it and, once that
    /// dscope finishes, `self.btr` is dropped back to `None` so the next
    /// dscope's `begin_scope`/`start_btr` actually runs) — this is the
    /// single source of truth `content_boundary`/`begin_padding_skip` read,
    /// rather than reaching into a `self.btr` that may already be gone.
    cursor_bits: u64,
}

/// Where the BTR's cumulative bit offset sits relative to the packet's
/// declared content size (§4.F "End-of-content detection").
enum ContentBoundary {
    NotYet,
    AtEnd,
    Exceeded(u64, u64),
}

enum PumpResult {
    Done,
    Again,
    /// The medium cleanly ran out of bytes before this dscope's BTR
    /// consumed anything — a legitimate stream boundary, not an error.
    StreamExhausted,
}

impl<M: Medium> NotificationIterator<M> {
    pub fn new(trace: Trace, medium: M) -> Self {
        let num_stored_values = trace.num_stored_values;
        NotificationIterator {
            trace,
            medium,
            state: State::Init,
            btr: None,
            field_arena: FieldArena::new(),
            stored_values: vec![None; num_stored_values],
            default_clock: 0,
            packet_index: 0,
            packet_meta: PacketMeta::default(),
            event_meta: EventMeta::default(),
            packet_header_root: None,
            packet_context_root: None,
            event_header_root: None,
            stream_event_context_root: None,
            event_context_root: None,
            event_payload_root: None,
            field_stack: Vec::new(),
            pending_string: None,
            pending_variant_selection: None,
            stream_begun: false,
            locked_stream_class_id: None,
            padding_remaining_bits: 0,
            cursor_bits: 0,
        }
    }

    pub fn fields(&self) -> &FieldArena {
        &self.field_arena
    }

    /// Exposes the underlying medium so an async caller can top it up (e.g.
    /// awaiting more bytes onto an [`crate::medium::AsyncReadMedium`]) in
    /// between `Advance::Again` results (§4.G "dual sync/async ergonomics").
    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    fn stream_class(&self) -> Option<&crate::ir::trace::StreamClass> {
        let id = self.packet_meta.stream_class_id.unwrap_or(0);
        self.trace.stream_class(id)
    }

    fn event_class(&self) -> Option<&crate::ir::trace::EventClass> {
        let id = self.event_meta.event_class_id?;
        self.stream_class()?.event_class(id)
    }

    /// Advances the state machine by exactly one notification-worth of
    /// work. Non-blocking: returns `Advance::Again` the instant the medium
    /// reports it has nothing ready.
    pub fn advance(&mut self) -> Result<Advance, Error> {
        loop {
            match self.state {
                State::Init => {
                    self.cursor_bits = 0;
                    self.begin_scope(Scope::PacketHeader)?;
                    self.start_btr(self.trace.packet_header)?;
                    self.state = State::DecodingPacketHeader;
                }
                State::DecodingPacketHeader => match self.pump()? {
                    PumpResult::Again => return Ok(Advance::Again),
                    PumpResult::StreamExhausted => {
                        self.state = if self.stream_begun {
                            State::EmitEndOfStream
                        } else {
                            State::Done
                        };
                    }
                    PumpResult::Done => {
                        self.state = if self.stream_begun {
                            State::EmitNewPacket
                        } else {
                            State::EmitNewStream
                        };
                    }
                },
                State::EmitNewStream => {
                    self.stream_begun = true;
                    let stream_class_id = self.packet_meta.stream_class_id.unwrap_or(0);
                    let stream_id = self.packet_meta.data_stream_id;
                    self.state = State::EmitNewPacket;
                    return Ok(Advance::Notification(Notification::StreamBegin {
                        stream_class_id,
                        stream_id,
                    }));
                }
                State::EmitNewPacket => {
                    self.state = State::DecodingPacketContext;
                    return Ok(Advance::Notification(Notification::PacketBegin {
                        packet_index: self.packet_index,
                    }));
                }
                State::DecodingPacketContext => {
                    if self.btr.is_none() {
                        self.begin_scope(Scope::PacketContext)?;
                        let ty = self.stream_class().and_then(|sc| sc.packet_context);
                        self.start_btr(ty)?;
                    }
                    match self.pump()? {
                        PumpResult::Again => return Ok(Advance::Again),
                        PumpResult::Done => {
                            self.finish_packet_context()?;
                            self.state = State::DecodingEventHeader;
                        }
                        PumpResult::StreamExhausted => unreachable!(
                            "pump only reports a clean stream end while decoding a packet header"
                        ),
                    }
                }
                State::DecodingEventHeader => {
                    match self.content_boundary() {
                        ContentBoundary::AtEnd => {
                            self.begin_padding_skip();
                            self.state = State::SkippingPadding;
                            continue;
                        }
                        ContentBoundary::Exceeded(offset, content) => {
                            return Err(Error::DecodedPastContentEnd { offset, content });
                        }
                        ContentBoundary::NotYet => {}
                    }
                    if self.btr.is_none() {
                        self.begin_scope(Scope::EventHeader)?;
                        let ty = self.stream_class().and_then(|sc| sc.event_header);
                        self.start_btr(ty)?;
                    }
                    match self.pump()? {
                        PumpResult::Again => return Ok(Advance::Again),
                        PumpResult::Done => {
                            self.finish_event_header()?;
                            self.state = State::DecodingEventCommonContext;
                        }
                        PumpResult::StreamExhausted => unreachable!(
                            "pump only reports a clean stream end while decoding a packet header"
                        ),
                    }
                }
                State::DecodingEventCommonContext => {
                    if self.btr.is_none() {
                        self.begin_scope(Scope::StreamEventContext)?;
                        let ty = self.stream_class().and_then(|sc| sc.event_context);
                        self.start_btr(ty)?;
                    }
                    match self.pump()? {
                        PumpResult::Again => return Ok(Advance::Again),
                        PumpResult::Done => self.state = State::DecodingEventSpecContext,
                        PumpResult::StreamExhausted => unreachable!(
                            "pump only reports a clean stream end while decoding a packet header"
                        ),
                    }
                }
                State::DecodingEventSpecContext => {
                    if self.btr.is_none() {
                        self.begin_scope(Scope::EventContext)?;
                        let ty = self.event_class().and_then(|ec| ec.context);
                        self.start_btr(ty)?;
                    }
                    match self.pump()? {
                        PumpResult::Again => return Ok(Advance::Again),
                        PumpResult::Done => self.state = State::DecodingEventPayload,
                        PumpResult::StreamExhausted => unreachable!(
                            "pump only reports a clean stream end while decoding a packet header"
                        ),
                    }
                }
                State::DecodingEventPayload => {
                    if self.btr.is_none() {
                        self.begin_scope(Scope::EventPayload)?;
                        let ty = self.event_class().map(|ec| ec.payload);
                        self.start_btr(ty)?;
                    }
                    match self.pump()? {
                        PumpResult::Again => return Ok(Advance::Again),
                        PumpResult::Done => self.state = State::EmitEvent,
                        PumpResult::StreamExhausted => unreachable!(
                            "pump only reports a clean stream end while decoding a packet header"
                        ),
                    }
                }
                State::EmitEvent => {
                    self.state = State::DecodingEventHeader;
                    let notification = EventNotification {
                        event_class_id: self.event_meta.event_class_id.unwrap_or(0),
                        default_clock_value: Some(self.default_clock),
                        stream_event_context: self.stream_event_context_root,
                        event_context: self.event_context_root,
                        payload: self
                            .event_payload_root
                            .ok_or(Error::UnknownTypeReference("missing event payload".into()))?,
                    };
                    return Ok(Advance::Notification(Notification::Event(notification)));
                }
                State::SkippingPadding => match self.pump_padding()? {
                    PumpResult::Again => return Ok(Advance::Again),
                    PumpResult::Done => self.state = State::EmitEndOfPacket,
                    PumpResult::StreamExhausted => {
                        unreachable!("padding skip never reports a clean stream end")
                    }
                },
                State::EmitEndOfPacket => {
                    self.btr = None;
                    self.state = State::Init;
                    let idx = self.packet_index;
                    self.packet_index += 1;
                    self.packet_meta = PacketMeta::default();
                    self.event_meta = EventMeta::default();
                    return Ok(Advance::Notification(Notification::PacketEnd {
                        packet_index: idx,
                    }));
                }
                State::EmitEndOfStream => {
                    self.state = State::Done;
                    return Ok(Advance::Notification(Notification::StreamEnd));
                }
                State::Done => return Ok(Advance::Done),
            }
        }
    }

    fn content_boundary(&self) -> ContentBoundary {
        match self.packet_meta.content_size_bits {
            Some(content) => {
                let offset = self.cursor_bits;
                if offset == content {
                    ContentBoundary::AtEnd
                } else if offset > content {
                    ContentBoundary::Exceeded(offset, content)
                } else {
                    ContentBoundary::NotYet
                }
            }
            None => ContentBoundary::NotYet,
        }
    }

    /// §4.F "Packet switching" + "Content/size reconciliation": validates
    /// the just-decoded packet context against the trace's stream classes
    /// and this data stream's prior packets, and fills in a missing content
    /// size from the total size.
    fn finish_packet_context(&mut self) -> Result<(), Error> {
        let stream_class_id = self.packet_meta.stream_class_id.unwrap_or(0);
        if self.trace.stream_class(stream_class_id).is_none() {
            return Err(Error::UnknownStreamClassId(stream_class_id));
        }
        match self.locked_stream_class_id {
            Some(expected) if expected != stream_class_id => {
                return Err(Error::StreamClassMismatch {
                    expected,
                    found: stream_class_id,
                });
            }
            Some(_) => {}
            None => self.locked_stream_class_id = Some(stream_class_id),
        }
        if self.packet_meta.data_stream_id < 0 {
            return Err(Error::AmbiguousDataStreamInstance);
        }
        if let Some(total) = self.packet_meta.total_size_bits {
            if total % 8 != 0 {
                return Err(Error::PacketNotByteAligned(total));
            }
        }
        if let (None, Some(content)) = (self.packet_meta.total_size_bits, self.packet_meta.content_size_bits) {
            return Err(Error::ContentSizeWithoutTotalSize(content));
        }
        if self.packet_meta.content_size_bits.is_none() {
            self.packet_meta.content_size_bits = self.packet_meta.total_size_bits;
        }
        if let (Some(content), Some(total)) = (
            self.packet_meta.content_size_bits,
            self.packet_meta.total_size_bits,
        ) {
            if content > total {
                return Err(Error::ContentSizeExceedsTotalSize { content, total });
            }
        }
        Ok(())
    }

    /// §4.F "Event dispatch": once the event header's `id` (if any) has been
    /// decoded, the event class it names must actually exist in the locked
    /// stream class — an id with no matching event class is an invalid-stream
    /// condition, not a silently-absent payload.
    fn finish_event_header(&mut self) -> Result<(), Error> {
        let stream_class_id = self.packet_meta.stream_class_id.unwrap_or(0);
        let event_id = self.event_meta.event_class_id.unwrap_or(0);
        let sc = self
            .trace
            .stream_class(stream_class_id)
            .ok_or(Error::UnknownStreamClassId(stream_class_id))?;
        if sc.event_class(event_id).is_none() {
            return Err(Error::UnknownEventClassId(event_id, stream_class_id));
        }
        // Bank the (possibly defaulted) id so `event_class()` resolves for
        // the rest of this event even when the header carries no `id` field.
        self.event_meta.event_class_id = Some(event_id);
        Ok(())
    }

    fn begin_padding_skip(&mut self) {
        let offset = self.cursor_bits;
        let total = self.packet_meta.total_size_bits.unwrap_or(offset);
        self.padding_remaining_bits = total.saturating_sub(offset);
    }

    /// Discards the padding between the last decoded field and the packet's
    /// declared total size, pulling bytes straight from the medium so the
    /// next packet's header starts on its own boundary.
    fn pump_padding(&mut self) -> Result<PumpResult, Error> {
        if self.padding_remaining_bits == 0 {
            return Ok(PumpResult::Done);
        }
        loop {
            let want = ((self.padding_remaining_bits + 7) / 8)
                .min(REQUEST_CHUNK as u64)
                .max(1) as usize;
            match self.medium.request_bytes(want) {
                MediumStatus::Again => return Ok(PumpResult::Again),
                MediumStatus::Eof => return Err(Error::EofMidField),
                MediumStatus::Error(e) => return Err(Error::Medium(e)),
                MediumStatus::Ok { addr } => {
                    let consumed_bits = addr.len() as u64 * 8;
                    self.padding_remaining_bits =
                        self.padding_remaining_bits.saturating_sub(consumed_bits);
                }
            }
            if self.padding_remaining_bits == 0 {
                return Ok(PumpResult::Done);
            }
        }
    }

    fn begin_scope(&mut self, scope: Scope) -> Result<(), Error> {
        let root = match scope {
            Scope::PacketHeader => self.trace.packet_header,
            Scope::PacketContext => self.stream_class().and_then(|sc| sc.packet_context),
            Scope::EventHeader => self.stream_class().and_then(|sc| sc.event_header),
            Scope::StreamEventContext => self.stream_class().and_then(|sc| sc.event_context),
            Scope::EventContext => self.event_class().and_then(|ec| ec.context),
            Scope::EventPayload => self.event_class().map(|ec| ec.payload),
        };
        let field_id = root.map(|ty| self.field_arena.instantiate(&self.trace.type_arena, ty));
        match scope {
            Scope::PacketHeader => self.packet_header_root = field_id,
            Scope::PacketContext => self.packet_context_root = field_id,
            Scope::EventHeader => self.event_header_root = field_id,
            Scope::StreamEventContext => self.stream_event_context_root = field_id,
            Scope::EventContext => self.event_context_root = field_id,
            Scope::EventPayload => self.event_payload_root = field_id,
        }
        Ok(())
    }

    fn scope_field_root(&self, scope: Scope) -> Option<FieldId> {
        match scope {
            Scope::PacketHeader => self.packet_header_root,
            Scope::PacketContext => self.packet_context_root,
            Scope::EventHeader => self.event_header_root,
            Scope::StreamEventContext => self.stream_event_context_root,
            Scope::EventContext => self.event_context_root,
            Scope::EventPayload => self.event_payload_root,
        }
    }

    fn scope_type_root(&self, scope: Scope) -> Option<FieldTypeId> {
        match scope {
            Scope::PacketHeader => self.trace.packet_header,
            Scope::PacketContext => self.stream_class().and_then(|sc| sc.packet_context),
            Scope::EventHeader => self.stream_class().and_then(|sc| sc.event_header),
            Scope::StreamEventContext => self.stream_class().and_then(|sc| sc.event_context),
            Scope::EventContext => self.event_class().and_then(|ec| ec.context),
            Scope::EventPayload => self.event_class().map(|ec| ec.payload),
        }
    }

    fn type_at_path(&self, path: &FieldPath) -> Option<FieldTypeId> {
        let mut ty = self.scope_type_root(path.root)?;
        for idx in &path.indices {
            ty = match idx {
                PathIndex::Index(i) => self.trace.type_arena.field_at_index(ty, *i)?,
                PathIndex::CurrentElement => self.trace.type_arena.field_at_index(ty, 0)?,
            };
        }
        Some(ty)
    }

    fn stored_value_for(&self, path: &FieldPath) -> Result<i64, Error> {
        let ty = self
            .type_at_path(path)
            .ok_or_else(|| Error::UnknownTypeReference(format!("unresolved path rooted at {}", path.root)))?;
        let idx = match self.trace.type_arena.kind(ty) {
            FieldTypeKind::Integer(i) => i.stored_value_index,
            FieldTypeKind::Enumeration(e) => e.container.stored_value_index,
            _ => None,
        }
        .ok_or_else(|| Error::UnknownTypeReference("path does not reference a stored value".into()))?;
        self.stored_values
            .get(idx)
            .copied()
            .flatten()
            .ok_or(Error::UnknownTypeReference("stored value not yet decoded".into()))
    }

    /// Starts a fresh dscope decode seeded from `self.cursor_bits`, or marks
    /// no decode needed if this metadata has no field type for the dscope.
    /// Must only be called while `self.btr` is `None` — i.e. once per dscope,
    /// right after the previous one finished and `pump` dropped its BTR.
    fn start_btr(&mut self, ty: Option<FieldTypeId>) -> Result<(), Error> {
        self.field_stack.clear();
        self.pending_string = None;
        self.pending_variant_selection = None;
        match ty {
            Some(ty) => {
                self.btr = Some(BinaryTypeReader::new(ty, self.cursor_bits));
            }
            None => {
                // Dscope not present in this metadata: nothing to decode.
                self.btr = None;
            }
        }
        Ok(())
    }

    fn pump(&mut self) -> Result<PumpResult, Error> {
        let Some(btr) = self.btr.as_ref() else {
            return Ok(PumpResult::Done);
        };
        if btr.is_done() {
            self.btr = None;
            return Ok(PumpResult::Done);
        }
        loop {
            let status = self.medium.request_bytes(REQUEST_CHUNK);
            let chunk: Vec<u8> = match status {
                MediumStatus::Again => return Ok(PumpResult::Again),
                MediumStatus::Eof => {
                    let started = self.btr.as_ref().map(|b| b.has_started()).unwrap_or(false);
                    return if self.state == State::DecodingPacketHeader && !started {
                        Ok(PumpResult::StreamExhausted)
                    } else {
                        Err(Error::EofMidField)
                    };
                }
                MediumStatus::Error(e) => return Err(Error::Medium(e)),
                MediumStatus::Ok { addr } => addr.to_vec(),
            };
            let mut btr = self.btr.take().expect("pump requires an active btr");
            let res = btr.step(&chunk, self)?;
            match res.status {
                btr::Status::Ok => {
                    // This dscope is fully decoded: bank its end offset as
                    // the running packet cursor and drop the BTR so the next
                    // dscope's `if self.btr.is_none()` guard fires and a
                    // fresh one gets seeded from `cursor_bits`.
                    self.cursor_bits = btr.absolute_bit_offset();
                    self.btr = None;
                    return Ok(PumpResult::Done);
                }
                btr::Status::Eof => {
                    self.btr = Some(btr);
                    continue;
                }
            }
        }
    }

    fn child_field_for(&mut self, ty: FieldTypeId) -> FieldId {
        if let Some(top) = self.field_stack.last() {
            let parent_id = top.field_id;
            let idx = top.next_index;
            let parent_ty = self.field_arena.get(parent_id).ty;
            match self.trace.type_arena.kind(parent_ty) {
                FieldTypeKind::Sequence(_) => {
                    self.field_arena
                        .sequence_push_default(&self.trace.type_arena, parent_id, ty)
                }
                _ => self
                    .field_arena
                    .child_at_index(parent_id, idx)
                    .expect("BTR and Field IR walked the same shape"),
            }
        } else {
            // No enclosing frame: `ty` is the dscope root itself.
            match ty {
                _ if Some(ty) == self.scope_type_root(Scope::PacketHeader) => self
                    .packet_header_root
                    .expect("packet header root must be instantiated before decoding"),
                _ if Some(ty) == self.scope_type_root(Scope::PacketContext) => self
                    .packet_context_root
                    .expect("packet context root must be instantiated before decoding"),
                _ if Some(ty) == self.scope_type_root(Scope::EventHeader) => self
                    .event_header_root
                    .expect("event header root must be instantiated before decoding"),
                _ if Some(ty) == self.scope_type_root(Scope::StreamEventContext) => self
                    .stream_event_context_root
                    .expect("stream event context root must be instantiated before decoding"),
                _ if Some(ty) == self.scope_type_root(Scope::EventContext) => self
                    .event_context_root
                    .expect("event context root must be instantiated before decoding"),
                _ => self
                    .event_payload_root
                    .expect("event payload root must be instantiated before decoding"),
            }
        }
    }

    fn capture_meaning(&mut self, i: &IntegerFieldType, raw: u64) -> Result<(), Error> {
        if let Some(idx) = i.stored_value_index {
            if idx >= self.stored_values.len() {
                self.stored_values.resize(idx + 1, None);
            }
            self.stored_values[idx] = Some(raw as i64);
        }
        match i.meaning {
            Meaning::None => {}
            Meaning::Magic => {
                if raw as u32 != MAGIC {
                    warn!(found = raw as u32, "packet magic mismatch");
                    return Err(Error::MagicMismatch {
                        expected: MAGIC,
                        found: raw as u32,
                    });
                }
            }
            Meaning::StreamClassId => self.packet_meta.stream_class_id = Some(raw),
            Meaning::DataStreamId => self.packet_meta.data_stream_id = raw as i64,
            Meaning::PacketTotalSize => self.packet_meta.total_size_bits = Some(raw),
            Meaning::PacketContentSize => self.packet_meta.content_size_bits = Some(raw),
            Meaning::PacketBeginTime => self.packet_meta.begin_time = Some(raw),
            Meaning::PacketEndTime => self.packet_meta.end_time = Some(raw),
            Meaning::PacketCounter => self.packet_meta.counter = Some(raw),
            Meaning::DiscardedEventCounter => self.packet_meta.discarded_event_counter = Some(raw),
            Meaning::EventClassId => self.event_meta.event_class_id = Some(raw),
        }
        if let Some(size_bits) = i.mapped_clock.map(|_| i.size_bits) {
            self.update_default_clock(size_bits, raw);
        }
        Ok(())
    }

    /// §8 clock-wrap boundary behavior: a lower value than last seen in the
    /// mapped bit width means the hardware counter wrapped, so the next
    /// higher bit range must be bumped.
    fn update_default_clock(&mut self, size_bits: u8, v: u64) {
        if size_bits >= 64 {
            self.default_clock = v;
            return;
        }
        let mask = (1u64 << size_bits) - 1;
        let low = self.default_clock & mask;
        let mut new_clock = (self.default_clock & !mask) | (v & mask);
        if v < low {
            new_clock = new_clock.wrapping_add(1u64 << size_bits);
        }
        self.default_clock = new_clock;
    }

    fn route_integer(&mut self, ty: FieldTypeId, raw: i64, is_signed: bool) -> Result<(), Error> {
        if let Some(top) = self.field_stack.last() {
            if top.is_text {
                unreachable!("text-compound bytes always arrive via unsigned_int's text branch");
            }
        }
        let field_id = self.child_field_for(ty);
        let kind = self.trace.type_arena.kind(ty).clone();
        match &kind {
            FieldTypeKind::Enumeration(e) => {
                let label = e.label_for(raw).map(|l| l.as_str().to_owned());
                self.field_arena.set_enumeration(field_id, raw, label);
                self.capture_meaning(&e.container, raw as u64)?;
            }
            FieldTypeKind::Integer(i) => {
                if is_signed {
                    self.field_arena.set_signed(field_id, raw);
                } else {
                    self.field_arena.set_unsigned(field_id, raw as u64);
                }
                self.capture_meaning(i, raw as u64)?;
            }
            _ => unreachable!("route_integer called for a non-integer field type"),
        }
        if let Some(top) = self.field_stack.last_mut() {
            top.next_index += 1;
        }
        Ok(())
    }
}

impl<M: Medium> Callbacks for NotificationIterator<M> {
    fn type_arena(&self) -> &TypeArena {
        &self.trace.type_arena
    }

    fn signed_int(&mut self, ty: FieldTypeId, v: i64) -> Result<(), Error> {
        self.route_integer(ty, v, true)
    }

    fn unsigned_int(&mut self, ty: FieldTypeId, v: u64) -> Result<(), Error> {
        if let Some(top) = self.field_stack.last_mut() {
            if top.is_text {
                let stopped = self.field_arena.append_text_byte(top.field_id, v as u8, top.text_stopped);
                top.text_stopped = stopped;
                return Ok(());
            }
        }
        self.route_integer(ty, v as i64, false)
    }

    fn floating_point(&mut self, ty: FieldTypeId, v: f64) -> Result<(), Error> {
        let field_id = self.child_field_for(ty);
        self.field_arena.set_real(field_id, v);
        if let Some(top) = self.field_stack.last_mut() {
            top.next_index += 1;
        }
        Ok(())
    }

    fn string_begin(&mut self, ty: FieldTypeId) -> Result<(), Error> {
        if matches!(self.trace.type_arena.kind(ty), FieldTypeKind::String(_)) {
            let field_id = self.child_field_for(ty);
            self.pending_string = Some(field_id);
        }
        Ok(())
    }

    fn string_chunk(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if let Some(id) = self.pending_string {
            self.field_arena.append_string_chunk(id, bytes);
        }
        Ok(())
    }

    fn string_end(&mut self) -> Result<(), Error> {
        if self.pending_string.take().is_some() {
            if let Some(top) = self.field_stack.last_mut() {
                top.next_index += 1;
            }
        }
        Ok(())
    }

    fn compound_begin(&mut self, ty: FieldTypeId) -> Result<(), Error> {
        let is_text = self.trace.type_arena.kind(ty).is_text_compound(&self.trace.type_arena);
        let field_id = self.child_field_for(ty);
        if let Some((idx, opt_ty)) = self.pending_variant_selection.take() {
            self.field_arena
                .select_variant_option(&self.trace.type_arena, field_id, idx, opt_ty);
        }
        trace!(ty, field_id, is_text, "compound_begin");
        self.field_stack.push(FieldFrame {
            field_id,
            next_index: 0,
            is_text,
            text_stopped: false,
        });
        Ok(())
    }

    fn compound_end(&mut self, ty: FieldTypeId) -> Result<(), Error> {
        trace!(ty, "compound_end");
        self.field_stack.pop();
        if let Some(top) = self.field_stack.last_mut() {
            top.next_index += 1;
        }
        Ok(())
    }

    fn sequence_length(&mut self, ty: FieldTypeId) -> Result<i64, Error> {
        let length = match self.trace.type_arena.kind(ty) {
            FieldTypeKind::Sequence(s) => s.length.clone(),
            _ => return Err(Error::UnknownTypeReference("not a sequence".into())),
        };
        match length {
            crate::ir::field_type::LengthRef::Resolved(path) => self.stored_value_for(&path),
            crate::ir::field_type::LengthRef::Unresolved(name) => {
                Err(Error::UnknownTypeReference(name))
            }
        }
    }

    fn variant_selected_type(&mut self, ty: FieldTypeId) -> Result<Option<FieldTypeId>, Error> {
        let variant = match self.trace.type_arena.kind(ty) {
            FieldTypeKind::Variant(v) => v.clone(),
            _ => return Err(Error::UnknownTypeReference("not a variant".into())),
        };
        let (path, tag_ty) = match &variant.tag {
            crate::ir::field_type::TagRef::Resolved { path, tag_type } => (path.clone(), *tag_type),
            crate::ir::field_type::TagRef::Unresolved(name) => {
                return Err(Error::UnknownTypeReference(name.clone()))
            }
        };
        let tag_value = self.stored_value_for(&path)?;
        let enumeration = match self.trace.type_arena.kind(tag_ty) {
            FieldTypeKind::Enumeration(e) => e.clone(),
            _ => return Err(Error::VariantTargetNotEnumeration(path.root.to_string())),
        };
        let label = enumeration
            .label_for(tag_value)
            .ok_or(Error::LabelNotInEnumeration(tag_value))?;
        let option_index = variant
            .index_of(label.as_str())
            .ok_or_else(|| Error::UnknownTypeReference(format!("variant has no option '{label}'")))?;
        let option_ty = variant.options[option_index].1;
        self.pending_variant_selection = Some((option_index, option_ty));
        debug!(tag_value, %label, option_index, "variant selected");
        Ok(Some(option_ty))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::field::FieldValue;
    use crate::ir::field_type::{ByteOrder, DisplayBase, StringEncoding, StructureFieldType};
    use crate::ir::trace::StreamClass;
    use crate::medium::SliceMedium;
    use fxhash::FxHashMap;
    use internment::Intern;

    fn uint(arena: &mut TypeArena, size: u8, meaning: Meaning) -> FieldTypeId {
        arena.insert(FieldTypeKind::Integer(IntegerFieldType {
            size_bits: size,
            signed: false,
            byte_order: ByteOrder::BigEndian,
            display_base: DisplayBase::default(),
            encoding: StringEncoding::default(),
            alignment: IntegerFieldType::default_alignment(size),
            mapped_clock: None,
            meaning,
            stored_value_index: None,
        }))
    }

    /// A minimal trace: no packet header/context, a single stream class with
    /// one event class whose payload is a lone `u8`. Exercises the state
    /// machine's skip-absent-dscope path plus one full event decode.
    #[test]
    fn decodes_one_event_with_no_header_or_context() {
        let mut arena = TypeArena::new();
        let byte_field = uint(&mut arena, 8, Meaning::None);
        let payload = arena.insert(FieldTypeKind::Structure(StructureFieldType {
            members: vec![(Intern::new("value".to_owned()), byte_field)],
            alignment: 8,
        }));

        let event_class = crate::ir::trace::EventClass {
            id: 0,
            name: Intern::new("evt".to_owned()),
            context: None,
            payload,
        };
        let mut event_classes = FxHashMap::default();
        event_classes.insert(0, event_class);
        let stream_class = StreamClass {
            id: 0,
            packet_context: None,
            event_header: None,
            event_context: None,
            event_classes,
        };
        let mut stream_classes = FxHashMap::default();
        stream_classes.insert(0, stream_class);

        let trace = Trace {
            type_arena: arena,
            byte_order: ByteOrder::BigEndian,
            major: 1,
            minor: 8,
            uuid: None,
            packet_header: None,
            clock: None,
            env: FxHashMap::default(),
            stream_classes,
            num_stored_values: 0,
        };

        let medium = SliceMedium::new(&[0x2A]);
        let mut it = NotificationIterator::new(trace, medium);
        it.packet_meta.stream_class_id = Some(0);
        it.event_meta.event_class_id = Some(0);

        // Drive straight to DecodingEventPayload by hand, since there's no
        // packet header/context to consume first.
        it.state = State::DecodingEventPayload;

        let notif = loop {
            match it.advance().unwrap() {
                Advance::Notification(n @ Notification::Event(_)) => break n,
                Advance::Notification(_) => continue,
                Advance::Again => panic!("SliceMedium never returns Again"),
                Advance::Done => panic!("expected an event notification"),
            }
        };

        match notif {
            Notification::Event(e) => {
                let payload_field = it.fields().get(e.payload);
                match &payload_field.value {
                    FieldValue::Structure(children) => {
                        let byte = it.fields().get(children[0]);
                        assert_eq!(byte.value, FieldValue::UnsignedInteger(0x2A));
                    }
                    other => panic!("expected a structure, got {other:?}"),
                }
            }
            _ => unreachable!(),
        }
    }

    /// §8's clock-wrap scenario: a 27-bit mapped clock that rolls over from
    /// `0x7FFFFFF` to `0x0000001` must reconstruct to `0x08000001`, not wrap
    /// back down to `1`.
    #[test]
    fn default_clock_wraps_correctly() {
        let trace = Trace {
            type_arena: TypeArena::new(),
            byte_order: ByteOrder::BigEndian,
            major: 1,
            minor: 8,
            uuid: None,
            packet_header: None,
            clock: None,
            env: FxHashMap::default(),
            stream_classes: FxHashMap::default(),
            num_stored_values: 0,
        };
        let medium = SliceMedium::new(&[]);
        let mut it = NotificationIterator::new(trace, medium);
        it.default_clock = 0x7FFF_FFF;
        it.update_default_clock(27, 0x1);
        assert_eq!(it.default_clock, 0x0800_0001);
    }
}
