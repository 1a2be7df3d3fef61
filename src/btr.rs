//! Binary Type Reader: a pure, resumable byte-walking
//! engine with no knowledge of CTF scopes. Walks a type tree from the Field
//! Type IR, reading bits and invoking [`Callbacks`] for primitives and
//! compound begin/end, suspending cleanly at any buffer boundary.

use crate::error::Error;
use crate::ir::field_type::{ByteOrder, FieldTypeId, FieldTypeKind, TypeArena};

/// Callbacks BTR invokes while walking a type tree. The iterator
/// implements this directly rather than going through an opaque-pointer +
/// function-table dance.
pub trait Callbacks {
    /// Gives the BTR read access to the type tree it's walking. Folded into
    /// `Callbacks` (rather than passed as a sibling argument to `step`) so a
    /// single mutable borrow of the callback receiver covers both data
    /// access and the write-back calls below.
    fn type_arena(&self) -> &TypeArena;

    fn signed_int(&mut self, ty: FieldTypeId, v: i64) -> Result<(), Error>;
    fn unsigned_int(&mut self, ty: FieldTypeId, v: u64) -> Result<(), Error>;
    fn floating_point(&mut self, ty: FieldTypeId, v: f64) -> Result<(), Error>;
    fn string_begin(&mut self, ty: FieldTypeId) -> Result<(), Error>;
    fn string_chunk(&mut self, bytes: &[u8]) -> Result<(), Error>;
    fn string_end(&mut self) -> Result<(), Error>;
    fn compound_begin(&mut self, ty: FieldTypeId) -> Result<(), Error>;
    fn compound_end(&mut self, ty: FieldTypeId) -> Result<(), Error>;
    fn sequence_length(&mut self, ty: FieldTypeId) -> Result<i64, Error>;
    fn variant_selected_type(&mut self, ty: FieldTypeId) -> Result<Option<FieldTypeId>, Error>;
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Status {
    Ok,
    Eof,
}

pub struct StepResult {
    pub bits_consumed: u64,
    pub status: Status,
}

#[derive(Debug)]
enum Frame {
    Struct {
        ty: FieldTypeId,
        next: usize,
        count: usize,
    },
    Array {
        ty: FieldTypeId,
        elem_ty: FieldTypeId,
        next: usize,
        len: usize,
    },
    Variant {
        ty: FieldTypeId,
        inner_ty: FieldTypeId,
        entered: bool,
    },
    /// The "character array/sequence" synthetic compound. Bytes are
    /// read directly without recursing through the generic primitive path.
    Text {
        ty: FieldTypeId,
        next: usize,
        len: usize,
        stopped: bool,
    },
    /// A standalone zero-terminated `String` field type.
    CStr {
        stopped: bool,
    },
}

impl Frame {
    fn ty(&self) -> FieldTypeId {
        match self {
            Frame::Struct { ty, .. }
            | Frame::Array { ty, .. }
            | Frame::Variant { ty, .. }
            | Frame::Text { ty, .. } => *ty,
            Frame::CStr { .. } => unreachable!("CStr frames have no compound bracket"),
        }
    }
}

/// The BTR's persisted state across `start`/`continue` calls: a read stack
/// of `(type, index)` frames plus a stitch buffer for atoms that span
/// buffer refills.
pub struct BinaryTypeReader {
    root_ty: FieldTypeId,
    frames: Vec<Frame>,
    root_done: bool,
    root_entered: bool,
    absolute_bit_offset: u64,
    stitch: Vec<u8>,
    stitch_bit_offset: usize,
    string_accum: Vec<u8>,
}

/// Result of attempting to read one run of bits, possibly spanning several
/// `continue` calls via the stitch buffer.
enum AtomRead {
    Value(u64),
    Pending,
}

impl BinaryTypeReader {
    pub fn new(root_ty: FieldTypeId, start_absolute_bit_offset: u64) -> Self {
        BinaryTypeReader {
            root_ty,
            frames: Vec::new(),
            root_done: false,
            root_entered: false,
            absolute_bit_offset: start_absolute_bit_offset,
            stitch: Vec::new(),
            stitch_bit_offset: 0,
            string_accum: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.root_done
    }

    /// True once this reader has consumed at least one bit, i.e. an `Eof`
    /// from the medium from this point on is a genuine mid-field truncation
    /// rather than a clean stream boundary.
    pub fn has_started(&self) -> bool {
        self.root_entered || self.root_done
    }

    pub fn absolute_bit_offset(&self) -> u64 {
        self.absolute_bit_offset
    }

    /// Feeds one buffer to the reader and walks as far as it can,
    /// returning `Eof` the moment the buffer is exhausted mid-atom (or
    /// mid-padding), or `Ok` once the whole type tree has been consumed.
    pub fn step(&mut self, buf: &[u8], cb: &mut dyn Callbacks) -> Result<StepResult, Error> {
        let start_offset = self.absolute_bit_offset;
        let mut cursor = 0usize; // bit offset within `buf`

        loop {
            if self.frames.is_empty() {
                if self.root_done {
                    return Ok(StepResult {
                        bits_consumed: self.absolute_bit_offset - start_offset,
                        status: Status::Ok,
                    });
                }
                if !self.root_entered {
                    match self.enter(self.root_ty, buf, &mut cursor, cb)? {
                        EnterOutcome::Eof => {
                            return Ok(StepResult {
                                bits_consumed: self.absolute_bit_offset - start_offset,
                                status: Status::Eof,
                            })
                        }
                        EnterOutcome::CompoundEntered => {
                            self.root_entered = true;
                            continue;
                        }
                        EnterOutcome::PrimitiveDone => {
                            self.root_done = true;
                            continue;
                        }
                    }
                }
                // frames empty, root_entered but not yet done: a primitive
                // root already completed above; nothing more to do.
                self.root_done = true;
                continue;
            }

            let top_len = self.frames.len();
            let (advance, child) = self.next_child(cb.type_arena(), top_len - 1);
            match child {
                Some(child_ty) => {
                    if advance {
                        // generic struct/array path: enter the child type
                    }
                    match self.enter(child_ty, buf, &mut cursor, cb)? {
                        EnterOutcome::Eof => {
                            return Ok(StepResult {
                                bits_consumed: self.absolute_bit_offset - start_offset,
                                status: Status::Eof,
                            })
                        }
                        EnterOutcome::CompoundEntered => continue,
                        EnterOutcome::PrimitiveDone => {
                            self.bump_parent();
                            continue;
                        }
                    }
                }
                None => {
                    // Special-cased text-frame byte stepping, or frame exhausted.
                    match self.step_frame_tail(buf, &mut cursor, cb)? {
                        FrameTailOutcome::Eof => {
                            return Ok(StepResult {
                                bits_consumed: self.absolute_bit_offset - start_offset,
                                status: Status::Eof,
                            })
                        }
                        FrameTailOutcome::Continue => continue,
                    }
                }
            }
        }
    }

    /// Determines the next child type to process for the frame at `idx`,
    /// or `None` if that frame has no generic "next child" (exhausted, or a
    /// Text/CStr frame handled specially in `step_frame_tail`).
    fn next_child(&self, arena: &TypeArena, idx: usize) -> (bool, Option<FieldTypeId>) {
        match &self.frames[idx] {
            Frame::Struct { ty, next, count } => {
                if *next >= *count {
                    (false, None)
                } else {
                    (true, arena.field_at_index(*ty, *next))
                }
            }
            Frame::Array { elem_ty, next, len, .. } => {
                if *next >= *len {
                    (false, None)
                } else {
                    (true, Some(*elem_ty))
                }
            }
            Frame::Variant { inner_ty, entered, .. } => {
                if *entered {
                    (false, None)
                } else {
                    (true, Some(*inner_ty))
                }
            }
            Frame::Text { .. } | Frame::CStr { .. } => (false, None),
        }
    }

    /// Handles frame completion (pop + compound_end) and the byte-at-a-time
    /// stepping of Text/CStr frames.
    fn step_frame_tail(
        &mut self,
        buf: &[u8],
        cursor: &mut usize,
        cb: &mut dyn Callbacks,
    ) -> Result<FrameTailOutcome, Error> {
        let idx = self.frames.len() - 1;
        match &mut self.frames[idx] {
            Frame::Text { next, len, stopped, .. } => {
                if *next >= *len {
                    cb.string_end()?;
                    let ty = self.frames.pop().unwrap().ty();
                    cb.compound_end(ty)?;
                    self.bump_parent();
                    return Ok(FrameTailOutcome::Continue);
                }
                let elem_align = 8;
                match self.try_read_bits(buf, cursor, elem_align as u8, 8, ByteOrder::BigEndian)? {
                    AtomRead::Pending => return Ok(FrameTailOutcome::Eof),
                    AtomRead::Value(v) => {
                        let byte = v as u8;
                        let was_stopped = *stopped;
                        if !was_stopped {
                            if byte == 0 {
                                *stopped = true;
                            } else {
                                let ty = self.frames[idx].ty();
                                // element type: always an 8-bit integer per
                                // is_text_compound's precondition
                                let elem_ty = match cb.type_arena().kind(ty) {
                                    FieldTypeKind::Array(a) => a.element,
                                    FieldTypeKind::Sequence(s) => s.element,
                                    _ => unreachable!(),
                                };
                                cb.unsigned_int(elem_ty, byte as u64)?;
                            }
                        }
                        if let Frame::Text { next, .. } = &mut self.frames[idx] {
                            *next += 1;
                        }
                        Ok(FrameTailOutcome::Continue)
                    }
                }
            }
            Frame::CStr { stopped } => {
                if *stopped {
                    self.frames.pop();
                    return Ok(FrameTailOutcome::Continue);
                }
                match self.try_read_bits(buf, cursor, 8, 8, ByteOrder::BigEndian)? {
                    AtomRead::Pending => Ok(FrameTailOutcome::Eof),
                    AtomRead::Value(v) => {
                        let byte = v as u8;
                        if byte == 0 {
                            if !self.string_accum.is_empty() {
                                cb.string_chunk(&self.string_accum)?;
                                self.string_accum.clear();
                            }
                            cb.string_end()?;
                            self.frames.pop();
                            self.bump_parent();
                        } else {
                            self.string_accum.push(byte);
                        }
                        Ok(FrameTailOutcome::Continue)
                    }
                }
            }
            _ => {
                // Generic compound exhausted: pop + compound_end.
                let ty = self.frames.pop().unwrap().ty();
                cb.compound_end(ty)?;
                self.bump_parent();
                Ok(FrameTailOutcome::Continue)
            }
        }
    }

    fn bump_parent(&mut self) {
        if let Some(top) = self.frames.last_mut() {
            match top {
                Frame::Struct { next, .. }
                | Frame::Array { next, .. }
                | Frame::Text { next, .. } => *next += 1,
                Frame::Variant { entered, .. } => *entered = true,
                Frame::CStr { .. } => {}
            }
        }
    }

    /// Aligns, then either begins a compound (pushing a frame) or fully
    /// reads a primitive (invoking its callback), for type `ty`.
    fn enter(
        &mut self,
        ty: FieldTypeId,
        buf: &[u8],
        cursor: &mut usize,
        cb: &mut dyn Callbacks,
    ) -> Result<EnterOutcome, Error> {
        let kind = cb.type_arena().kind(ty).clone();
        let align = kind.alignment();
        if !self.skip_padding(buf, cursor, align)? {
            return Ok(EnterOutcome::Eof);
        }

        if kind.is_text_compound(cb.type_arena()) {
            let len = match &kind {
                FieldTypeKind::Array(a) => a.length,
                FieldTypeKind::Sequence(_) => {
                    let n = cb.sequence_length(ty)?;
                    if n < 0 {
                        return Err(Error::UnknownTypeReference(
                            "sequence length must be non-negative".into(),
                        ));
                    }
                    n as usize
                }
                _ => unreachable!(),
            };
            cb.compound_begin(ty)?;
            cb.string_begin(ty)?;
            self.frames.push(Frame::Text {
                ty,
                next: 0,
                len,
                stopped: false,
            });
            return Ok(EnterOutcome::CompoundEntered);
        }

        match &kind {
            FieldTypeKind::Structure(s) => {
                cb.compound_begin(ty)?;
                self.frames.push(Frame::Struct {
                    ty,
                    next: 0,
                    count: s.members.len(),
                });
                Ok(EnterOutcome::CompoundEntered)
            }
            FieldTypeKind::Array(a) => {
                cb.compound_begin(ty)?;
                self.frames.push(Frame::Array {
                    ty,
                    elem_ty: a.element,
                    next: 0,
                    len: a.length,
                });
                Ok(EnterOutcome::CompoundEntered)
            }
            FieldTypeKind::Sequence(s) => {
                let n = cb.sequence_length(ty)?;
                if n < 0 {
                    return Err(Error::UnknownTypeReference(
                        "sequence length must be non-negative".into(),
                    ));
                }
                cb.compound_begin(ty)?;
                self.frames.push(Frame::Array {
                    ty,
                    elem_ty: s.element,
                    next: 0,
                    len: n as usize,
                });
                Ok(EnterOutcome::CompoundEntered)
            }
            FieldTypeKind::Variant(_) => {
                let inner_ty = cb
                    .variant_selected_type(ty)?
                    .ok_or_else(|| Error::UnknownTypeReference("variant selected null type".into()))?;
                cb.compound_begin(ty)?;
                self.frames.push(Frame::Variant {
                    ty,
                    inner_ty,
                    entered: false,
                });
                Ok(EnterOutcome::CompoundEntered)
            }
            FieldTypeKind::String(_) => {
                cb.string_begin(ty)?;
                self.frames.push(Frame::CStr { stopped: false });
                Ok(EnterOutcome::CompoundEntered)
            }
            FieldTypeKind::Integer(i) => {
                match self.try_read_bits(buf, cursor, align as u8, i.size_bits, i.byte_order)? {
                    AtomRead::Pending => Ok(EnterOutcome::Eof),
                    AtomRead::Value(raw) => {
                        if i.signed {
                            let v = sign_extend(raw, i.size_bits);
                            cb.signed_int(ty, v)?;
                        } else {
                            cb.unsigned_int(ty, raw)?;
                        }
                        Ok(EnterOutcome::PrimitiveDone)
                    }
                }
            }
            FieldTypeKind::Enumeration(e) => {
                match self.try_read_bits(
                    buf,
                    cursor,
                    align as u8,
                    e.container.size_bits,
                    e.container.byte_order,
                )? {
                    AtomRead::Pending => Ok(EnterOutcome::Eof),
                    AtomRead::Value(raw) => {
                        if e.container.signed {
                            cb.signed_int(ty, sign_extend(raw, e.container.size_bits))?;
                        } else {
                            cb.unsigned_int(ty, raw)?;
                        }
                        Ok(EnterOutcome::PrimitiveDone)
                    }
                }
            }
            FieldTypeKind::Float(f) => {
                match self.try_read_bits(buf, cursor, align as u8, f.size_bits() as u8, f.byte_order)? {
                    AtomRead::Pending => Ok(EnterOutcome::Eof),
                    AtomRead::Value(raw) => {
                        let v = if f.size_bits() == 32 {
                            f32::from_bits(raw as u32) as f64
                        } else {
                            f64::from_bits(raw)
                        };
                        cb.floating_point(ty, v)?;
                        Ok(EnterOutcome::PrimitiveDone)
                    }
                }
            }
        }
    }

    /// Skips `(align - (absolute_bit_offset mod align)) mod align` bits
    /// Returns `false` if the buffer ran out mid-padding.
    fn skip_padding(&mut self, buf: &[u8], cursor: &mut usize, align: u32) -> Result<bool, Error> {
        let align = align as u64;
        let padding = (align - (self.absolute_bit_offset % align)) % align;
        if padding == 0 {
            return Ok(true);
        }
        match self.try_read_bits(buf, cursor, 1, padding as u8, ByteOrder::BigEndian)? {
            AtomRead::Pending => Ok(false),
            AtomRead::Value(_) => Ok(true),
        }
    }

    /// Reads `n_bits` (<=64) at the current bit cursor, using the stitch
    /// buffer to span buffer refills. `cursor` is the bit offset
    /// within `buf` for *this* call.
    fn try_read_bits(
        &mut self,
        buf: &[u8],
        cursor: &mut usize,
        _align: u8,
        n_bits: u8,
        order: ByteOrder,
    ) -> Result<AtomRead, Error> {
        if n_bits == 0 {
            return Ok(AtomRead::Value(0));
        }

        if self.stitch.is_empty() {
            let available_bits = buf.len() * 8 - *cursor;
            if available_bits >= n_bits as usize {
                let value = read_raw_bits(buf, *cursor, n_bits, order);
                *cursor += n_bits as usize;
                self.absolute_bit_offset += n_bits as u64;
                return Ok(AtomRead::Value(value));
            }
            // Not enough bits left in this buffer: stitch the remainder.
            let start_byte = *cursor / 8;
            self.stitch_bit_offset = *cursor % 8;
            self.stitch = buf[start_byte..].to_vec();
            *cursor = buf.len() * 8;
            return Ok(AtomRead::Pending);
        }

        // Continuing a stitched atom: combine stitched bytes with the front
        // of the new buffer.
        let have_bits = self.stitch.len() * 8 - self.stitch_bit_offset;
        let new_bits = buf.len() * 8;
        if have_bits + new_bits >= n_bits as usize {
            let need_more_bits = n_bits as usize - have_bits;
            let need_more_bytes = need_more_bits.div_ceil(8);
            self.stitch.extend_from_slice(&buf[..need_more_bytes.min(buf.len())]);
            let value = read_raw_bits(&self.stitch, self.stitch_bit_offset, n_bits, order);
            self.stitch.clear();
            self.stitch_bit_offset = 0;
            *cursor = need_more_bytes * 8;
            self.absolute_bit_offset += n_bits as u64;
            Ok(AtomRead::Value(value))
        } else {
            self.stitch.extend_from_slice(buf);
            *cursor = buf.len() * 8;
            Ok(AtomRead::Pending)
        }
    }
}

enum EnterOutcome {
    Eof,
    CompoundEntered,
    PrimitiveDone,
}

enum FrameTailOutcome {
    Eof,
    Continue,
}

/// Reads `n_bits` (<=64) from `buf` starting at bit offset `bit_offset`,
/// using the CTF/bitfield convention: big-endian treats the covering bytes
/// as one big-endian integer and shifts the extra low bits away;
/// little-endian treats them as one little-endian integer (byte order
/// reversed) and shifts the extra bits at the front of the first byte away.
fn read_raw_bits(buf: &[u8], bit_offset: usize, n_bits: u8, order: ByteOrder) -> u64 {
    let start_byte = bit_offset / 8;
    let start_bit_in_byte = bit_offset % 8;
    let total_bits = start_bit_in_byte + n_bits as usize;
    let nbytes = total_bits.div_ceil(8);
    let mask: u128 = if n_bits == 64 {
        u128::MAX
    } else {
        (1u128 << n_bits) - 1
    };

    if order.is_big_endian() {
        let mut acc: u128 = 0;
        for i in 0..nbytes {
            acc = (acc << 8) | buf[start_byte + i] as u128;
        }
        let total_loaded_bits = nbytes * 8;
        let shift = total_loaded_bits - start_bit_in_byte - n_bits as usize;
        ((acc >> shift) & mask) as u64
    } else {
        let mut acc: u128 = 0;
        for i in (0..nbytes).rev() {
            acc = (acc << 8) | buf[start_byte + i] as u128;
        }
        let shift = start_bit_in_byte;
        ((acc >> shift) & mask) as u64
    }
}

fn sign_extend(raw: u64, n_bits: u8) -> i64 {
    if n_bits == 64 {
        return raw as i64;
    }
    let shift = 64 - n_bits;
    ((raw << shift) as i64) >> shift
}
