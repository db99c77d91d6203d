//! Frame writer and fragmenter
//!
//! An outgoing [`Frame`] is cut into wire chunks of at most `limit` payload
//! bytes. The engine drives the loop:
//!
//! ```
//! use ws_wire::frame::{Frame, SendRole};
//! use ws_wire::writer::{begin_fragmented_send, write_chunk};
//!
//! let frame = Frame::binary(vec![7u8; 300], SendRole::ServerSend);
//! let mut state = begin_fragmented_send(&frame, 100).unwrap();
//! let mut wire = Vec::new();
//! while state.has_more_to_send() {
//!     let mut chunk = vec![0u8; state.reserve_next_chunk_size()];
//!     let n = write_chunk(&mut chunk, &frame, &mut state).unwrap();
//!     wire.extend_from_slice(&chunk[..n]);
//! }
//! assert_eq!(wire.len(), 300 + 3 * 2);
//! ```
//!
//! Masking follows the frame's [`SendRole`]: client frames always carry a
//! fresh random key, server frames never do.

use bytes::BytesMut;
use tracing::trace;

use crate::error::{Error, Result};
use crate::frame::{Frame, OpCode, SendRole};
use crate::length::{MASK_KEY_LEN, encode_length, header_len};
use crate::mask::{apply_mask, generate_mask};

const FIN: u8 = 0x80;
const MASK: u8 = 0x80;

/// Size of every control chunk: two header bytes, no payload
pub const CONTROL_CHUNK_LEN: usize = 2;

/// Progress of one frame through the fragmenter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentState {
    control: bool,
    masked: bool,
    limit: usize,
    total: usize,
    sent: usize,
    reserved: Option<usize>,
    flushed: bool,
}

impl FragmentState {
    /// Whether another chunk remains.
    ///
    /// Control frames and empty data frames go out as exactly one chunk.
    pub fn has_more_to_send(&self) -> bool {
        if self.control || self.total == 0 {
            !self.flushed
        } else {
            self.sent < self.total
        }
    }

    /// Reserve the next chunk and return its size on the wire.
    ///
    /// Returns 0 once everything has been sent.
    pub fn reserve_next_chunk_size(&mut self) -> usize {
        if !self.has_more_to_send() {
            self.reserved = None;
            return 0;
        }
        if self.control {
            self.reserved = Some(0);
            return CONTROL_CHUNK_LEN;
        }

        let chunk = self.bytes_remaining().min(self.limit);
        self.reserved = Some(chunk);
        header_len(chunk as u64, self.masked) + chunk
    }

    /// Payload bytes already written
    #[inline]
    pub fn bytes_sent(&self) -> usize {
        self.sent
    }

    /// Payload bytes not yet written
    #[inline]
    pub fn bytes_remaining(&self) -> usize {
        self.total - self.sent
    }

    /// Total payload of the frame
    #[inline]
    pub fn total_len(&self) -> usize {
        self.total
    }

    /// Payload bytes reserved for the next chunk, if a reservation is open
    #[inline]
    pub fn reserved(&self) -> Option<usize> {
        self.reserved
    }

    /// Whether the frame bypasses fragmentation
    #[inline]
    pub fn is_control(&self) -> bool {
        self.control
    }

    /// Payload bytes per chunk
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Start sending `frame` in chunks of at most `limit` payload bytes
pub fn begin_fragmented_send(frame: &Frame, limit: usize) -> Result<FragmentState> {
    if limit < 2 {
        return Err(Error::InvalidState("fragment size must be at least 2"));
    }
    if frame.opcode == OpCode::Continuation {
        return Err(Error::InvalidState("continuation is chosen by the fragmenter"));
    }

    let control = frame.opcode.is_control();
    Ok(FragmentState {
        control,
        masked: frame.role.masks(),
        limit,
        total: if control { 0 } else { frame.payload.len() },
        sent: 0,
        reserved: None,
        flushed: false,
    })
}

/// Write the next chunk of `frame` into `out`.
///
/// Uses the open reservation, or reserves one if the caller has not.
/// Returns the bytes written. On error nothing is consumed from `state`
/// and the call can be retried with a larger buffer.
pub fn write_chunk(out: &mut [u8], frame: &Frame, state: &mut FragmentState) -> Result<usize> {
    if !state.has_more_to_send() {
        return Err(Error::InvalidState("nothing left to send"));
    }
    if state.masked != frame.role.masks()
        || (!state.control && state.total != frame.payload.len())
    {
        return Err(Error::InvalidState("frame does not match fragment state"));
    }

    let needed = match state.reserved {
        Some(chunk) if state.control => CONTROL_CHUNK_LEN + chunk,
        Some(chunk) => header_len(chunk as u64, state.masked) + chunk,
        None => state.reserve_next_chunk_size(),
    };
    if out.len() < needed {
        return Err(Error::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    if state.control {
        out[0] = FIN | frame.opcode as u8;
        out[1] = 0;
        state.flushed = true;
        state.reserved = None;
        trace!(opcode = ?frame.opcode, "wrote control frame");
        return Ok(CONTROL_CHUNK_LEN);
    }

    let chunk = state.reserved.unwrap_or_default();
    let opcode = if state.sent > 0 {
        OpCode::Continuation
    } else {
        frame.opcode
    };
    let fin = state.sent + chunk == state.total;

    out[0] = opcode as u8 | if fin { FIN } else { 0 };
    let mut pos = 1 + encode_length(&mut out[1..], chunk as u64)?;

    let mask = match frame.role {
        SendRole::ClientSend => {
            let key = generate_mask()?;
            out[1] |= MASK;
            out[pos..pos + MASK_KEY_LEN].copy_from_slice(&key);
            pos += MASK_KEY_LEN;
            Some(key)
        }
        SendRole::ServerSend => None,
    };

    let body = &mut out[pos..pos + chunk];
    body.copy_from_slice(&frame.payload[state.sent..state.sent + chunk]);
    if let Some(key) = mask {
        apply_mask(body, key);
    }

    state.sent += chunk;
    state.flushed = true;
    state.reserved = None;

    trace!(
        opcode = ?opcode,
        fin,
        payload_len = chunk,
        masked = mask.is_some(),
        "wrote frame chunk"
    );
    Ok(pos + chunk)
}

/// Append every chunk of `frame` to `buf`
pub fn encode_frame(frame: &Frame, limit: usize, buf: &mut BytesMut) -> Result<()> {
    let mut state = begin_fragmented_send(frame, limit)?;
    while state.has_more_to_send() {
        let needed = state.reserve_next_chunk_size();
        let start = buf.len();
        buf.resize(start + needed, 0);
        match write_chunk(&mut buf[start..], frame, &mut state) {
            Ok(written) => buf.truncate(start + written),
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        }
    }
    Ok(())
}
