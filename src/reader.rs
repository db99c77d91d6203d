//! Frame reader
//!
//! Turns bytes from the engine's receive buffer into [`Frame`]s. Nothing is
//! remembered between calls except what goes into the connection's
//! [`ConnectionState`]: the reader can be re-entered cold on every read.
//!
//! Every declared length is checked against the bytes actually available
//! and against the configured ceilings before any payload is copied.

use bytes::BytesMut;
use tracing::{trace, warn};

use crate::Config;
use crate::error::{CloseReason, Error, Result};
use crate::frame::{Frame, FrameHeader, OpCode, SendRole};
use crate::length::{MASK_KEY_LEN, decode_length, read_mask_key};
use crate::mask::apply_mask;
use crate::state::{ConnectionState, ConnectionStateExt};

const FIN: u8 = 0x80;
const RSV1: u8 = 0x40;
const RSV2: u8 = 0x20;
const RSV3: u8 = 0x10;
const OPCODE: u8 = 0x0F;
const MASK: u8 = 0x80;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Size of the next complete frame at the front of `buf`.
///
/// Returns `Ok(None)` until the header and the whole payload it declares
/// are in `buf`. A declared payload above `max_frame_size` or
/// `max_message_size` is rejected here, before the engine buffers it.
pub fn length_of_next_frame(buf: &[u8], config: &Config) -> Result<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let masked = buf[1] & MASK != 0;
    let Some((payload_len, len_field)) = decode_length(&buf[1..])? else {
        return Ok(None);
    };
    check_declared_len(payload_len, 0, config)?;

    let header_len = 1 + len_field + if masked { MASK_KEY_LEN } else { 0 };
    let total = header_len as u64 + payload_len;
    if total <= buf.len() as u64 {
        Ok(Some(total as usize))
    } else {
        Ok(None)
    }
}

/// Reject a declared payload that would push a frame or the message it
/// belongs to past the configured ceilings
fn check_declared_len(payload_len: u64, buffered: usize, config: &Config) -> Result<()> {
    if payload_len > config.max_frame_size as u64 {
        warn!(payload_len, max = config.max_frame_size, "declared frame exceeds limit");
        return Err(Error::FrameTooLarge);
    }
    let assembled = buffered as u64 + payload_len;
    if assembled > config.max_message_size as u64 {
        warn!(assembled, max = config.max_message_size, "message exceeds limit");
        return Err(Error::MessageTooLarge);
    }
    Ok(())
}

/// Decode and validate the header at the front of `buf`.
///
/// Returns `Ok(None)` if `buf` ends inside the header.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let b1 = buf[1];

    // RSV1 is tolerated on data frames; no extension gives RSV2/RSV3 meaning
    if b0 & (RSV2 | RSV3) != 0 {
        return Err(violation("RSV2 and RSV3 must be 0"));
    }

    let opcode = OpCode::from_u8(b0 & OPCODE).ok_or_else(|| {
        warn!(opcode = b0 & OPCODE, "unknown opcode");
        Error::InvalidFrame("invalid opcode")
    })?;

    let fin = b0 & FIN != 0;
    let rsv1 = b0 & RSV1 != 0;

    if opcode.is_control() && rsv1 {
        return Err(violation("RSV1 must be 0 on control frames"));
    }
    if opcode.is_control() && !fin {
        return Err(violation("control frame must not be fragmented"));
    }

    let Some((payload_len, len_field)) = decode_length(&buf[1..])? else {
        return Ok(None);
    };

    if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD {
        return Err(violation("control frame too large"));
    }

    let mut header_len = 1 + len_field;
    let mask = if b1 & MASK != 0 {
        let Some(key) = read_mask_key(buf, header_len) else {
            return Ok(None);
        };
        header_len += MASK_KEY_LEN;
        Some(key)
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        rsv1,
        opcode,
        mask,
        payload_len,
        header_len,
    }))
}

/// Parse the frame at the front of `buf` into `state`.
///
/// Data fragments are appended to the connection's pending message. The
/// returned frame has `fin == false` for an intermediate fragment and then
/// carries only that fragment's bytes; the final fragment returns the whole
/// reassembled message and clears the pending slot. Control frames never
/// touch the pending message.
///
/// Close frames record their status code and reason text in `state`; the
/// returned frame carries no payload.
///
/// Returns `Ok(None)` if `buf` does not yet hold the complete frame.
pub fn parse_frame<S>(buf: &[u8], config: &Config, state: &mut S) -> Result<Option<Frame>>
where
    S: ConnectionState + ?Sized,
{
    let Some(header) = decode_header(buf)? else {
        return Ok(None);
    };

    let buffered = match header.opcode {
        OpCode::Continuation => state.pending_fragment().map_or(0, |f| f.payload.len()),
        _ => 0,
    };
    check_declared_len(header.payload_len, buffered, config)?;
    if header.frame_len() > buf.len() as u64 {
        return Ok(None);
    }

    let start = header.header_len;
    let payload = &buf[start..start + header.payload_len as usize];

    trace!(
        opcode = ?header.opcode,
        fin = header.fin,
        payload_len = header.payload_len,
        masked = header.mask.is_some(),
        "parsed frame"
    );

    let role = config.role.send_role();
    let frame = match header.opcode {
        OpCode::Continuation => continue_message(&header, payload, state)?,
        OpCode::Text | OpCode::Binary => start_message(&header, payload, role, state)?,
        OpCode::Close => {
            record_close(&header, payload, state)?;
            Frame::control(OpCode::Close, role)
        }
        OpCode::Ping | OpCode::Pong => {
            let mut frame = Frame::control(header.opcode, role);
            append_unmasked(&mut frame.payload, payload, header.mask);
            frame
        }
    };

    Ok(Some(frame))
}

fn start_message<S>(
    header: &FrameHeader,
    payload: &[u8],
    role: SendRole,
    state: &mut S,
) -> Result<Frame>
where
    S: ConnectionState + ?Sized,
{
    if state.pending_fragment().is_some() {
        return Err(violation("expected continuation frame"));
    }

    let mut frame = Frame {
        fin: header.fin,
        opcode: header.opcode,
        payload: BytesMut::with_capacity(payload.len()),
        role,
    };
    append_unmasked(&mut frame.payload, payload, header.mask);

    if !frame.fin {
        state.set_pending_fragment(frame.clone());
    }
    Ok(frame)
}

fn continue_message<S>(header: &FrameHeader, payload: &[u8], state: &mut S) -> Result<Frame>
where
    S: ConnectionState + ?Sized,
{
    let Some(pending) = state.pending_fragment_mut() else {
        return Err(violation("unexpected continuation frame"));
    };

    let offset = pending.payload.len();
    append_unmasked(&mut pending.payload, payload, header.mask);

    if !header.fin {
        return Ok(Frame {
            fin: false,
            opcode: pending.opcode,
            payload: BytesMut::from(&pending.payload[offset..]),
            role: pending.role,
        });
    }

    let mut frame = state
        .take_pending_fragment()
        .ok_or(Error::InvalidState("pending fragment vanished"))?;
    frame.fin = true;
    Ok(frame)
}

fn record_close<S>(header: &FrameHeader, payload: &[u8], state: &mut S) -> Result<()>
where
    S: ConnectionState + ?Sized,
{
    match payload.len() {
        0 => Ok(()),
        1 => Err(violation("close frame payload shorter than status code")),
        _ => {
            let mut body = BytesMut::with_capacity(payload.len());
            append_unmasked(&mut body, payload, header.mask);

            let code = u16::from_be_bytes([body[0], body[1]]);
            if !CloseReason::is_valid_code(code) {
                warn!(code, "invalid close code");
                return Err(Error::InvalidCloseCode(code));
            }

            let reason = body.split_off(2);
            if simdutf8::basic::from_utf8(&reason).is_err() {
                return Err(Error::InvalidUtf8);
            }

            let reason = (!reason.is_empty()).then(|| reason.freeze());
            state.set_last_close(code, reason);
            Ok(())
        }
    }
}

/// Copy `payload` onto the end of `dst` and unmask the copied bytes
#[inline]
fn append_unmasked(dst: &mut BytesMut, payload: &[u8], mask: Option<[u8; 4]>) {
    let start = dst.len();
    dst.extend_from_slice(payload);
    if let Some(mask) = mask {
        apply_mask(&mut dst[start..], mask);
    }
}

fn violation(reason: &'static str) -> Error {
    warn!(reason, "protocol violation");
    Error::Protocol(reason)
}

/// True if the engine must treat `frame` out-of-band: a control frame or a
/// non-final fragment
#[inline]
pub fn is_control_header(frame: &Frame) -> bool {
    !frame.fin || frame.opcode.is_control()
}

/// Automatic reply to a received control frame, sent in `role`.
///
/// Ping is answered with Pong, Pong with Ping, and Close is echoed to
/// complete the closing handshake. Other frames get no reply.
pub fn build_control_reply(frame: &Frame, role: SendRole) -> Option<Frame> {
    let opcode = match frame.opcode {
        OpCode::Ping => OpCode::Pong,
        OpCode::Pong => OpCode::Ping,
        OpCode::Close => OpCode::Close,
        _ => return None,
    };
    Some(Frame::control(opcode, role))
}

/// True if `frame` ends the connection rather than keeping it alive
#[inline]
pub fn is_close_frame(frame: &Frame) -> bool {
    frame.is_close()
}
