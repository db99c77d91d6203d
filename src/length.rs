//! Payload length field and masking key codec
//!
//! The second header byte carries a 7-bit length indicator. Values up to
//! 125 are the length itself, 126 announces a 16-bit big-endian extension
//! and 127 a 64-bit one. The reader and the writer both go through this
//! module so the two sides can never disagree on widths.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::{MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// Indicator announcing a 16-bit extended length
pub const LEN_16_MARKER: u8 = 126;

/// Indicator announcing a 64-bit extended length
pub const LEN_64_MARKER: u8 = 127;

/// Masking key size
pub const MASK_KEY_LEN: usize = 4;

/// Width of the extended length field for `len` (0, 2 or 8 bytes)
#[inline]
pub fn extended_len_width(len: u64) -> usize {
    if len <= SMALL_MESSAGE_THRESHOLD as u64 {
        0
    } else if len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
        2
    } else {
        8
    }
}

/// Full header size for a payload of `len` bytes
#[inline]
pub fn header_len(len: u64, masked: bool) -> usize {
    2 + extended_len_width(len) + if masked { MASK_KEY_LEN } else { 0 }
}

/// Encode the length indicator and its extension into `dst`.
///
/// `dst[0]` receives the 7-bit indicator with the MASK bit clear; the
/// caller ORs the MASK bit in. Returns the number of bytes written
/// (indicator included).
pub fn encode_length(dst: &mut [u8], len: u64) -> Result<usize> {
    let needed = 1 + extended_len_width(len);
    if dst.len() < needed {
        return Err(Error::BufferTooSmall {
            needed,
            available: dst.len(),
        });
    }

    let mut out = &mut dst[..needed];
    match needed - 1 {
        0 => out.put_u8(len as u8),
        2 => {
            out.put_u8(LEN_16_MARKER);
            out.put_u16(len as u16);
        }
        _ => {
            out.put_u8(LEN_64_MARKER);
            out.put_u64(len);
        }
    }
    Ok(needed)
}

/// Decode the length field starting at the indicator byte.
///
/// Returns the payload length and the number of bytes the field occupies
/// (indicator included), or `Ok(None)` if `src` stops before the
/// extension the indicator announces.
pub fn decode_length(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let Some(&indicator) = src.first() else {
        return Ok(None);
    };
    let mut rest = &src[1..];

    match indicator & 0x7F {
        LEN_16_MARKER => {
            if rest.remaining() < 2 {
                return Ok(None);
            }
            let len = rest.get_u16() as u64;
            if len <= SMALL_MESSAGE_THRESHOLD as u64 {
                return Err(Error::Protocol("payload length not minimal"));
            }
            Ok(Some((len, 3)))
        }
        LEN_64_MARKER => {
            if rest.remaining() < 8 {
                return Ok(None);
            }
            let len = rest.get_u64();
            if len >> 63 != 0 {
                return Err(Error::Protocol("payload length MSB must be 0"));
            }
            if len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
                return Err(Error::Protocol("payload length not minimal"));
            }
            Ok(Some((len, 9)))
        }
        small => Ok(Some((small as u64, 1))),
    }
}

/// Read a masking key at `offset`, if the bytes are there
#[inline]
pub fn read_mask_key(src: &[u8], offset: usize) -> Option<[u8; MASK_KEY_LEN]> {
    let end = offset.checked_add(MASK_KEY_LEN)?;
    src.get(offset..end)?.try_into().ok()
}
