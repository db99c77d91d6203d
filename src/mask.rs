//! WebSocket frame masking utilities
//!
//! Masking keys and client handshake nonces come from the operating
//! system's secure random source through `getrandom`. A failing source is
//! reported as [`Error::Random`] and aborts the current operation.

use crate::error::{Error, Result};

/// XOR `data` in place with a repeating 4-byte mask.
///
/// Used for both masking (client send) and unmasking (read path).
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        chunk.copy_from_slice(&(u64::from_ne_bytes(word) ^ mask_u64).to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Generate a random mask for client frames.
pub fn generate_mask() -> Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Fill `buf` from the secure random source.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| {
        tracing::warn!(error = %e, "secure random source failed");
        Error::Random
    })
}
