//! Counters are stored as 8-byte big-endian integers.

use shared::{Error, Result};

pub fn u64_to_bytes(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

pub fn bytes_to_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::InvalidCounter(bytes.len()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Adds two encoded counters, wrapping on overflow.
pub fn add(a: &[u8], b: &[u8]) -> Result<[u8; 8]> {
    Ok(u64_to_bytes(bytes_to_u64(a)?.wrapping_add(bytes_to_u64(b)?)))
}
