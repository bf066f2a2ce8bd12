use bytes::{Buf, BufMut, BytesMut};
use shared::{EngineError, Result};

/// Size of the fixed header in front of every stored value.
pub const HEADER_LEN: usize = 16;

/// A value as stored in sled, tagged with its version and expiry.
///
/// Format: `[version: u64][expires_at: u64][value bytes]`, big-endian,
/// with `expires_at == 0` meaning the entry never expires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub version: u64,
    pub expires_at: Option<u64>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(version: u64, expires_at: Option<u64>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            version,
            expires_at,
            value: value.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.value.len());
        buf.put_u64(self.version);
        buf.put_u64(self.expires_at.unwrap_or(0));
        buf.put_slice(&self.value);
        buf.to_vec()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(EngineError::Corrupted(format!(
                "record header needs {} bytes, got {}",
                HEADER_LEN,
                buf.len()
            ))
            .into());
        }

        let version = buf.get_u64();
        let expires_at = match buf.get_u64() {
            0 => None,
            at => Some(at),
        };

        Ok(Self {
            version,
            expires_at,
            value: buf.to_vec(),
        })
    }

    pub fn is_expired(&self, now: u64) -> bool {
        shared::ttl::is_expired(self.expires_at, now)
    }
}
