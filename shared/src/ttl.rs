//! TTL rules shared by configuration and the write path.
//!
//! Expiries are stored as unix timestamps in whole seconds, so a positive TTL
//! shorter than one second cannot be represented and is rejected.

use crate::{Error, Result};
use chrono::{TimeDelta, Utc};
use std::time::Duration;

/// Smallest positive TTL the engine can honour.
pub const TTL_RESOLUTION: Duration = Duration::from_secs(1);

/// Accepts `0` (no expiry) or anything `>= 1s`.
pub fn validate_ttl(ttl: Duration) -> Result<Duration> {
    if !ttl.is_zero() && ttl < TTL_RESOLUTION {
        return Err(Error::InvalidTtl(ttl));
    }
    Ok(ttl)
}

/// Current time in unix seconds.
pub fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Converts a relative TTL into an absolute expiry, `None` meaning "never".
///
/// The expiry is `floor(now + ttl)` in unix seconds.
pub fn expires_at(ttl: Duration) -> Result<Option<u64>> {
    validate_ttl(ttl)?;
    if ttl.is_zero() {
        return Ok(None);
    }

    let delta = TimeDelta::from_std(ttl).map_err(|_| Error::InvalidTtl(ttl))?;
    let deadline = Utc::now()
        .checked_add_signed(delta)
        .ok_or(Error::InvalidTtl(ttl))?;

    Ok(Some(deadline.timestamp().max(0) as u64))
}

/// An entry is expired once the clock reaches its expiry second.
pub fn is_expired(expires_at: Option<u64>, now: u64) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}
