//! A TTL-aware cache on top of an embedded, persistent, ordered key-value
//! store.
//!
//! A [`CacheConfig`] is validated once and can open any number of
//! [`Connection`]s. Each open connection owns one engine handle and one
//! background task that periodically reclaims space held by expired entries.
//!
//! ```no_run
//! use std::time::Duration;
//! use strata::CacheConfig;
//!
//! async fn cache_roundtrip() -> strata::Result<()> {
//!     let config = CacheConfig::new(Duration::from_secs(60), None, None)?;
//!     let conn = config.open("./data/cache").await?;
//!     conn.write(b"key", b"value")?;
//!     assert_eq!(conn.read(b"key")?, b"value");
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]

pub mod config;
pub mod connection;
pub mod counter;
pub mod gc;
pub mod stats;

pub use config::{CacheConfig, GcPolicy};
pub use connection::Connection;
pub use counter::{add, bytes_to_u64, u64_to_bytes};
pub use stats::Stats;

pub use shared::{EngineError, Error, Result};
pub use storage_engine::{Compaction, EngineOptions, SledEngine, StorageEngine};
