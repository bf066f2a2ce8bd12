#![deny(clippy::all)]

use shared::Result;
use std::io::{Read, Write};
use std::path::Path;

pub mod backup;
pub mod options;
pub mod record;
pub mod sled_engine;

pub use options::EngineOptions;
pub use sled_engine::SledEngine;

// The storage engine contract the cache layer is written against.

/// Outcome of a single compaction pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compaction {
    /// Space was reclaimed; another pass may find more.
    Reclaimed { entries: u64, bytes: u64 },
    /// Nothing left worth reclaiming at the requested discard ratio.
    NothingToReclaim,
}

/// Port for reclaiming space held by stale entries.
pub trait Compactor: Send + Sync + 'static {
    /// Runs one pass. Entries are only reclaimed from a region whose share of
    /// stale entries is at least `discard_ratio`.
    fn run_compaction(&self, discard_ratio: f64) -> Result<Compaction>;
}

/// Port for the embedded, persistent, ordered key-value engine.
///
/// Every method is safe to call concurrently from several threads; the
/// engine provides its own transaction discipline.
pub trait StorageEngine: Compactor {
    type Options: Clone + std::fmt::Debug + Default + Send + Sync;

    /// Opens the engine with its data directory bound to `path`.
    fn open(path: &Path, options: &Self::Options) -> Result<Self>
    where
        Self: Sized;

    /// Persists outstanding writes and releases the handle.
    fn close(&self) -> Result<()>;

    /// Stores `value` under `key` in one atomic transaction.
    /// `expires_at` is an absolute unix timestamp in seconds.
    fn set(&self, key: &[u8], value: &[u8], expires_at: Option<u64>) -> Result<()>;

    /// Returns `Error::NotFound` for missing or expired keys.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Removes `key`, reporting whether a live entry was present.
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Transactional read-modify-write. `f` receives the current live value
    /// and may be invoked more than once if the transaction conflicts.
    fn update(
        &self,
        key: &[u8],
        expires_at: Option<u64>,
        f: &dyn Fn(Option<&[u8]>) -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>>;

    /// On-disk sizes as `(index_bytes, log_bytes)`.
    fn size(&self) -> Result<(u64, u64)>;

    /// Streams every live entry newer than `since` to `writer`, returning the
    /// version to pass as `since` for the next incremental backup.
    fn backup(&self, writer: &mut dyn Write, since: u64) -> Result<u64>;

    /// Applies a stream produced by [`StorageEngine::backup`].
    fn load(&self, reader: &mut dyn Read) -> Result<()>;

    fn flush(&self) -> Result<()>;
}
