use crate::config::CacheConfig;
use crate::counter::{bytes_to_u64, u64_to_bytes};
use crate::gc::GcTask;
use crate::stats::Stats;
use shared::Result;
use shared::ttl::expires_at;
use std::fmt::Debug;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage_engine::{Compaction, SledEngine, StorageEngine};
use tracing::info;

/// An open cache bound to one database directory.
///
/// Reads and writes go straight to the engine, which handles its own
/// concurrency; a connection can be shared across threads behind an `Arc`.
/// [`Connection::close`] consumes the connection, so nothing can be issued
/// against a closed handle.
pub struct Connection<E: StorageEngine = SledEngine> {
    ttl: Duration,
    discard_ratio: f64,
    path: PathBuf,
    engine: Arc<E>,
    gc: GcTask,
}

impl<E: StorageEngine> Connection<E> {
    pub(crate) fn open(path: &Path, config: &CacheConfig) -> Result<Self>
    where
        E: StorageEngine<Options = storage_engine::EngineOptions>,
    {
        // Nothing is spawned unless the engine opened.
        let engine = Arc::new(E::open(path, config.engine_options())?);
        let policy = *config.gc_policy();
        let gc = GcTask::spawn(engine.clone(), policy);

        info!(
            path = %path.display(),
            default_ttl = ?config.default_ttl(),
            gc_frequency = ?policy.frequency,
            discard_ratio = policy.discard_ratio,
            "Cache connection opened"
        );

        Ok(Self {
            ttl: config.default_ttl(),
            discard_ratio: policy.discard_ratio,
            path: path.to_path_buf(),
            engine,
            gc,
        })
    }

    /// Stops the GC loop, then closes the engine.
    ///
    /// The loop is fully stopped before the engine is touched: no compaction
    /// pass runs against a closing handle.
    pub async fn close(self) -> Result<()> {
        let Self {
            engine, gc, path, ..
        } = self;

        gc.stop().await;
        let result = engine.close();

        info!(path = %path.display(), ok = result.is_ok(), "Cache connection closed");
        result
    }

    /// Default TTL applied by [`Connection::write`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes with the connection's default TTL.
    pub fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_ttl(key, value, self.ttl)
    }

    /// Writes with an explicit TTL; zero stores the entry without expiry.
    pub fn write_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = expires_at(ttl)?;
        self.engine.set(key, value, expires_at)
    }

    /// Returns `Error::NotFound` if the key is missing or has expired.
    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.engine.get(key)
    }

    /// Removes a key. Returns whether a live entry was removed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.engine.delete(key)
    }

    /// Atomically adds `by` to the counter at `key` and returns the new value.
    ///
    /// Missing or expired counters start from zero. Each increment refreshes
    /// the entry with the connection's default TTL.
    pub fn increment(&self, key: &[u8], by: u64) -> Result<u64> {
        let expires_at = expires_at(self.ttl)?;
        let next = self.engine.update(key, expires_at, &|current: Option<&[u8]>| {
            let current = match current {
                Some(bytes) => bytes_to_u64(bytes)?,
                None => 0,
            };
            Ok(u64_to_bytes(current.wrapping_add(by)).to_vec())
        })?;
        bytes_to_u64(&next)
    }

    pub fn stats(&self) -> Result<Stats> {
        let (lsm_size, vlog_size) = self.engine.size()?;
        Ok(Stats::new(lsm_size, vlog_size))
    }

    /// Streams every entry written after version `since` to `writer`.
    ///
    /// Returns the version to pass as `since` for the next incremental
    /// backup. The database is not modified.
    pub fn backup<W: Write>(&self, mut writer: W, since: u64) -> Result<u64> {
        self.engine.backup(&mut writer, since)
    }

    /// Applies a stream produced by [`Connection::backup`].
    ///
    /// This is a bulk load, not a transactional merge: no other transactions
    /// should run against this connection until it returns.
    pub fn load<R: Read>(&self, mut reader: R) -> Result<()> {
        self.engine.load(&mut reader)
    }

    /// Persists buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.engine.flush()
    }

    /// Runs one compaction pass now, with the configured discard ratio.
    pub fn compact(&self) -> Result<Compaction> {
        self.engine.run_compaction(self.discard_ratio)
    }
}

impl<E: StorageEngine> Debug for Connection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("ttl", &self.ttl)
            .field("gc", &self.gc)
            .finish()
    }
}
