use std::path::Path;

/// Tuning knobs forwarded to sled when a database is opened.
///
/// The directory is not part of the options: it is supplied at open time,
/// so one value can be reused to open databases at several paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub cache_capacity_bytes: u64,
    pub flush_every_ms: Option<u64>,
    pub mode: EngineMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineMode {
    LowSpace,
    HighThroughput,
}

impl EngineOptions {
    const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;
    const DEFAULT_FLUSH_EVERY_MS: u64 = 500;

    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity_bytes = bytes;
        self
    }

    pub fn with_flush_every_ms(mut self, flush_every_ms: Option<u64>) -> Self {
        self.flush_every_ms = flush_every_ms;
        self
    }

    pub fn with_mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Combines the options with a directory into a sled configuration.
    pub(crate) fn to_sled_config(&self, path: &Path) -> sled::Config {
        sled::Config::new()
            .path(path)
            .cache_capacity(self.cache_capacity_bytes)
            .flush_every_ms(self.flush_every_ms)
            .mode(match self.mode {
                EngineMode::LowSpace => sled::Mode::LowSpace,
                EngineMode::HighThroughput => sled::Mode::HighThroughput,
            })
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: Self::DEFAULT_CACHE_CAPACITY_BYTES,
            flush_every_ms: Some(Self::DEFAULT_FLUSH_EVERY_MS),
            mode: EngineMode::LowSpace,
        }
    }
}
