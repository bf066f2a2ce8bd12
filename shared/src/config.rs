use std::time::Duration;
use tracing::warn;

/// Process-level settings read from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub data_dir: String,
    pub default_ttl: Duration,
    pub gc_frequency: Duration,
    pub gc_discard_ratio: f64,
    pub cache_capacity_bytes: u64,
    pub flush_every_ms: Option<u64>,
}

impl Settings {
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_TTL_SECS: u64 = 0;
    const DEFAULT_GC_FREQUENCY_SECS: u64 = 60;
    const DEFAULT_GC_DISCARD_RATIO: f64 = 0.5;
    const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;
    const DEFAULT_FLUSH_EVERY_MS: u64 = 500;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |name: &str, default: u64| -> u64 {
            match lookup(name) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    warn!("{name}={raw:?} is not a valid integer, using {default}");
                    default
                }),
                None => default,
            }
        };

        let gc_discard_ratio = match lookup("STRATA_GC_DISCARD_RATIO") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(
                    "STRATA_GC_DISCARD_RATIO={raw:?} is not a valid number, using {}",
                    Self::DEFAULT_GC_DISCARD_RATIO
                );
                Self::DEFAULT_GC_DISCARD_RATIO
            }),
            None => Self::DEFAULT_GC_DISCARD_RATIO,
        };

        let flush_every_ms = match parsed("STRATA_FLUSH_EVERY_MS", Self::DEFAULT_FLUSH_EVERY_MS) {
            0 => None,
            ms => Some(ms),
        };

        Self {
            data_dir: lookup("STRATA_DATA_DIR")
                .unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            default_ttl: Duration::from_secs(parsed(
                "STRATA_DEFAULT_TTL_SECS",
                Self::DEFAULT_TTL_SECS,
            )),
            gc_frequency: Duration::from_secs(parsed(
                "STRATA_GC_FREQUENCY_SECS",
                Self::DEFAULT_GC_FREQUENCY_SECS,
            )),
            gc_discard_ratio,
            cache_capacity_bytes: parsed(
                "STRATA_CACHE_CAPACITY_BYTES",
                Self::DEFAULT_CACHE_CAPACITY_BYTES,
            ),
            flush_every_ms,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
