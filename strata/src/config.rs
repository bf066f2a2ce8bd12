use crate::connection::Connection;
use shared::config::Settings;
use shared::ttl::validate_ttl;
use shared::{Error, Result};
use std::path::Path;
use std::time::Duration;
use storage_engine::{EngineOptions, SledEngine, StorageEngine};

/// How often the background loop compacts and how aggressively.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GcPolicy {
    pub frequency: Duration,
    /// Minimum share of stale entries a region needs before it is reclaimed.
    pub discard_ratio: f64,
}

impl GcPolicy {
    pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(60);
    pub const DEFAULT_DISCARD_RATIO: f64 = 0.5;

    pub fn new(frequency: Duration, discard_ratio: f64) -> Result<Self> {
        let policy = Self {
            frequency,
            discard_ratio,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frequency.is_zero() {
            return Err(Error::InvalidGcPolicy(
                "frequency must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.discard_ratio) {
            return Err(Error::InvalidGcPolicy(format!(
                "discard ratio must be within [0, 1], got {}",
                self.discard_ratio
            )));
        }
        Ok(())
    }
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            frequency: Self::DEFAULT_FREQUENCY,
            discard_ratio: Self::DEFAULT_DISCARD_RATIO,
        }
    }
}

/// Validated, immutable cache settings.
///
/// A config is never modified by opening a connection, so the same value can
/// open databases at several paths.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    default_ttl: Duration,
    engine_options: EngineOptions,
    gc_policy: GcPolicy,
}

impl CacheConfig {
    /// A `default_ttl` of zero disables expiry for writes without an explicit TTL.
    pub fn new(
        default_ttl: Duration,
        engine_options: Option<EngineOptions>,
        gc_policy: Option<GcPolicy>,
    ) -> Result<Self> {
        validate_ttl(default_ttl)?;

        let gc_policy = gc_policy.unwrap_or_default();
        gc_policy.validate()?;

        Ok(Self {
            default_ttl,
            engine_options: engine_options.unwrap_or_default(),
            gc_policy,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let engine_options = EngineOptions::default()
            .with_cache_capacity(settings.cache_capacity_bytes)
            .with_flush_every_ms(settings.flush_every_ms);
        let gc_policy = GcPolicy::new(settings.gc_frequency, settings.gc_discard_ratio)?;

        Self::new(settings.default_ttl, Some(engine_options), Some(gc_policy))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn engine_options(&self) -> &EngineOptions {
        &self.engine_options
    }

    pub fn gc_policy(&self) -> &GcPolicy {
        &self.gc_policy
    }

    /// Opens a sled-backed connection at `path` and starts its GC loop.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<Connection> {
        self.open_with::<SledEngine>(path).await
    }

    /// Opens a connection on any engine configured through [`EngineOptions`].
    pub async fn open_with<E>(&self, path: impl AsRef<Path>) -> Result<Connection<E>>
    where
        E: StorageEngine<Options = EngineOptions>,
    {
        Connection::open(path.as_ref(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_with_defaults() {
        let config = CacheConfig::new(Duration::from_secs(1), None, None).unwrap();

        assert_eq!(config.default_ttl(), Duration::from_secs(1));
        assert_eq!(config.engine_options(), &EngineOptions::default());
        assert_eq!(
            config.gc_policy(),
            &GcPolicy {
                frequency: Duration::from_secs(60),
                discard_ratio: 0.5,
            }
        );
    }

    #[test]
    fn test_new_config_zero_ttl_means_no_expiry() {
        let config = CacheConfig::new(Duration::ZERO, None, None).unwrap();
        assert!(config.default_ttl().is_zero());
    }

    #[test]
    fn test_new_config_rejects_sub_second_ttl() {
        for ttl in [Duration::from_nanos(1), Duration::from_millis(999)] {
            let result = CacheConfig::new(ttl, None, None);
            assert!(matches!(result, Err(Error::InvalidTtl(t)) if t == ttl));
        }
    }

    #[test]
    fn test_new_config_keeps_explicit_options() {
        let options = EngineOptions::default().with_cache_capacity(8 * 1024 * 1024);
        let policy = GcPolicy::new(Duration::from_secs(5), 0.25).unwrap();

        let config =
            CacheConfig::new(Duration::from_secs(30), Some(options.clone()), Some(policy)).unwrap();

        assert_eq!(config.engine_options(), &options);
        assert_eq!(config.gc_policy(), &policy);
    }

    #[test]
    fn test_gc_policy_validation() {
        assert!(GcPolicy::new(Duration::from_secs(1), 0.0).is_ok());
        assert!(GcPolicy::new(Duration::from_secs(1), 1.0).is_ok());
        assert!(matches!(
            GcPolicy::new(Duration::ZERO, 0.5),
            Err(Error::InvalidGcPolicy(_))
        ));
        for ratio in [-0.1, 1.5, f64::NAN] {
            assert!(matches!(
                GcPolicy::new(Duration::from_secs(1), ratio),
                Err(Error::InvalidGcPolicy(_))
            ));
        }
    }

    #[test]
    fn test_new_config_rejects_invalid_gc_policy() {
        let policy = GcPolicy {
            frequency: Duration::ZERO,
            discard_ratio: 0.5,
        };
        let result = CacheConfig::new(Duration::ZERO, None, Some(policy));
        assert!(matches!(result, Err(Error::InvalidGcPolicy(_))));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            data_dir: "./data".to_string(),
            default_ttl: Duration::from_secs(10),
            gc_frequency: Duration::from_secs(30),
            gc_discard_ratio: 0.75,
            cache_capacity_bytes: 4096,
            flush_every_ms: None,
        };

        let config = CacheConfig::from_settings(&settings).unwrap();
        assert_eq!(config.default_ttl(), Duration::from_secs(10));
        assert_eq!(config.gc_policy().frequency, Duration::from_secs(30));
        assert_eq!(config.gc_policy().discard_ratio, 0.75);
        assert_eq!(config.engine_options().cache_capacity_bytes, 4096);
        assert_eq!(config.engine_options().flush_every_ms, None);
    }
}
