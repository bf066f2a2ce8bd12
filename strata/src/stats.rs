use serde::Serialize;
use std::collections::BTreeMap;

/// Storage size snapshot keyed by metric name.
///
/// `LSMSize` (index bytes) and `VLogSize` (value log bytes) are always
/// present; both are byte counts read from disk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Stats(BTreeMap<String, u64>);

impl Stats {
    pub const LSM_SIZE: &str = "LSMSize";
    pub const VLOG_SIZE: &str = "VLogSize";

    pub fn new(lsm_size: u64, vlog_size: u64) -> Self {
        Self(BTreeMap::from([
            (Self::LSM_SIZE.to_string(), lsm_size),
            (Self::VLOG_SIZE.to_string(), vlog_size),
        ]))
    }

    pub fn lsm_size(&self) -> u64 {
        self.get(Self::LSM_SIZE).unwrap_or(0)
    }

    pub fn vlog_size(&self) -> u64 {
        self.get(Self::VLOG_SIZE).unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.lsm_size() + self.vlog_size()
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_keys() {
        let stats = Stats::new(10, 32);
        assert_eq!(stats.get("LSMSize"), Some(10));
        assert_eq!(stats.get("VLogSize"), Some(32));
        assert_eq!(stats.lsm_size(), 10);
        assert_eq!(stats.vlog_size(), 32);
        assert_eq!(stats.total(), 42);
        assert_eq!(stats.get("Other"), None);
        assert_eq!(stats.iter().count(), 2);
    }

    #[test]
    fn test_stats_serializes_as_flat_map() {
        let json = serde_json::to_value(Stats::new(0, 0)).unwrap();
        assert_eq!(json, serde_json::json!({"LSMSize": 0, "VLogSize": 0}));
    }
}
