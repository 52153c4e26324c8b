//! Generator configuration.

use serde::{Deserialize, Serialize};
use statedb_storage::DEFAULT_IDEAL_BATCH_SIZE;

/// Snapshot generator configuration.
///
/// The range sizes bound how much data a single proof covers. Larger ranges
/// amortize proving overhead but fail more often against a drifting mirror;
/// smaller ranges recover faster at higher per-segment cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Upper limit of accounts covered by one range check.
    #[serde(default = "default_account_check_range")]
    pub account_check_range: usize,
    /// Upper limit of storage slots covered by one range check.
    #[serde(default = "default_storage_check_range")]
    pub storage_check_range: usize,
    /// Batch size (accumulated key/value bytes) that triggers a flush
    /// checkpoint. Interruption latency is bounded by one batch.
    #[serde(default = "default_ideal_batch_size")]
    pub ideal_batch_size: usize,
}

fn default_account_check_range() -> usize {
    128
}

fn default_storage_check_range() -> usize {
    1024
}

fn default_ideal_batch_size() -> usize {
    DEFAULT_IDEAL_BATCH_SIZE
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            account_check_range: default_account_check_range(),
            storage_check_range: default_storage_check_range(),
            ideal_batch_size: default_ideal_batch_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.account_check_range, 128);
        assert_eq!(config.storage_check_range, 1024);
        assert_eq!(config.ideal_batch_size, DEFAULT_IDEAL_BATCH_SIZE);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GeneratorConfig =
            serde_json::from_str(r#"{"account_check_range": 4}"#).unwrap();
        assert_eq!(config.account_check_range, 4);
        assert_eq!(config.storage_check_range, 1024);
    }
}
