use std::time::Duration;

use serde::{Deserialize, Serialize};

use prefab_scene::{NODE_NAME, NODE_POSITION, NODE_ROTATION, NODE_SCALE};

use crate::error::{SyncError, SyncResult};

/// Configuration for the synchronization orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Window within which property changes to the same `(node, path)` are
    /// coalesced.
    pub debounce_ms: u64,
    /// Upper bound on the wait for a requested full reload.
    pub reload_timeout_ms: u64,
    /// Root fields every instance keeps as overrides regardless of apply or
    /// revert.
    pub reserved_root_properties: Vec<String>,
    /// Whether revert finishes with a full scene reload.
    pub reload_after_revert: bool,
    /// Capacity of the edit notice channel.
    pub notice_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            reload_timeout_ms: 3000,
            reserved_root_properties: [NODE_NAME, NODE_POSITION, NODE_ROTATION, NODE_SCALE]
                .into_iter()
                .map(String::from)
                .collect(),
            reload_after_revert: true,
            notice_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.reload_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig("reload_timeout_ms must be positive".into()));
        }
        if self.notice_capacity == 0 {
            return Err(SyncError::InvalidConfig("notice_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Coalescing window for property changes.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Upper bound on a full reload.
    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }

    /// Whether `field` is a reserved root field.
    pub fn is_reserved(&self, field: &str) -> bool {
        self.reserved_root_properties.iter().any(|f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert!(config.is_reserved("position"));
        assert!(!config.is_reserved("active"));
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str("debounce_ms = 10\nreload_after_revert = false\n").unwrap();
        assert_eq!(config.debounce_ms, 10);
        assert!(!config.reload_after_revert);
        assert_eq!(config.reload_timeout_ms, 3000);
        assert_eq!(config.reserved_root_properties.len(), 4);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = SyncConfig::from_toml_str("reload_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
        assert!(matches!(
            SyncConfig::from_toml_str("debounce_ms = \"soon\"").unwrap_err(),
            SyncError::ConfigParse(_)
        ));
    }
}
