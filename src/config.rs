//! Store configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::btree::MIN_MAX_KEYS;
use crate::error::{Result, StoreError};

/// B-tree sizing and durability settings applied to newly created stores.
///
/// Trees persist their own capacity, so an existing store keeps the sizing
/// it was created with regardless of the configuration used to open it.
///
/// # Example
///
/// ```
/// use quadstore::StoreConfig;
///
/// let config: StoreConfig = serde_json::from_str(r#"{"related_list_max_keys": 15}"#).unwrap();
/// assert_eq!(config.related_list_max_keys, 15);
/// assert_eq!(config.resource_index_max_keys, 127);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Capacity of resource index nodes
    #[serde(default = "default_resource_index_max_keys")]
    pub resource_index_max_keys: usize,
    /// Capacity of predicate and anchor tree nodes
    #[serde(default = "default_predicate_index_max_keys")]
    pub predicate_index_max_keys: usize,
    /// Capacity of related-resource list nodes
    #[serde(default = "default_related_list_max_keys")]
    pub related_list_max_keys: usize,
    /// fsync the data and master files at every commit
    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,
}

fn default_resource_index_max_keys() -> usize {
    127
}

fn default_predicate_index_max_keys() -> usize {
    63
}

fn default_related_list_max_keys() -> usize {
    31
}

fn default_sync_on_commit() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            resource_index_max_keys: default_resource_index_max_keys(),
            predicate_index_max_keys: default_predicate_index_max_keys(),
            related_list_max_keys: default_related_list_max_keys(),
            sync_on_commit: default_sync_on_commit(),
        }
    }
}

impl StoreConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("resource_index_max_keys", self.resource_index_max_keys),
            ("predicate_index_max_keys", self.predicate_index_max_keys),
            ("related_list_max_keys", self.related_list_max_keys),
        ] {
            if value < MIN_MAX_KEYS {
                return Err(StoreError::InvalidConfig(format!(
                    "{} must be >= {}, got {}",
                    name, MIN_MAX_KEYS, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.sync_on_commit);
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quadstore.json");
        std::fs::write(&path, r#"{ "predicate_index_max_keys": 9, "sync_on_commit": false }"#).unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.predicate_index_max_keys, 9);
        assert_eq!(config.related_list_max_keys, 31);
        assert!(!config.sync_on_commit);
    }

    #[test]
    fn test_rejects_tiny_nodes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quadstore.json");
        std::fs::write(&path, r#"{ "related_list_max_keys": 2 }"#).unwrap();
        assert!(matches!(
            StoreConfig::from_file(&path),
            Err(StoreError::InvalidConfig(_))
        ));
    }
}
