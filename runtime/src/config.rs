use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Store settings. Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Recorded on every dispatch span as `tessera.store`.
    pub name: String,
    /// Queued-but-unfinished dispatches above which a warning is logged.
    pub queue_warn_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            queue_warn_depth: 64,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse store config")
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        assert_eq!(StoreConfig::from_toml_str("").unwrap(), StoreConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = StoreConfig::from_toml_str("name = \"cart\"").unwrap();
        assert_eq!(config.name, "cart");
        assert_eq!(config.queue_warn_depth, 64);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = StoreConfig::from_toml_str("queue_depth = 3").unwrap_err();
        assert!(err.to_string().contains("store config"));
    }

    #[test]
    fn test_missing_file() {
        let err = StoreConfig::load(Path::new("/nonexistent/tessera.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
