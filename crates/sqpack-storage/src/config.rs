//! Configuration for the data store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, StorageError};

/// Configuration for the data store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatConfig {
    /// Directory holding the `*.win32.dat*` container files
    pub base_path: PathBuf,

    /// Per-container size ceiling; detected from the filesystem when unset
    pub max_container_size: Option<u64>,

    /// Delay before the single retry of a failed write (in milliseconds)
    pub write_retry_delay_ms: u64,
}

impl Default for DatConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./sqpack/ffxiv"),
            max_container_size: None,
            write_retry_delay_ms: 100,
        }
    }
}

impl DatConfig {
    /// Create a new configuration with the specified base path
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))
    }

    /// Set the base path for container files
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.base_path = path.as_ref().to_path_buf();
        self
    }

    /// Override the per-container size ceiling
    #[must_use]
    pub const fn with_max_container_size(mut self, size: u64) -> Self {
        self.max_container_size = Some(size);
        self
    }

    /// Set the delay before retrying a failed write
    #[must_use]
    pub const fn with_write_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.write_retry_delay_ms = delay_ms;
        self
    }

    /// Delay before retrying a failed write
    pub const fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builder() {
        let config = DatConfig::new("/game/sqpack/ffxiv")
            .with_max_container_size(1 << 20)
            .with_write_retry_delay_ms(5);
        assert_eq!(config.base_path, PathBuf::from("/game/sqpack/ffxiv"));
        assert_eq!(config.max_container_size, Some(1 << 20));
        assert_eq!(config.write_retry_delay(), Duration::from_millis(5));
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("dat.json");
        std::fs::write(&path, r#"{ "base_path": "/srv/ffxiv" }"#).expect("write config");

        let config = DatConfig::from_json_file(&path).expect("load config");
        assert_eq!(config.base_path, PathBuf::from("/srv/ffxiv"));
        assert_eq!(config.max_container_size, None);
        assert_eq!(config.write_retry_delay_ms, 100);
    }

    #[test]
    fn test_from_json_file_rejects_garbage() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("dat.json");
        std::fs::write(&path, "not json").expect("write config");
        assert!(matches!(
            DatConfig::from_json_file(&path),
            Err(StorageError::Config(_))
        ));
    }
}
