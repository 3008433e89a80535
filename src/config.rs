//! Configuration for catalog-storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::StorageError;
use crate::persist::PersistOptions;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog-storage")
}

/// Which persistence backend holds the canonical dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single JSON document on disk
    File,
    /// Embedded sled database
    Sled,
    /// Process-local, lost on exit
    Memory,
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "sled" => Ok(Self::Sled),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(StorageError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the dataset
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Backend holding the dataset
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Serialized size above which persistence switches to chunked writes
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_bytes: usize,

    /// Guidelines per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pretty-print the JSON document written by the file backend
    #[serde(default = "default_true")]
    pub pretty_json: bool,
}

fn default_backend() -> BackendKind {
    BackendKind::File
}

fn default_chunk_threshold() -> usize {
    5 * 1024 * 1024
}

fn default_chunk_size() -> usize {
    50
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            backend: default_backend(),
            chunk_threshold_bytes: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
            pretty_json: true,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Path of the JSON document used by the file backend
    pub fn dataset_path(&self) -> PathBuf {
        self.storage_dir.join("catalog.json")
    }

    /// Path of the sled database used by the sled backend
    pub fn sled_path(&self) -> PathBuf {
        self.storage_dir.join("catalog.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Persistence options derived from this config
    pub fn persist_options(&self) -> PersistOptions {
        PersistOptions {
            chunk_threshold_bytes: self.chunk_threshold_bytes,
            chunk_size: self.chunk_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.chunk_threshold_bytes, 5 * 1024 * 1024);
        assert_eq!(config.chunk_size, 50);
        assert!(config.dataset_path().ends_with("catalog.json"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("backend = \"sled\"\nchunk_size = 10\n").unwrap();
        assert_eq!(config.backend, BackendKind::Sled);
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.chunk_threshold_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.storage_dir = temp_dir.path().to_path_buf();
        config.backend = BackendKind::Memory;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.backend, BackendKind::Memory);
        assert_eq!(loaded.storage_dir, temp_dir.path());
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("JSON".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("sled".parse::<BackendKind>().unwrap(), BackendKind::Sled);
        assert!("postgres".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_persist_options_never_zero_chunk() {
        let mut config = Config::default();
        config.chunk_size = 0;
        assert_eq!(config.persist_options().chunk_size, 1);
    }
}
