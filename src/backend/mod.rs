//! Persistence backends for the canonical dataset
//!
//! The import engine only ever talks to a [`CatalogBackend`]; where the
//! dataset actually lives is decided at startup from [`Config`].
//!
//! ## Write modes
//!
//! ```text
//! SaveMode::Full                      replace the stored dataset
//! SaveMode::Chunk { 1, n, reset }     clear stored guidelines, upsert this chunk
//! SaveMode::Chunk { k, n, .. }        upsert this chunk's guidelines by id
//! SaveMode::Finalize                  replace categories + principles, keep guidelines
//! ```
//!
//! A write that the backend refuses for an ordinary reason returns
//! `Ok(false)`; `Err` is reserved for unexpected failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::{BackendKind, Config};
use crate::error::StorageError;
use crate::model::Dataset;

pub mod file;
pub mod memory;
pub mod sled_store;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sled_store::SledBackend;

/// How a save call applies to the stored dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SaveMode {
    /// Complete dataset, replaces whatever is stored
    Full,
    /// One guideline chunk of an incremental write (1-indexed). With
    /// `reset`, the first chunk clears the stored guidelines; otherwise
    /// chunks only upsert.
    Chunk {
        index: usize,
        total: usize,
        reset: bool,
    },
    /// Closing write of an incremental sequence: categories and principles
    Finalize,
}

/// Summary of the stored dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStats {
    pub last_updated: Option<String>,
    pub version: Option<String>,
    pub guidelines: usize,
    pub principles: usize,
    pub categories: usize,
    /// `sha256-<hex>` of the stored document
    pub checksum: Option<String>,
}

impl BackendStats {
    /// Stats for a stored dataset, or the empty stats when nothing is stored
    pub fn from_stored(dataset: Option<&Dataset>) -> Result<Self, StorageError> {
        let Some(dataset) = dataset else {
            return Ok(Self::default());
        };
        let counts = dataset.counts();
        Ok(Self {
            last_updated: Some(dataset.last_updated.clone()),
            version: Some(dataset.version.clone()),
            guidelines: counts.guidelines,
            principles: counts.principles,
            categories: counts.categories,
            checksum: Some(compute_checksum(&serde_json::to_vec(dataset)?)),
        })
    }
}

/// Compute SHA256 checksum of a stored document
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

/// Storage for the canonical dataset
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// Current stored dataset, or [`Dataset::empty`] if none exists yet
    async fn load(&self) -> Result<Dataset, StorageError>;

    /// Persist `dataset` according to `mode`
    async fn save(&self, dataset: &Dataset, mode: SaveMode) -> Result<bool, StorageError>;

    /// Remove one guideline; `Ok(false)` if it did not exist
    async fn delete_guideline(&self, id: &str) -> Result<bool, StorageError>;

    async fn stats(&self) -> Result<BackendStats, StorageError>;
}

/// Open the backend selected by `config`
pub async fn open_backend(config: &Config) -> Result<Arc<dyn CatalogBackend>, StorageError> {
    let backend: Arc<dyn CatalogBackend> = match config.backend {
        BackendKind::File => Arc::new(
            FileBackend::new(config.dataset_path())
                .await?
                .with_pretty(config.pretty_json),
        ),
        BackendKind::Sled => Arc::new(SledBackend::open(config.sled_path())?),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    Ok(backend)
}
