//! In-process backend

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{BackendStats, CatalogBackend, SaveMode};
use crate::error::StorageError;
use crate::model::{timestamp_now, Dataset};

/// Dataset held in memory; nothing survives the process
pub struct MemoryBackend {
    dataset: RwLock<Option<Dataset>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            dataset: RwLock::new(None),
        }
    }

    /// Start with an already stored dataset
    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            dataset: RwLock::new(Some(dataset)),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogBackend for MemoryBackend {
    async fn load(&self) -> Result<Dataset, StorageError> {
        let stored = self.dataset.read().await;
        Ok(stored.clone().unwrap_or_else(Dataset::empty))
    }

    async fn save(&self, dataset: &Dataset, mode: SaveMode) -> Result<bool, StorageError> {
        let mut stored = self.dataset.write().await;
        stored
            .get_or_insert_with(Dataset::empty)
            .apply_write(dataset, mode);
        debug!(?mode, guidelines = dataset.guidelines.len(), "Saved dataset in memory");
        Ok(true)
    }

    async fn delete_guideline(&self, id: &str) -> Result<bool, StorageError> {
        let mut stored = self.dataset.write().await;
        let Some(dataset) = stored.as_mut() else {
            return Ok(false);
        };
        let before = dataset.guidelines.len();
        dataset.guidelines.retain(|g| g.id != id);
        if dataset.guidelines.len() == before {
            return Ok(false);
        }
        dataset.last_updated = timestamp_now();
        Ok(true)
    }

    async fn stats(&self) -> Result<BackendStats, StorageError> {
        let stored = self.dataset.read().await;
        BackendStats::from_stored(stored.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Guideline;

    #[tokio::test]
    async fn test_load_empty_backend() {
        let backend = MemoryBackend::new();
        let dataset = backend.load().await.unwrap();
        assert!(dataset.is_empty());
        assert_eq!(dataset.version, "2.0");

        let stats = backend.stats().await.unwrap();
        assert!(stats.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_save_and_delete() {
        let backend = MemoryBackend::new();
        let mut dataset = Dataset::empty();
        dataset.guidelines.push(Guideline {
            id: "g1".to_string(),
            ..Default::default()
        });

        assert!(backend.save(&dataset, SaveMode::Full).await.unwrap());
        assert_eq!(backend.stats().await.unwrap().guidelines, 1);

        assert!(backend.delete_guideline("g1").await.unwrap());
        assert!(!backend.delete_guideline("g1").await.unwrap());
        assert!(backend.load().await.unwrap().guidelines.is_empty());
    }
}
