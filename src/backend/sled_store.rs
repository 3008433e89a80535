//! Sled-backed dataset storage
//!
//! The dataset is a single record under a fixed logical key; every write
//! overwrites that record. There is no version check, so the last writer wins.

use async_trait::async_trait;
use sled::Db;
use std::path::Path;
use tracing::{debug, info};

use super::{BackendStats, CatalogBackend, SaveMode};
use crate::error::StorageError;
use crate::model::{timestamp_now, Dataset};

/// Fixed key of the dataset record
const DATASET_KEY: &[u8] = b"catalog:dataset";

/// Dataset stored in an embedded sled database
pub struct SledBackend {
    db: Db,
}

impl SledBackend {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened sled backend");
        Ok(Self { db })
    }

    /// Temporary database for tests
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn read_stored(&self) -> Result<Option<Dataset>, StorageError> {
        match self.db.get(DATASET_KEY)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn write_stored(&self, dataset: &Dataset) -> Result<(), StorageError> {
        let value = serde_json::to_vec(dataset)?;
        self.db.insert(DATASET_KEY, value)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogBackend for SledBackend {
    async fn load(&self) -> Result<Dataset, StorageError> {
        Ok(self.read_stored()?.unwrap_or_else(Dataset::empty))
    }

    async fn save(&self, dataset: &Dataset, mode: SaveMode) -> Result<bool, StorageError> {
        let mut stored = match mode {
            SaveMode::Full => Dataset::empty(),
            _ => self.read_stored()?.unwrap_or_else(Dataset::empty),
        };
        stored.apply_write(dataset, mode);
        self.write_stored(&stored).await?;
        debug!(?mode, "Saved dataset record");
        Ok(true)
    }

    async fn delete_guideline(&self, id: &str) -> Result<bool, StorageError> {
        let Some(mut stored) = self.read_stored()? else {
            return Ok(false);
        };
        let before = stored.guidelines.len();
        stored.guidelines.retain(|g| g.id != id);
        if stored.guidelines.len() == before {
            return Ok(false);
        }
        stored.last_updated = timestamp_now();
        self.write_stored(&stored).await?;
        Ok(true)
    }

    async fn stats(&self) -> Result<BackendStats, StorageError> {
        BackendStats::from_stored(self.read_stored()?.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Guideline, Principle};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.sled");

        {
            let backend = SledBackend::open(&path).unwrap();
            let mut dataset = Dataset::empty();
            dataset.principles.push(Principle {
                id: "p1".to_string(),
                name: "Framing".to_string(),
                ..Default::default()
            });
            assert!(backend.save(&dataset, SaveMode::Full).await.unwrap());
        }

        let backend = SledBackend::open(&path).unwrap();
        let dataset = backend.load().await.unwrap();
        assert_eq!(dataset.principles.len(), 1);
        assert_eq!(dataset.principles[0].name, "Framing");
    }

    #[tokio::test]
    async fn test_finalize_keeps_guidelines() {
        let backend = SledBackend::temporary().unwrap();

        let mut chunk = Dataset::empty();
        chunk.guidelines.push(Guideline {
            id: "g1".to_string(),
            ..Default::default()
        });
        let mode = SaveMode::Chunk {
            index: 1,
            total: 1,
            reset: false,
        };
        backend.save(&chunk, mode).await.unwrap();
        backend.save(&Dataset::empty(), SaveMode::Finalize).await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.guidelines, 1);
        assert_eq!(stats.principles, 0);
        assert!(backend.delete_guideline("g1").await.unwrap());
    }
}
