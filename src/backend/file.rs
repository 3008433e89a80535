//! Flat JSON file backend
//!
//! The whole dataset lives in one JSON document. Writes go to a sibling
//! temp file first and are renamed into place so a crash mid-write never
//! leaves a truncated document behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BackendStats, CatalogBackend, SaveMode};
use crate::error::StorageError;
use crate::model::Dataset;

/// Dataset stored as a single JSON document
pub struct FileBackend {
    path: PathBuf,
    pretty: bool,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Create a file backend, ensuring the parent directory exists
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!(path = %path.display(), "Initialized file backend");

        Ok(Self {
            path,
            pretty: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Pretty-print the written document
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    async fn read_stored(&self) -> Result<Option<Dataset>, StorageError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_stored(&self, dataset: &Dataset) -> Result<(), StorageError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(dataset)?
        } else {
            serde_json::to_vec(dataset)?
        };

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), size = bytes.len(), "Wrote dataset document");
        Ok(())
    }
}

#[async_trait]
impl CatalogBackend for FileBackend {
    async fn load(&self) -> Result<Dataset, StorageError> {
        Ok(self.read_stored().await?.unwrap_or_else(Dataset::empty))
    }

    async fn save(&self, dataset: &Dataset, mode: SaveMode) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut stored = match mode {
            SaveMode::Full => Dataset::empty(),
            _ => self.read_stored().await?.unwrap_or_else(Dataset::empty),
        };
        stored.apply_write(dataset, mode);
        self.write_stored(&stored).await?;
        Ok(true)
    }

    async fn delete_guideline(&self, id: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;

        let Some(mut stored) = self.read_stored().await? else {
            return Ok(false);
        };
        let before = stored.guidelines.len();
        stored.guidelines.retain(|g| g.id != id);
        if stored.guidelines.len() == before {
            return Ok(false);
        }
        stored.last_updated = crate::model::timestamp_now();
        self.write_stored(&stored).await?;
        Ok(true)
    }

    async fn stats(&self) -> Result<BackendStats, StorageError> {
        let stored = self.read_stored().await?;
        BackendStats::from_stored(stored.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CategoryEntry, Guideline};
    use tempfile::TempDir;

    fn guideline(id: &str) -> Guideline {
        Guideline {
            id: id.to_string(),
            title: id.to_uppercase(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path().join("nested/catalog.json"))
            .await
            .unwrap();

        let dataset = backend.load().await.unwrap();
        assert!(dataset.is_empty());
        assert!(!backend.delete_guideline("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_full_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path().join("catalog.json"))
            .await
            .unwrap()
            .with_pretty(false);

        let mut dataset = Dataset::empty();
        dataset.guidelines = vec![guideline("g1"), guideline("g2")];
        dataset.categories = vec![CategoryEntry::Named("UX".to_string())];
        assert!(backend.save(&dataset, SaveMode::Full).await.unwrap());

        let reloaded = backend.load().await.unwrap();
        assert_eq!(reloaded.guidelines, dataset.guidelines);
        assert_eq!(reloaded.categories, dataset.categories);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.guidelines, 2);
        assert_eq!(stats.categories, 1);
        assert!(stats.checksum.unwrap().starts_with("sha256-"));
    }

    #[tokio::test]
    async fn test_chunked_writes_accumulate() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path().join("catalog.json"))
            .await
            .unwrap();

        let mut first = Dataset::empty();
        first.guidelines = vec![guideline("a")];
        let first_mode = SaveMode::Chunk {
            index: 1,
            total: 2,
            reset: true,
        };
        backend.save(&first, first_mode).await.unwrap();

        let mut second = Dataset::empty();
        second.guidelines = vec![guideline("b")];
        let second_mode = SaveMode::Chunk {
            index: 2,
            total: 2,
            reset: true,
        };
        backend.save(&second, second_mode).await.unwrap();

        let reloaded = backend.load().await.unwrap();
        assert_eq!(reloaded.guidelines.len(), 2);

        assert!(backend.delete_guideline("a").await.unwrap());
        assert_eq!(backend.load().await.unwrap().guidelines.len(), 1);
    }
}
