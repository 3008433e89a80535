//! Persistence orchestrator
//!
//! Writes a dataset to a [`CatalogBackend`] in one call, or, when the
//! serialized document is larger than the configured threshold, as a
//! sequence of guideline chunks followed by one final write carrying
//! categories and principles.
//!
//! Chunks are written strictly one at a time and in order. A failure at
//! chunk `k` leaves chunks `1..k-1` persisted; nothing is rolled back.
//! Only a [`WriteIntent::Replace`] sequence clears stored guidelines, so a
//! failed merge never loses guidelines the import did not carry.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::backend::{CatalogBackend, SaveMode};
use crate::error::StorageError;
use crate::model::Dataset;
use crate::progress::{ImportStage, ImportStats, ProgressReporter};

/// Default size above which a dataset is persisted in chunks (5 MiB)
pub const DEFAULT_CHUNK_THRESHOLD_BYTES: usize = 5 * 1024 * 1024;

/// Default number of guidelines per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Chunking policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOptions {
    pub chunk_threshold_bytes: usize,
    pub chunk_size: usize,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            chunk_threshold_bytes: DEFAULT_CHUNK_THRESHOLD_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// How a chunked write treats guidelines already in the store.
///
/// Either way the dataset handed to [`Persister::persist`] is the complete
/// state to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteIntent {
    /// Stored guidelines missing from the dataset are dropped
    Replace,
    /// Chunks only upsert into the stored guidelines
    Upsert,
}

/// What a successful persist did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub chunked: bool,
    /// Guideline chunks written (0 for a single write)
    pub chunks: usize,
    /// Serialized size of the dataset
    pub bytes: usize,
    pub stats: ImportStats,
}

/// Writes datasets to a backend under a chunking policy
pub struct Persister {
    backend: Arc<dyn CatalogBackend>,
    options: PersistOptions,
}

impl Persister {
    pub fn new(backend: Arc<dyn CatalogBackend>, options: PersistOptions) -> Self {
        Self {
            backend,
            options: PersistOptions {
                chunk_size: options.chunk_size.max(1),
                ..options
            },
        }
    }

    /// Persist `dataset`, choosing single or chunked writes by size
    pub async fn persist(
        &self,
        dataset: &Dataset,
        intent: WriteIntent,
        reporter: &ProgressReporter<'_>,
    ) -> Result<PersistOutcome, StorageError> {
        let bytes = dataset.serialized_len()?;
        let chunked = bytes > self.options.chunk_threshold_bytes && !dataset.guidelines.is_empty();

        reporter.stage(
            ImportStage::Saving,
            60,
            if chunked {
                format!("Saving {} bytes in chunks", bytes)
            } else {
                "Saving dataset".to_string()
            },
        );

        let chunks = if chunked {
            self.persist_chunked(dataset, bytes, intent, reporter).await?
        } else {
            self.persist_single(dataset, bytes).await?;
            0
        };

        Ok(PersistOutcome {
            chunked,
            chunks,
            bytes,
            stats: dataset.counts(),
        })
    }

    async fn persist_single(&self, dataset: &Dataset, bytes: usize) -> Result<(), StorageError> {
        let start = Instant::now();
        if !self.backend.save(dataset, SaveMode::Full).await? {
            error!(bytes, "Backend rejected dataset write");
            return Err(StorageError::WriteRejected("save".to_string()));
        }
        info!(
            bytes,
            guidelines = dataset.guidelines.len(),
            duration_ms = start.elapsed().as_millis(),
            "Dataset saved"
        );
        Ok(())
    }

    async fn persist_chunked(
        &self,
        dataset: &Dataset,
        bytes: usize,
        intent: WriteIntent,
        reporter: &ProgressReporter<'_>,
    ) -> Result<usize, StorageError> {
        let chunk_size = self.options.chunk_size;
        let total = dataset.guidelines.len().div_ceil(chunk_size);
        let batch_start = Instant::now();

        info!(
            bytes,
            threshold = self.options.chunk_threshold_bytes,
            guidelines = dataset.guidelines.len(),
            chunk_size,
            total_chunks = total,
            ?intent,
            "Dataset exceeds size threshold, saving in chunks"
        );

        for (offset, chunk) in dataset.guidelines.chunks(chunk_size).enumerate() {
            let index = offset + 1;
            let partial = Dataset {
                guidelines: chunk.to_vec(),
                categories: dataset.categories.clone(),
                principles: dataset.principles.clone(),
                last_updated: dataset.last_updated.clone(),
                version: dataset.version.clone(),
                export_date: None,
            };

            let chunk_start = Instant::now();
            debug!(chunk = index, total_chunks = total, items = chunk.len(), "CHUNK_START: Saving guideline chunk");

            let mode = SaveMode::Chunk {
                index,
                total,
                reset: intent == WriteIntent::Replace,
            };
            let reason = match self.backend.save(&partial, mode).await {
                Ok(true) => None,
                Ok(false) => Some("backend rejected the write".to_string()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = reason {
                error!(
                    chunk = index,
                    total_chunks = total,
                    items = chunk.len(),
                    duration_ms = chunk_start.elapsed().as_millis(),
                    error = %reason,
                    "CHUNK_ERROR: Guideline chunk failed"
                );
                return Err(StorageError::ChunkFailed { index, total, reason });
            }

            info!(
                chunk = index,
                total_chunks = total,
                items = chunk.len(),
                duration_ms = chunk_start.elapsed().as_millis(),
                "CHUNK_OK: Guideline chunk saved"
            );

            let progress = 60 + (20 * index / total) as u8;
            reporter.stage(
                ImportStage::SavingGuidelines,
                progress,
                format!("Saved chunk {} of {}", index, total),
            );
        }

        reporter.stage(ImportStage::SavingFinal, 80, "Saving categories and principles");
        let closing = Dataset {
            guidelines: Vec::new(),
            ..dataset.clone()
        };
        if !self.backend.save(&closing, SaveMode::Finalize).await? {
            error!(total_chunks = total, "Backend rejected final write");
            return Err(StorageError::WriteRejected("final write".to_string()));
        }

        info!(
            total_chunks = total,
            duration_ms = batch_start.elapsed().as_millis(),
            "Chunked save complete"
        );
        Ok(total)
    }
}
