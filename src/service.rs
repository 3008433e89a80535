//! Import service
//!
//! The entry point callers use: validation, import, export, deletion and
//! stats over one explicitly constructed backend. Every operation that
//! can fail returns a result value; errors are flattened at this boundary
//! into `"<stage>: <message>"` strings.
//!
//! ```text
//! validate_json_data ─► repair ─► parse ─► validate
//! import_data        ─► filter ─► [load ─► merge] ─► persist
//! import_json        ─► validate_json_data ─► import_data
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::backend::{open_backend, BackendStats, CatalogBackend};
use crate::config::Config;
use crate::error::StorageError;
use crate::merge::{merge_dataset, merge_principles, MergeStrategy};
use crate::model::{timestamp_now, Dataset, Principle};
use crate::persist::{PersistOptions, Persister, WriteIntent};
use crate::progress::{
    ImportProgress, ImportResult, ImportStage, ImportStats, ProgressCallback, ProgressReporter,
};
use crate::validate::{validate_json_text, ValidationResult};

/// Broadcast channel capacity for progress events
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Which collections take part in an import, and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub guidelines: bool,
    pub principles: bool,
    pub categories: bool,
    pub strategy: MergeStrategy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            guidelines: true,
            principles: true,
            categories: true,
            strategy: MergeStrategy::Merge,
        }
    }
}

impl ImportOptions {
    pub fn replace_mode(&self) -> bool {
        self.strategy == MergeStrategy::Replace
    }

    /// Drop unselected collections from `dataset`
    pub fn filter(&self, mut dataset: Dataset) -> Dataset {
        if !self.guidelines {
            dataset.guidelines.clear();
        }
        if !self.principles {
            dataset.principles.clear();
        }
        if !self.categories {
            dataset.categories.clear();
        }
        dataset
    }
}

/// An error tagged with the stage it happened in
#[derive(Debug)]
struct StageFailure {
    stage: &'static str,
    error: StorageError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

trait AtStage<T> {
    fn at(self, stage: &'static str) -> Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T, StorageError> {
    fn at(self, stage: &'static str) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

fn finish(operation: &str, outcome: Result<ImportStats, StageFailure>) -> ImportResult {
    match outcome {
        Ok(stats) => ImportResult::succeeded(stats),
        Err(failure) => {
            error!(operation, stage = failure.stage, error = %failure.error, "Operation failed");
            ImportResult::failed(failure.to_string())
        }
    }
}

/// Import, export and maintenance operations over one backend
pub struct ImportService {
    backend: Arc<dyn CatalogBackend>,
    persister: Persister,
    progress_tx: broadcast::Sender<ImportProgress>,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
}

impl ImportService {
    pub fn new(backend: Arc<dyn CatalogBackend>, options: PersistOptions) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            persister: Persister::new(backend.clone(), options),
            backend,
            progress_tx,
            write_lock: Mutex::new(()),
        }
    }

    /// Open the configured backend and build a service on it
    pub async fn open(config: &Config) -> Result<Self, StorageError> {
        let backend = open_backend(config).await?;
        info!(
            backend = ?config.backend,
            storage_dir = %config.storage_dir.display(),
            "Import service ready"
        );
        Ok(Self::new(backend, config.persist_options()))
    }

    /// Receive every progress event emitted by this service
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ImportProgress> {
        self.progress_tx.subscribe()
    }

    fn reporter<'a>(&self, on_progress: Option<ProgressCallback<'a>>) -> ProgressReporter<'a> {
        ProgressReporter::new(on_progress).with_broadcast(self.progress_tx.clone())
    }

    /// Repair, parse and validate `text` without touching storage
    pub fn validate_json_data(
        &self,
        text: &str,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> ValidationResult {
        let result = validate_json_text(text, &self.reporter(on_progress));
        if !result.valid {
            warn!(error = ?result.error, corrections = result.corrections.len(), "Validation failed");
        }
        result
    }

    /// Import `dataset` under `options`
    pub async fn import_data(
        &self,
        dataset: Dataset,
        options: ImportOptions,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> ImportResult {
        let reporter = self.reporter(on_progress);
        let start = Instant::now();
        let _guard = self.write_lock.lock().await;

        let outcome = self.run_import(dataset, options, &reporter).await;
        if let Ok(stats) = &outcome {
            reporter.stage(ImportStage::Completed, 100, "Import complete");
            info!(
                strategy = %options.strategy,
                guidelines = stats.guidelines,
                principles = stats.principles,
                categories = stats.categories,
                duration_ms = start.elapsed().as_millis(),
                "Import complete"
            );
        }
        finish("import", outcome)
    }

    async fn run_import(
        &self,
        dataset: Dataset,
        options: ImportOptions,
        reporter: &ProgressReporter<'_>,
    ) -> Result<ImportStats, StageFailure> {
        reporter.stage(ImportStage::Preparing, 10, "Preparing import");

        reporter.stage(ImportStage::Filtering, 20, "Selecting collections");
        let incoming = options.filter(dataset);
        if incoming.is_empty() {
            return Err(StorageError::NoImportableData(
                "none of the selected collections has content".to_string(),
            ))
            .at(ImportStage::Filtering.as_str());
        }

        let (target, intent) = if options.replace_mode() {
            (
                merge_dataset(&Dataset::empty(), &incoming, MergeStrategy::Replace),
                WriteIntent::Replace,
            )
        } else {
            reporter.stage(ImportStage::LoadingCurrent, 30, "Loading current dataset");
            let current = self
                .backend
                .load()
                .await
                .at(ImportStage::LoadingCurrent.as_str())?;

            reporter.stage(
                ImportStage::Merging,
                40,
                format!("Merging with strategy '{}'", options.strategy),
            );
            (
                merge_dataset(&current, &incoming, options.strategy),
                WriteIntent::Upsert,
            )
        };

        self.save(&target, intent, reporter).await
    }

    async fn save(
        &self,
        dataset: &Dataset,
        intent: WriteIntent,
        reporter: &ProgressReporter<'_>,
    ) -> Result<ImportStats, StageFailure> {
        match self.persister.persist(dataset, intent, reporter).await {
            Ok(outcome) => Ok(outcome.stats),
            Err(e @ StorageError::ChunkFailed { .. }) => {
                Err(e).at(ImportStage::SavingGuidelines.as_str())
            }
            Err(e) => Err(e).at(ImportStage::Saving.as_str()),
        }
    }

    /// Merge `principles` into the stored dataset, leaving everything else
    pub async fn import_principles(&self, principles: Vec<Principle>) -> ImportResult {
        let reporter = self.reporter(None);
        let _guard = self.write_lock.lock().await;

        let outcome: Result<ImportStats, StageFailure> = async {
            reporter.stage(ImportStage::Preparing, 10, "Preparing principles");
            if principles.is_empty() {
                return Err(StorageError::NoImportableData("no principles given".to_string()))
                    .at(ImportStage::Preparing.as_str());
            }

            reporter.stage(ImportStage::LoadingCurrent, 30, "Loading current dataset");
            let current = self
                .backend
                .load()
                .await
                .at(ImportStage::LoadingCurrent.as_str())?;

            reporter.stage(ImportStage::Merging, 40, "Merging principles");
            let merged = merge_principles(&current, &principles);
            self.save(&merged, WriteIntent::Upsert, &reporter).await
        }
        .await;

        if outcome.is_ok() {
            reporter.stage(ImportStage::Completed, 100, "Principles imported");
            info!(count = principles.len(), "Principles imported");
        }
        finish("import-principles", outcome)
    }

    /// Validate `text` and import it
    pub async fn import_json(
        &self,
        text: &str,
        options: ImportOptions,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> ImportResult {
        let validation = self.validate_json_data(text, on_progress);
        match validation.data {
            Some(dataset) if validation.valid => {
                if validation.skipped > 0 {
                    warn!(skipped = validation.skipped, "Importing with skipped entries");
                }
                self.import_data(dataset, options, on_progress).await
            }
            _ => ImportResult::failed(format!(
                "{}: {}",
                ImportStage::Validating,
                validation.error.unwrap_or_else(|| "invalid payload".to_string())
            )),
        }
    }

    /// Stored dataset stamped with the export time
    pub async fn export_data(&self) -> Result<Dataset, StorageError> {
        let mut dataset = self.backend.load().await?;
        dataset.export_date = Some(timestamp_now());
        info!(
            guidelines = dataset.guidelines.len(),
            principles = dataset.principles.len(),
            categories = dataset.categories.len(),
            "Dataset exported"
        );
        Ok(dataset)
    }

    pub async fn delete_guideline(&self, id: &str) -> ImportResult {
        let _guard = self.write_lock.lock().await;
        let outcome: Result<ImportStats, StageFailure> = async {
            if !self.backend.delete_guideline(id).await.at("deleting")? {
                return Err(StorageError::NotFound(format!("guideline '{}'", id))).at("deleting");
            }
            let remaining = self.backend.load().await.at("loading-current")?;
            info!(id, "Guideline deleted");
            Ok(remaining.counts())
        }
        .await;
        finish("delete-guideline", outcome)
    }

    pub async fn delete_principle(&self, id: &str) -> ImportResult {
        let _guard = self.write_lock.lock().await;
        let outcome: Result<ImportStats, StageFailure> = async {
            let mut dataset = self
                .backend
                .load()
                .await
                .at(ImportStage::LoadingCurrent.as_str())?;
            let before = dataset.principles.len();
            dataset.principles.retain(|p| p.id != id);
            if dataset.principles.len() == before {
                return Err(StorageError::NotFound(format!("principle '{}'", id))).at("deleting");
            }
            dataset.last_updated = timestamp_now();
            let stats = self
                .save(&dataset, WriteIntent::Upsert, &self.reporter(None))
                .await?;
            info!(id, "Principle deleted");
            Ok(stats)
        }
        .await;
        finish("delete-principle", outcome)
    }

    /// Delete a category by key; refused while guidelines reference it
    pub async fn delete_category(&self, key: &str) -> ImportResult {
        let _guard = self.write_lock.lock().await;
        let outcome: Result<ImportStats, StageFailure> = async {
            let mut dataset = self
                .backend
                .load()
                .await
                .at(ImportStage::LoadingCurrent.as_str())?;
            if !dataset.categories.iter().any(|c| c.key() == key) {
                return Err(StorageError::NotFound(format!("category '{}'", key))).at("deleting");
            }

            let referencing = dataset.guidelines_referencing_category(key);
            if !referencing.is_empty() {
                warn!(key, guidelines = referencing.len(), "Refusing to delete referenced category");
                return Err(StorageError::Conflict(format!(
                    "category '{}' is referenced by guidelines: {}",
                    key,
                    referencing.join(", ")
                )))
                .at("deleting");
            }

            dataset.categories.retain(|c| c.key() != key);
            dataset.last_updated = timestamp_now();
            let stats = self
                .save(&dataset, WriteIntent::Upsert, &self.reporter(None))
                .await?;
            info!(key, "Category deleted");
            Ok(stats)
        }
        .await;
        finish("delete-category", outcome)
    }

    pub async fn stats(&self) -> Result<BackendStats, StorageError> {
        self.backend.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::model::{Category, CategoryEntry, Guideline};

    fn service_with(dataset: Dataset) -> ImportService {
        ImportService::new(
            Arc::new(MemoryBackend::with_dataset(dataset)),
            PersistOptions::default(),
        )
    }

    fn guideline(id: &str, categories: &[&str]) -> Guideline {
        Guideline {
            id: id.to_string(),
            title: format!("Guideline {}", id),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_drops_unselected() {
        let mut dataset = Dataset::empty();
        dataset.guidelines.push(guideline("g1", &[]));
        dataset.categories.push(CategoryEntry::Named("Forms".to_string()));
        let options = ImportOptions {
            guidelines: false,
            ..Default::default()
        };

        let filtered = options.filter(dataset);
        assert!(filtered.guidelines.is_empty());
        assert_eq!(filtered.categories.len(), 1);
        assert!(!options.replace_mode());
    }

    #[tokio::test]
    async fn test_import_with_nothing_selected_fails() {
        let service = service_with(Dataset::empty());
        let mut dataset = Dataset::empty();
        dataset.guidelines.push(guideline("g1", &[]));

        let result = service
            .import_data(
                dataset,
                ImportOptions {
                    guidelines: false,
                    ..Default::default()
                },
                None,
            )
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("filtering: No importable data"));
    }

    #[tokio::test]
    async fn test_import_json_reports_validation_stage() {
        let service = service_with(Dataset::empty());
        let result = service
            .import_json(r#"{"guidelines": []}"#, ImportOptions::default(), None)
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("validating: "));
    }

    #[tokio::test]
    async fn test_export_stamps_date() {
        let mut stored = Dataset::empty();
        stored.guidelines.push(guideline("g1", &[]));
        let service = service_with(stored);

        let exported = service.export_data().await.unwrap();
        assert!(exported.export_date.is_some());
        assert_eq!(exported.guidelines.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_guideline() {
        let service = service_with(Dataset::empty());
        let result = service.delete_guideline("nope").await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("deleting: Not found"));
    }

    #[tokio::test]
    async fn test_delete_principle_updates_stats() {
        let mut stored = Dataset::empty();
        stored.principles = vec![
            Principle {
                id: "p1".to_string(),
                ..Default::default()
            },
            Principle {
                id: "p2".to_string(),
                ..Default::default()
            },
        ];
        let service = service_with(stored);

        let result = service.delete_principle("p1").await;
        assert!(result.success);
        assert_eq!(result.stats.unwrap().principles, 1);
    }

    #[tokio::test]
    async fn test_delete_unreferenced_category() {
        let mut stored = Dataset::empty();
        stored.categories = vec![
            CategoryEntry::Entity(Category {
                id: "forms".to_string(),
                name: "Forms".to_string(),
                ..Default::default()
            }),
            CategoryEntry::Named("Navigation".to_string()),
        ];
        stored.guidelines.push(guideline("g1", &["Forms"]));
        let service = service_with(stored);

        let refused = service.delete_category("forms").await;
        assert!(!refused.success);
        assert!(refused.error.unwrap().contains("g1"));

        let deleted = service.delete_category("Navigation").await;
        assert!(deleted.success);
        assert_eq!(deleted.stats.unwrap().categories, 1);
    }
}
