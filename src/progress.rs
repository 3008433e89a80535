//! Progress and result reporting for import operations
//!
//! Every long-running entry point reports through a [`ProgressReporter`],
//! which fans each event out to an optional per-call callback and an
//! optional broadcast channel. Both sinks are optional; reporting with
//! neither attached is a no-op apart from a debug log line.
//!
//! ## Import stages
//!
//! ```text
//! preparing(10) → filtering(20) → loading-current(30)* → merging(40)*
//!   → saving(60) → saving-guidelines(60–80)** → saving-final(80)**
//!   → completed(100)
//!
//!  * merge and preserve strategies only
//! ** chunked persistence only
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Stage of an import or validation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportStage {
    Parsing,
    Repairing,
    Validating,
    Preparing,
    Filtering,
    LoadingCurrent,
    Merging,
    Saving,
    SavingGuidelines,
    SavingFinal,
    Completed,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Repairing => "repairing",
            Self::Validating => "validating",
            Self::Preparing => "preparing",
            Self::Filtering => "filtering",
            Self::LoadingCurrent => "loading-current",
            Self::Merging => "merging",
            Self::Saving => "saving",
            Self::SavingGuidelines => "saving-guidelines",
            Self::SavingFinal => "saving-final",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub stage: ImportStage,
    /// 0–100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Entity counts in the final persisted dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub guidelines: usize,
    pub principles: usize,
    pub categories: usize,
}

/// Outcome of an import or delete operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ImportStats>,
}

impl ImportResult {
    pub fn succeeded(stats: ImportStats) -> Self {
        Self {
            success: true,
            error: None,
            stats: Some(stats),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            stats: None,
        }
    }
}

/// Per-call progress callback
pub type ProgressCallback<'a> = &'a (dyn Fn(&ImportProgress) + Send + Sync);

/// Fans progress events out to the attached sinks
#[derive(Clone, Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
    broadcast_tx: Option<broadcast::Sender<ImportProgress>>,
}

impl<'a> ProgressReporter<'a> {
    /// Reporter with no sinks
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn new(callback: Option<ProgressCallback<'a>>) -> Self {
        Self {
            callback,
            broadcast_tx: None,
        }
    }

    /// Also publish every event on a broadcast channel
    pub fn with_broadcast(mut self, tx: broadcast::Sender<ImportProgress>) -> Self {
        self.broadcast_tx = Some(tx);
        self
    }

    pub fn report(&self, stage: ImportStage, progress: u8, message: Option<String>) {
        let event = ImportProgress {
            stage,
            progress: progress.min(100),
            message,
        };

        debug!(stage = %event.stage, progress = event.progress, message = ?event.message, "Import progress");

        if let Some(callback) = self.callback {
            callback(&event);
        }

        if let Some(ref tx) = self.broadcast_tx {
            if tx.receiver_count() > 0 {
                if let Err(e) = tx.send(event) {
                    warn!(error = %e, "Failed to broadcast progress update");
                }
            }
        }
    }

    /// Report with a message
    pub fn stage(&self, stage: ImportStage, progress: u8, message: impl Into<String>) {
        self.report(stage, progress, Some(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&ImportStage::LoadingCurrent).unwrap();
        assert_eq!(json, "\"loading-current\"");
        assert_eq!(ImportStage::SavingGuidelines.to_string(), "saving-guidelines");
    }

    #[test]
    fn test_silent_reporter_is_noop() {
        let reporter = ProgressReporter::silent();
        reporter.stage(ImportStage::Preparing, 10, "nothing listens");
    }

    #[test]
    fn test_callback_receives_events() {
        let seen = Mutex::new(Vec::new());
        {
            let callback = |p: &ImportProgress| seen.lock().unwrap().push((p.stage, p.progress));
            let reporter = ProgressReporter::new(Some(&callback));

            reporter.report(ImportStage::Preparing, 10, None);
            reporter.report(ImportStage::Completed, 250, None);
        }

        let seen = seen.into_inner().unwrap();
        assert_eq!(
            seen,
            vec![(ImportStage::Preparing, 10), (ImportStage::Completed, 100)]
        );
    }

    #[tokio::test]
    async fn test_broadcast_receives_events() {
        let (tx, mut rx) = broadcast::channel(8);
        let reporter = ProgressReporter::silent().with_broadcast(tx);

        reporter.stage(ImportStage::Saving, 60, "Saving dataset");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, ImportStage::Saving);
        assert_eq!(event.message.as_deref(), Some("Saving dataset"));
    }

    #[test]
    fn test_result_serialization() {
        let ok = ImportResult::succeeded(ImportStats {
            guidelines: 52,
            principles: 3,
            categories: 4,
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["stats"]["guidelines"], 52);
        assert!(json.get("error").is_none());

        let failed = ImportResult::failed("saving: disk full");
        assert!(!failed.success);
        assert!(failed.stats.is_none());
    }
}
