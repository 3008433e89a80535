//! Catalog Storage - import pipeline for the guideline catalog
//!
//! Takes untrusted JSON exports of guidelines, principles and categories,
//! repairs and validates them, merges them into the stored dataset and
//! writes the result through a pluggable backend.
//!
//! ## Pipeline
//!
//! ```text
//! raw text ─► repair ─► parse ─► validate/sanitize ─► Dataset
//!                                                       │
//!            stored Dataset ◄─ load ◄── backend         ▼
//!                  │                              filter (ImportOptions)
//!                  └──────────────► merge ◄─────────────┘
//!                                     │
//!                                  persist ─► backend (single or chunked)
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/catalog-storage/
//! ├── catalog.json      # File backend document
//! ├── catalog.sled/     # Sled backend database
//! └── config.toml       # Configuration
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod persist;
pub mod progress;
pub mod repair;
pub mod sanitize;
pub mod service;
pub mod validate;

// Re-exports
pub use backend::{BackendStats, CatalogBackend, FileBackend, MemoryBackend, SaveMode, SledBackend};
pub use config::{BackendKind, Config};
pub use error::StorageError;
pub use merge::{merge_dataset, MergeStrategy};
pub use model::{Category, CategoryEntry, Dataset, Guideline, Principle};
pub use persist::{PersistOptions, PersistOutcome, Persister, WriteIntent};
pub use progress::{ImportProgress, ImportResult, ImportStage, ImportStats, ProgressReporter};
pub use repair::{repair, RepairOutcome};
pub use service::{ImportOptions, ImportService};
pub use validate::{validate, ValidationResult};
