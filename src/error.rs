//! Error types for catalog-storage

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data format: {0}")]
    InvalidData(String),

    #[error("No importable data: {0}")]
    NoImportableData(String),

    #[error("Backend rejected the write during {0}")]
    WriteRejected(String),

    #[error("Failed to save chunk {index} of {total}: {reason}")]
    ChunkFailed {
        index: usize,
        total: usize,
        reason: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
