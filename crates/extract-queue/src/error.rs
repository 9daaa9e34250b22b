//! Error types for the extraction queue

use thiserror::Error;

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Extraction queue errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint or status storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// The extraction engine reported a failure
    #[error("Processor error: {0}")]
    Processor(String),

    /// A persisted value could not be interpreted
    #[error("Corrupt record for {key}: {message}")]
    CorruptRecord { key: String, message: String },

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a processor error
    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor(message.into())
    }

    /// Create a corrupt record error
    pub fn corrupt_record(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            key: key.into(),
            message: message.into(),
        }
    }
}
