//! Error types for the replyscout library.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the pipeline.

use thiserror::Error;

/// Errors that can occur in the replyscout pipeline.
#[derive(Error, Debug)]
pub enum ReplyscoutError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A requested project does not exist
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// A requested draft does not exist
    #[error("Draft not found: {0}")]
    DraftNotFound(i64),

    /// An illegal draft status transition was attempted
    #[error("Invalid draft transition: draft {draft_id} is {current}, cannot {attempted}")]
    InvalidTransition {
        draft_id: i64,
        current: String,
        attempted: String,
    },

    /// LLM gateway failure surfaced after retries were exhausted
    #[error("LLM gateway error: {0}")]
    Gateway(String),

    /// Social platform call failure
    #[error("Platform error: {0}")]
    Platform(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration; fatal, stops the run
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization errors
    #[error("Binary serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with ReplyscoutError
pub type Result<T> = std::result::Result<T, ReplyscoutError>;

impl From<anyhow::Error> for ReplyscoutError {
    fn from(err: anyhow::Error) -> Self {
        ReplyscoutError::Other(err.to_string())
    }
}

impl From<sled::Error> for ReplyscoutError {
    fn from(err: sled::Error) -> Self {
        ReplyscoutError::Cache(err.to_string())
    }
}

impl From<serde_yaml::Error> for ReplyscoutError {
    fn from(err: serde_yaml::Error) -> Self {
        ReplyscoutError::InvalidConfig(err.to_string())
    }
}
