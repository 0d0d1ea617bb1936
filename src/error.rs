// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Leafscan

use thiserror::Error;

/// Result type alias for Leafscan operations
pub type Result<T> = std::result::Result<T, LeafscanError>;

/// Leafscan error types
#[derive(Error, Debug)]
pub enum LeafscanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Inference queue is full ({0} requests pending)")]
    Overloaded(usize),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LeafscanError {
    /// Whether the caller, not the service, caused this failure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LeafscanError::Decode(_) | LeafscanError::BadRequest(_) | LeafscanError::NotFound(_)
        )
    }
}
