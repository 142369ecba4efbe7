//! Error types for the load-test engine.

use thiserror::Error;
use zkbench_session::SessionError;

/// Errors that can occur while preparing or running a load test.
#[derive(Error, Debug)]
pub enum LoadTestError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A client could not open its session at pool creation time.
    #[error("Failed to connect client {client} to {endpoint}: {source}")]
    Connection {
        client: String,
        endpoint: String,
        #[source]
        source: SessionError,
    },

    /// Session error outside the per-request path.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A concurrent worker panicked or was cancelled.
    #[error("Worker failed: {0}")]
    Worker(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV sink error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<tokio::task::JoinError> for LoadTestError {
    fn from(err: tokio::task::JoinError) -> Self {
        LoadTestError::Worker(err.to_string())
    }
}
