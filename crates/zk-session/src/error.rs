//! Error taxonomy for session operations.

use thiserror::Error;

/// Errors reported by a coordination-service session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No server is currently reachable. Handles reconnect on this error.
    #[error("no server available: {0}")]
    NoServer(String),

    /// The addressed node does not exist.
    #[error("node does not exist: {0}")]
    NoNode(String),

    /// A node already exists at the path.
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// The node still has children and cannot be deleted.
    #[error("node has children: {0}")]
    NotEmpty(String),

    /// The expected version did not match the node version.
    #[error("version mismatch: {0}")]
    BadVersion(String),

    /// The server expired the session.
    #[error("session expired")]
    SessionExpired,

    /// The session was closed locally.
    #[error("session closed")]
    Closed,

    /// Any other backend failure.
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Whether this error signals loss of server availability.
    pub fn is_no_server(&self) -> bool {
        matches!(self, SessionError::NoServer(_))
    }

    /// Whether an operation that failed with this error is worth retrying.
    ///
    /// Tree-state errors (`NoNode`, `NodeExists`, `NotEmpty`, `BadVersion`)
    /// will fail the same way again and are not retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SessionError::NoServer(_)
                | SessionError::SessionExpired
                | SessionError::Closed
                | SessionError::Other(_)
        )
    }
}
