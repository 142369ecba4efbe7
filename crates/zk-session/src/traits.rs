//! Trait definitions for coordination-service sessions.

use crate::SessionError;

/// Node metadata returned by read operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStat {
    /// Data version, incremented on every successful set.
    pub version: i32,
    /// Number of direct children.
    pub num_children: i32,
    /// Length of the node data in bytes.
    pub data_length: i32,
}

/// One live session to one server endpoint.
///
/// Paths are absolute. Nodes are created persistent with an open ACL.
/// A `None` expected version means "any version".
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Endpoint this session is connected to.
    fn endpoint(&self) -> &str;

    /// Check whether a node exists.
    async fn exists(&self, path: &str) -> Result<bool, SessionError>;

    /// Read node data and metadata.
    async fn get(&self, path: &str) -> Result<(Vec<u8>, NodeStat), SessionError>;

    /// Overwrite node data.
    async fn set(
        &self,
        path: &str,
        data: &[u8],
        expected_version: Option<i32>,
    ) -> Result<NodeStat, SessionError>;

    /// Create a node. The parent must exist.
    async fn create(&self, path: &str, data: &[u8]) -> Result<(), SessionError>;

    /// Delete a node without children.
    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), SessionError>;

    /// List the names of direct children and leave a child watch on the node.
    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, NodeStat), SessionError>;

    /// Close the session. Further operations fail with [`SessionError::Closed`].
    async fn close(&self);
}

/// Factory for sessions.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session to `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Session>, SessionError>;
}
