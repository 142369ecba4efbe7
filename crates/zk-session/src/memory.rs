//! In-process tree backend.
//!
//! `MemoryCluster` keeps a single shared tree behind a mutex and hands out
//! sessions that operate on it. Tests use it to inject latency and scripted
//! failures without a running server.

use crate::traits::{Connector, NodeStat, Session};
use crate::SessionError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation kinds, used for fault injection and operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    Exists,
    Get,
    Set,
    Create,
    Delete,
    Children,
}

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    version: i32,
}

#[derive(Debug)]
struct Fault {
    op: Op,
    path_prefix: String,
    remaining: u32,
    error: SessionError,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, Node>,
    faults: Vec<Fault>,
    counters: HashMap<Op, u64>,
    latency: Duration,
}

impl ClusterState {
    /// Count the operation and return the first matching scripted failure.
    fn begin(&mut self, op: Op, path: &str) -> Result<(), SessionError> {
        *self.counters.entry(op).or_insert(0) += 1;
        let hit = self
            .faults
            .iter_mut()
            .find(|f| f.op == op && f.remaining > 0 && path.starts_with(&f.path_prefix));
        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn stat(&self, path: &str, node: &Node) -> NodeStat {
        NodeStat {
            version: node.version,
            num_children: self.child_names(path).len() as i32,
            data_length: node.data.len() as i32,
        }
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }
}

/// Shared in-process tree. Cloning yields another handle to the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every session operation by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Fail the next `times` operations of kind `op` on paths starting with
    /// `path_prefix` (endpoints, for [`Op::Connect`]) with `error`.
    pub fn inject_failure(&self, op: Op, path_prefix: &str, times: u32, error: SessionError) {
        self.lock().faults.push(Fault {
            op,
            path_prefix: path_prefix.to_string(),
            remaining: times,
            error,
        });
    }

    /// Number of operations of kind `op` issued so far, failed ones included.
    pub fn op_count(&self, op: Op) -> u64 {
        self.lock().counters.get(&op).copied().unwrap_or(0)
    }

    /// Whether a node exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.lock().exists(path)
    }

    /// Data stored at `path`, if the node exists.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().nodes.get(path).map(|n| n.data.clone())
    }

    /// Total number of nodes, excluding the root.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn latency(&self) -> Duration {
        self.lock().latency
    }
}

#[async_trait::async_trait]
impl Connector for MemoryCluster {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Session>, SessionError> {
        self.lock().begin(Op::Connect, endpoint)?;
        Ok(Box::new(MemorySession {
            cluster: self.clone(),
            endpoint: endpoint.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session on a [`MemoryCluster`].
struct MemorySession {
    cluster: MemoryCluster,
    endpoint: String,
    closed: AtomicBool,
}

impl MemorySession {
    async fn enter(&self, op: Op, path: &str) -> Result<MutexGuard<'_, ClusterState>, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let latency = self.cluster.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.cluster.lock();
        state.begin(op, path)?;
        Ok(state)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn check_version(path: &str, node: &Node, expected: Option<i32>) -> Result<(), SessionError> {
    match expected {
        Some(v) if v != node.version => Err(SessionError::BadVersion(path.to_string())),
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl Session for MemorySession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exists(&self, path: &str) -> Result<bool, SessionError> {
        let state = self.enter(Op::Exists, path).await?;
        Ok(state.exists(path))
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, NodeStat), SessionError> {
        let state = self.enter(Op::Get, path).await?;
        let node = state
            .nodes
            .get(path)
            .ok_or_else(|| SessionError::NoNode(path.to_string()))?;
        Ok((node.data.clone(), state.stat(path, node)))
    }

    async fn set(
        &self,
        path: &str,
        data: &[u8],
        expected_version: Option<i32>,
    ) -> Result<NodeStat, SessionError> {
        let mut state = self.enter(Op::Set, path).await?;
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| SessionError::NoNode(path.to_string()))?;
        check_version(path, node, expected_version)?;
        node.data = data.to_vec();
        node.version += 1;
        let node = node.clone();
        Ok(state.stat(path, &node))
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), SessionError> {
        let mut state = self.enter(Op::Create, path).await?;
        if state.exists(path) {
            return Err(SessionError::NodeExists(path.to_string()));
        }
        if !state.exists(parent_of(path)) {
            return Err(SessionError::NoNode(parent_of(path).to_string()));
        }
        state.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                version: 0,
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), SessionError> {
        let mut state = self.enter(Op::Delete, path).await?;
        let node = state
            .nodes
            .get(path)
            .ok_or_else(|| SessionError::NoNode(path.to_string()))?;
        check_version(path, node, expected_version)?;
        if !state.child_names(path).is_empty() {
            return Err(SessionError::NotEmpty(path.to_string()));
        }
        state.nodes.remove(path);
        Ok(())
    }

    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, NodeStat), SessionError> {
        let state = self.enter(Op::Children, path).await?;
        if path == "/" {
            let children = state.child_names(path);
            let stat = NodeStat {
                num_children: children.len() as i32,
                ..NodeStat::default()
            };
            return Ok((children, stat));
        }
        let node = state
            .nodes
            .get(path)
            .ok_or_else(|| SessionError::NoNode(path.to_string()))?;
        Ok((state.child_names(path), state.stat(path, node)))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_requires_parent() {
        let cluster = MemoryCluster::new();
        let session = cluster.connect("zk1:2181").await.unwrap();

        let err = session.create("/bench/client1", b"").await.unwrap_err();
        assert_eq!(err, SessionError::NoNode("/bench".to_string()));

        session.create("/bench", b"").await.unwrap();
        session.create("/bench/client1", b"hi").await.unwrap();
        assert_eq!(cluster.data("/bench/client1"), Some(b"hi".to_vec()));

        let err = session.create("/bench", b"").await.unwrap_err();
        assert_eq!(err, SessionError::NodeExists("/bench".to_string()));
    }

    #[tokio::test]
    async fn test_set_bumps_version_and_checks_expected() {
        let cluster = MemoryCluster::new();
        let session = cluster.connect("zk1:2181").await.unwrap();
        session.create("/k", b"a").await.unwrap();

        let stat = session.set("/k", b"b", Some(0)).await.unwrap();
        assert_eq!(stat.version, 1);

        let err = session.set("/k", b"c", Some(0)).await.unwrap_err();
        assert!(matches!(err, SessionError::BadVersion(_)));

        let (data, stat) = session.get("/k").await.unwrap();
        assert_eq!(data, b"b");
        assert_eq!(stat.version, 1);
    }

    #[tokio::test]
    async fn test_delete_refuses_non_empty() {
        let cluster = MemoryCluster::new();
        let session = cluster.connect("zk1:2181").await.unwrap();
        session.create("/ns", b"").await.unwrap();
        session.create("/ns/a", b"").await.unwrap();
        session.create("/ns/b", b"").await.unwrap();

        let (children, stat) = session.children_watch("/ns").await.unwrap();
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stat.num_children, 2);

        assert!(matches!(
            session.delete("/ns", None).await,
            Err(SessionError::NotEmpty(_))
        ));
        session.delete("/ns/a", None).await.unwrap();
        session.delete("/ns/b", None).await.unwrap();
        session.delete("/ns", None).await.unwrap();
        assert_eq!(cluster.node_count(), 0);
    }

    #[tokio::test]
    async fn test_children_skip_grandchildren_and_siblings() {
        let cluster = MemoryCluster::new();
        let session = cluster.connect("zk1:2181").await.unwrap();
        for path in ["/a", "/a/x", "/a/x/deep", "/ab"] {
            session.create(path, b"").await.unwrap();
        }

        let (children, _) = session.children_watch("/a").await.unwrap();
        assert_eq!(children, vec!["x".to_string()]);

        let (root_children, _) = session.children_watch("/").await.unwrap();
        assert_eq!(root_children, vec!["a".to_string(), "ab".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let cluster = MemoryCluster::new();
        let session = cluster.connect("zk1:2181").await.unwrap();
        cluster.inject_failure(Op::Exists, "/", 2, SessionError::NoServer("zk1".into()));

        assert!(session.exists("/").await.unwrap_err().is_no_server());
        assert!(session.exists("/").await.unwrap_err().is_no_server());
        assert!(session.exists("/").await.unwrap());
        assert_eq!(cluster.op_count(Op::Exists), 3);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let cluster = MemoryCluster::new();
        let session = cluster.connect("zk1:2181").await.unwrap();
        session.close().await;
        assert_eq!(session.exists("/").await, Err(SessionError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied_per_operation() {
        let cluster = MemoryCluster::new().with_latency(Duration::from_millis(5));
        let session = cluster.connect("zk1:2181").await.unwrap();

        let start = tokio::time::Instant::now();
        session.exists("/").await.unwrap();
        session.exists("/").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(10));
    }
}
