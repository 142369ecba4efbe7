//! Benchmark client handles.
//!
//! A `ClientHandle` owns exactly one session to one endpoint and a private
//! namespace subtree. Child handles share the namespace but open their own
//! sessions, so one logical client can issue requests from several workers
//! without two workers ever touching the same session.

use std::sync::Arc;
use tracing::{debug, info, warn};
use zkbench_session::{Connector, NodeStat, Session, SessionError};

/// One logical benchmark client.
pub struct ClientHandle {
    id: String,
    server: String,
    endpoint: String,
    namespace: String,
    session: Option<Box<dyn Session>>,
    connector: Arc<dyn Connector>,
    children: Vec<ClientHandle>,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("connected", &self.session.is_some())
            .field("children", &self.children.len())
            .finish()
    }
}

impl ClientHandle {
    /// Connect client `id` whose private subtree is `<namespace>/client<id>`.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        id: impl Into<String>,
        server: &str,
        endpoint: &str,
        namespace: &str,
    ) -> Result<Self, SessionError> {
        let id = id.into();
        let namespace = format!("{}/client{}", namespace.trim_end_matches('/'), id);
        Self::open(connector, id, server, endpoint, namespace).await
    }

    /// Connect a handle bound to `namespace` itself.
    pub async fn connect_root(
        connector: Arc<dyn Connector>,
        server: &str,
        endpoint: &str,
        namespace: &str,
    ) -> Result<Self, SessionError> {
        Self::open(connector, "root".to_string(), server, endpoint, namespace.to_string()).await
    }

    async fn open(
        connector: Arc<dyn Connector>,
        id: String,
        server: &str,
        endpoint: &str,
        namespace: String,
    ) -> Result<Self, SessionError> {
        let session = connector.connect(endpoint).await?;
        Ok(Self {
            id,
            server: server.to_string(),
            endpoint: endpoint.to_string(),
            namespace,
            session: Some(session),
            connector,
            children: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Absolute path of `key` inside this handle's namespace. An empty key
    /// addresses the namespace node itself.
    pub fn full_path(&self, key: &str) -> String {
        if key.is_empty() {
            self.namespace.clone()
        } else {
            format!("{}/{}", self.namespace, key)
        }
    }

    fn session(&self) -> Result<&dyn Session, SessionError> {
        self.session.as_deref().ok_or(SessionError::Closed)
    }

    pub async fn read(&self, key: &str) -> Result<(Vec<u8>, NodeStat), SessionError> {
        self.session()?.get(&self.full_path(key)).await
    }

    pub async fn write(&self, key: &str, data: &[u8]) -> Result<(), SessionError> {
        self.session()?
            .set(&self.full_path(key), data, None)
            .await
            .map(|_| ())
    }

    /// Read then write back conditioned on the version just read.
    pub async fn read_write(&self, key: &str, data: &[u8]) -> Result<(), SessionError> {
        let path = self.full_path(key);
        let session = self.session()?;
        let (_, stat) = session.get(&path).await?;
        session.set(&path, data, Some(stat.version)).await.map(|_| ())
    }

    pub async fn create(&self, key: &str, data: &[u8]) -> Result<(), SessionError> {
        self.session()?.create(&self.full_path(key), data).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.session()?.delete(&self.full_path(key), None).await
    }

    /// Create `key` and every missing ancestor, root to leaf. Only the leaf
    /// receives `data`.
    pub async fn create_recursive(&self, key: &str, data: &[u8]) -> Result<(), SessionError> {
        let session = self.session()?;
        let leaf = self.full_path(key);
        for ancestor in ancestors(&leaf) {
            if !session.exists(ancestor).await? {
                match session.create(ancestor, &[]).await {
                    Ok(()) | Err(SessionError::NodeExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        session.create(&leaf, data).await
    }

    /// Create `key` unless it exists. Returns whether it already existed.
    pub async fn create_if_not_exist(&self, key: &str, data: &[u8]) -> Result<bool, SessionError> {
        let session = self.session()?;
        let path = self.full_path(key);
        if session.exists(&path).await? {
            return Ok(true);
        }
        session.create(&path, data).await?;
        Ok(false)
    }

    /// List the children of the absolute `path`, leaving a watch.
    pub async fn list_children(&self, path: &str) -> Result<(Vec<String>, NodeStat), SessionError> {
        self.session()?.children_watch(path).await
    }

    /// Ensure the private subtree exists. A no-op when it already does.
    pub async fn setup(&self) -> Result<(), SessionError> {
        if self.session()?.exists(&self.namespace).await? {
            return Ok(());
        }
        let greeting = format!("I am client {}", self.id);
        self.create_recursive("", greeting.as_bytes()).await
    }

    /// Delete the subtree's immediate entries, then the subtree root, then
    /// close the session. A handle without a session reconnects first. On
    /// failure the handle is left for the caller to retry.
    pub async fn cleanup(&mut self) -> Result<(), SessionError> {
        self.ensure_connected().await?;
        self.delete_subtree().await?;
        self.close().await;
        Ok(())
    }

    async fn delete_subtree(&self) -> Result<(), SessionError> {
        let session = self.session()?;
        let children = match session.children_watch(&self.namespace).await {
            Ok((children, _)) => children,
            Err(SessionError::NoNode(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        for child in children {
            let path = format!("{}/{}", self.namespace, child);
            match session.delete(&path, None).await {
                Ok(()) | Err(SessionError::NoNode(_)) => {}
                Err(e) => return Err(e),
            }
        }
        match session.delete(&self.namespace, None).await {
            Ok(()) | Err(SessionError::NoNode(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Replace the session with a fresh one to the same endpoint.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.ensure_connected().await
    }

    /// Open a fresh session if the handle has none, e.g. after a failed
    /// [`reconnect`](Self::reconnect).
    pub async fn ensure_connected(&mut self) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Ok(());
        }
        info!("[Client {}->{}]: reconnecting", self.id, self.endpoint);
        self.session = Some(self.connector.connect(&self.endpoint).await?);
        Ok(())
    }

    /// Close the session and all child sessions.
    pub async fn close(&mut self) {
        self.close_children().await;
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// Open `n` child handles with independent sessions on this handle's
    /// endpoint and namespace.
    pub async fn add_children(&mut self, n: usize) -> Result<(), SessionError> {
        for _ in 0..n {
            let child_id = format!("{}.{}", self.id, self.children.len() + 1);
            let session = self.connector.connect(&self.endpoint).await?;
            debug!("[Client {}->{}]: child {} opened", self.id, self.endpoint, child_id);
            self.children.push(ClientHandle {
                id: child_id,
                server: self.server.clone(),
                endpoint: self.endpoint.clone(),
                namespace: self.namespace.clone(),
                session: Some(session),
                connector: Arc::clone(&self.connector),
                children: Vec::new(),
            });
        }
        Ok(())
    }

    pub fn child(&self, i: usize) -> Option<&ClientHandle> {
        self.children.get(i)
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// Close and drop every child handle, including any children they
    /// still hold.
    pub async fn close_children(&mut self) {
        let mut stack: Vec<ClientHandle> = self.children.drain(..).collect();
        while let Some(mut child) = stack.pop() {
            if !child.children.is_empty() {
                warn!("[Client {}]: child {} still had children", self.id, child.id);
                stack.append(&mut child.children);
            }
            if let Some(session) = child.session.take() {
                session.close().await;
            }
        }
    }

    /// Move the children out so they can be handed to concurrent workers.
    pub(crate) fn take_children(&mut self) -> Vec<ClientHandle> {
        std::mem::take(&mut self.children)
    }

    pub(crate) fn restore_children(&mut self, children: Vec<ClientHandle>) {
        self.children = children;
    }
}

/// Proper ancestors of an absolute path, root-most first, excluding `/`.
fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .map(|(idx, _)| &path[..idx])
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkbench_session::{MemoryCluster, Op};

    async fn client(cluster: &MemoryCluster, id: &str) -> ClientHandle {
        ClientHandle::connect(Arc::new(cluster.clone()), id, "server.1", "zk1:2181", "/bench")
            .await
            .unwrap()
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b"]);
        assert!(ancestors("/a").is_empty());
    }

    #[tokio::test]
    async fn test_namespace_and_paths() {
        let cluster = MemoryCluster::new();
        let c = client(&cluster, "3").await;

        assert_eq!(c.namespace(), "/bench/client3");
        assert_eq!(c.full_path(""), "/bench/client3");
        assert_eq!(c.full_path("0001"), "/bench/client3/0001");
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let cluster = MemoryCluster::new();
        let c = client(&cluster, "1").await;

        c.setup().await.unwrap();
        let creates = cluster.op_count(Op::Create);
        assert_eq!(creates, 2); // /bench, /bench/client1
        assert_eq!(
            cluster.data("/bench/client1"),
            Some(b"I am client 1".to_vec())
        );

        c.setup().await.unwrap();
        assert_eq!(cluster.op_count(Op::Create), creates);
    }

    #[tokio::test]
    async fn test_cleanup_removes_subtree_and_closes() {
        let cluster = MemoryCluster::new();
        let mut c = client(&cluster, "1").await;
        c.setup().await.unwrap();
        c.create("a", b"").await.unwrap();
        c.create("b", b"").await.unwrap();

        c.cleanup().await.unwrap();

        assert!(!cluster.contains("/bench/client1"));
        assert!(cluster.contains("/bench"));
        assert!(!c.is_connected());
        assert_eq!(c.read("a").await.unwrap_err(), SessionError::Closed);
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_session() {
        let cluster = MemoryCluster::new();
        let mut c = client(&cluster, "1").await;
        c.setup().await.unwrap();
        cluster.inject_failure(
            Op::Delete,
            "/bench/client1",
            1,
            SessionError::NoServer("zk1:2181".into()),
        );

        assert!(c.cleanup().await.unwrap_err().is_no_server());
        assert!(c.is_connected());
        c.cleanup().await.unwrap();
        assert!(!cluster.contains("/bench/client1"));
    }

    #[tokio::test]
    async fn test_reconnect_preserves_identity() {
        let cluster = MemoryCluster::new();
        let mut c = client(&cluster, "7").await;
        c.reconnect().await.unwrap();

        assert_eq!(c.id(), "7");
        assert_eq!(c.namespace(), "/bench/client7");
        assert!(c.is_connected());
        assert_eq!(cluster.op_count(Op::Connect), 2);
    }

    #[tokio::test]
    async fn test_cleanup_after_failed_reconnect_opens_new_session() {
        let cluster = MemoryCluster::new();
        let mut c = client(&cluster, "1").await;
        c.setup().await.unwrap();
        cluster.inject_failure(Op::Connect, "zk1", 1, SessionError::NoServer("zk1:2181".into()));

        assert!(c.reconnect().await.unwrap_err().is_no_server());
        assert!(!c.is_connected());

        c.cleanup().await.unwrap();
        assert!(!cluster.contains("/bench/client1"));
        assert_eq!(cluster.op_count(Op::Connect), 3);
    }

    #[tokio::test]
    async fn test_children_share_namespace_with_own_sessions() {
        let cluster = MemoryCluster::new();
        let mut c = client(&cluster, "2").await;
        c.setup().await.unwrap();

        c.add_children(3).await.unwrap();
        assert_eq!(c.num_children(), 3);
        assert_eq!(cluster.op_count(Op::Connect), 4);

        let child = c.child(1).unwrap();
        assert_eq!(child.id(), "2.2");
        assert_eq!(child.namespace(), "/bench/client2");
        child.create("k", b"v").await.unwrap();
        assert_eq!(c.read("k").await.unwrap().0, b"v");

        c.close_children().await;
        assert_eq!(c.num_children(), 0);
        assert!(c.child(0).is_none());
        assert!(c.is_connected());
    }

    #[tokio::test]
    async fn test_read_write_uses_read_version() {
        let cluster = MemoryCluster::new();
        let c = client(&cluster, "1").await;
        c.setup().await.unwrap();
        c.create("k", b"a").await.unwrap();

        c.read_write("k", b"b").await.unwrap();
        let (data, stat) = c.read("k").await.unwrap();
        assert_eq!(data, b"b");
        assert_eq!(stat.version, 1);
    }

    #[tokio::test]
    async fn test_create_if_not_exist() {
        let cluster = MemoryCluster::new();
        let c = client(&cluster, "1").await;
        c.setup().await.unwrap();

        assert!(!c.create_if_not_exist("k", b"a").await.unwrap());
        assert!(c.create_if_not_exist("k", b"b").await.unwrap());
        assert_eq!(c.read("k").await.unwrap().0, b"a");
    }
}
