//! The pool of long-lived benchmark clients.

use crate::client::ClientHandle;
use crate::LoadTestError;
use std::sync::Arc;
use tracing::{error, info, warn};
use zkbench_session::{Connector, SessionError};

/// Maximum number of cleanup rounds over the set of failing handles.
pub const CLEANUP_ROUNDS: usize = 3;

/// Outcome of a bounded cleanup.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Rounds attempted.
    pub rounds: usize,
    /// Handles that still failed after the last round, with their last error.
    pub failed: Vec<(String, SessionError)>,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns every client handle for the lifetime of a run.
pub struct ClientPool {
    clients: Vec<ClientHandle>,
}

impl ClientPool {
    /// Connect `count` clients, assigning endpoints round-robin. Client ids
    /// start at 1, so the subtrees are `<namespace>/client1..clientN`.
    pub async fn create(
        connector: Arc<dyn Connector>,
        servers: &[String],
        endpoints: &[String],
        count: usize,
        namespace: &str,
    ) -> Result<Self, LoadTestError> {
        if endpoints.is_empty() {
            return Err(LoadTestError::Config("no server endpoints given".into()));
        }

        let mut clients = Vec::with_capacity(count);
        for index in 0..count {
            let id = index + 1;
            let slot = index % endpoints.len();
            let endpoint = &endpoints[slot];
            let server = servers.get(slot).map(String::as_str).unwrap_or(endpoint);
            let client = ClientHandle::connect(
                Arc::clone(&connector),
                id.to_string(),
                server,
                endpoint,
                namespace,
            )
            .await
            .map_err(|source| LoadTestError::Connection {
                client: id.to_string(),
                endpoint: endpoint.clone(),
                source,
            })?;
            info!("[Client {}->{}]: connected", id, endpoint);
            clients.push(client);
        }

        Ok(Self { clients })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clients(&self) -> &[ClientHandle] {
        &self.clients
    }

    pub fn get(&self, i: usize) -> Option<&ClientHandle> {
        self.clients.get(i)
    }

    /// Run setup on every client. Failures are logged and returned, never
    /// fatal.
    pub async fn setup_all(&self) -> Vec<(String, SessionError)> {
        let mut failures = Vec::new();
        for client in &self.clients {
            if let Err(e) = client.setup().await {
                error!(
                    "[Client {}->{}]: setup failed: {}",
                    client.id(),
                    client.endpoint(),
                    e
                );
                failures.push((client.id().to_string(), e));
            }
        }
        failures
    }

    /// Delete every client's subtree, retrying the handles that failed with a
    /// retriable error for up to [`CLEANUP_ROUNDS`] rounds.
    pub async fn cleanup(&mut self) -> CleanupReport {
        cleanup_handles(self.clients.iter_mut().collect()).await
    }

    /// Move the handles out so each can be driven by its own worker.
    pub(crate) fn take_clients(&mut self) -> Vec<ClientHandle> {
        std::mem::take(&mut self.clients)
    }

    pub(crate) fn restore_clients(&mut self, clients: Vec<ClientHandle>) {
        self.clients = clients;
    }

    /// Close every session without deleting anything.
    pub async fn close(&mut self) {
        for client in &mut self.clients {
            client.close().await;
        }
    }
}

/// Bounded cleanup over an arbitrary set of handles.
pub async fn cleanup_handles(mut pending: Vec<&mut ClientHandle>) -> CleanupReport {
    let mut report = CleanupReport::default();

    while !pending.is_empty() && report.rounds < CLEANUP_ROUNDS {
        report.rounds += 1;
        let mut leftover = Vec::new();
        for client in pending {
            info!("[Client {}->{}]: clean up", client.id(), client.endpoint());
            let err = match client.cleanup().await {
                Ok(()) => continue,
                Err(e) => e,
            };
            warn!(
                "[Client {}->{}]: error in clean up (round {}): {}",
                client.id(),
                client.endpoint(),
                report.rounds,
                err
            );
            if !err.is_retriable() {
                report.failed.push((client.id().to_string(), err));
                continue;
            }
            let lost = err.is_no_server() || matches!(err, SessionError::Closed);
            if lost && client.is_connected() {
                if let Err(e) = client.reconnect().await {
                    warn!("[Client {}]: reconnect failed: {}", client.id(), e);
                }
            }
            leftover.push((client, err));
        }

        if report.rounds == CLEANUP_ROUNDS {
            for (client, err) in leftover {
                report.failed.push((client.id().to_string(), err));
            }
            break;
        }
        pending = leftover.into_iter().map(|(client, _)| client).collect();
    }

    for (id, err) in &report.failed {
        error!("[Client {}]: giving up on clean up: {}", id, err);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkbench_session::{MemoryCluster, Op};

    async fn pool(cluster: &MemoryCluster, count: usize) -> ClientPool {
        let servers = vec!["server.1".to_string(), "server.2".to_string()];
        let endpoints = vec!["zk1:2181".to_string(), "zk2:2181".to_string()];
        ClientPool::create(Arc::new(cluster.clone()), &servers, &endpoints, count, "/bench")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_robin_endpoints() {
        let cluster = MemoryCluster::new();
        let pool = pool(&cluster, 3).await;

        let endpoints: Vec<_> = pool.clients().iter().map(|c| c.endpoint()).collect();
        assert_eq!(endpoints, vec!["zk1:2181", "zk2:2181", "zk1:2181"]);
        assert_eq!(pool.get(1).unwrap().server(), "server.2");
        assert_eq!(pool.get(0).unwrap().id(), "1");
        assert_eq!(pool.get(2).unwrap().namespace(), "/bench/client3");
    }

    #[tokio::test]
    async fn test_connection_error_is_fatal() {
        let cluster = MemoryCluster::new();
        cluster.inject_failure(Op::Connect, "zk2", 1, SessionError::NoServer("zk2".into()));

        let servers = vec!["a".to_string(), "b".to_string()];
        let endpoints = vec!["zk1:2181".to_string(), "zk2:2181".to_string()];
        let err = ClientPool::create(Arc::new(cluster), &servers, &endpoints, 2, "/bench")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LoadTestError::Connection { ref client, .. } if client == "2"
        ));
    }

    #[tokio::test]
    async fn test_non_retriable_cleanup_error_is_reported_immediately() {
        let cluster = MemoryCluster::new();
        let mut pool = pool(&cluster, 2).await;
        pool.setup_all().await;
        cluster.inject_failure(
            Op::Delete,
            "/bench/client2",
            5,
            SessionError::BadVersion("/bench/client2".into()),
        );

        let report = pool.cleanup().await;
        assert_eq!(report.rounds, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2");
        assert!(!cluster.contains("/bench/client1"));
    }

    #[tokio::test]
    async fn test_cleanup_gives_up_after_bounded_rounds() {
        let cluster = MemoryCluster::new();
        let mut pool = pool(&cluster, 2).await;
        pool.setup_all().await;
        cluster.inject_failure(
            Op::Delete,
            "/bench/client1",
            10,
            SessionError::NoServer("zk1:2181".into()),
        );

        let report = pool.cleanup().await;
        assert_eq!(report.rounds, CLEANUP_ROUNDS);
        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "1");
        assert!(cluster.contains("/bench/client1"));
        assert!(!cluster.contains("/bench/client2"));
    }
}
