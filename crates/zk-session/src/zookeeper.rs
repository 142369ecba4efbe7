//! ZooKeeper backend built on `zookeeper-client`.

use crate::traits::{Connector, NodeStat, Session};
use crate::SessionError;
use std::sync::Mutex;
use tracing::debug;
use zookeeper_client as zk;

/// Opens ZooKeeper sessions, one endpoint per session.
#[derive(Debug, Clone, Default)]
pub struct ZkConnector;

impl ZkConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for ZkConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Session>, SessionError> {
        let client = zk::Client::connect(endpoint)
            .await
            .map_err(|e| map_error(e, endpoint))?;
        debug!("Connected to {}", endpoint);
        Ok(Box::new(ZkSession {
            client: Mutex::new(Some(client)),
            endpoint: endpoint.to_string(),
        }))
    }
}

struct ZkSession {
    client: Mutex<Option<zk::Client>>,
    endpoint: String,
}

impl ZkSession {
    fn client(&self) -> Result<zk::Client, SessionError> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(SessionError::Closed)
    }
}

fn map_error(err: zk::Error, path: &str) -> SessionError {
    match err {
        zk::Error::NoNode => SessionError::NoNode(path.to_string()),
        zk::Error::NodeExists => SessionError::NodeExists(path.to_string()),
        zk::Error::NotEmpty => SessionError::NotEmpty(path.to_string()),
        zk::Error::BadVersion => SessionError::BadVersion(path.to_string()),
        zk::Error::ConnectionLoss => SessionError::NoServer(err.to_string()),
        zk::Error::SessionExpired => SessionError::SessionExpired,
        other => SessionError::Other(other.to_string()),
    }
}

fn node_stat(stat: &zk::Stat) -> NodeStat {
    NodeStat {
        version: stat.version,
        num_children: stat.num_children,
        data_length: stat.data_length,
    }
}

#[async_trait::async_trait]
impl Session for ZkSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exists(&self, path: &str) -> Result<bool, SessionError> {
        let stat = self
            .client()?
            .check_stat(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(stat.is_some())
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, NodeStat), SessionError> {
        let (data, stat) = self
            .client()?
            .get_data(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok((data, node_stat(&stat)))
    }

    async fn set(
        &self,
        path: &str,
        data: &[u8],
        expected_version: Option<i32>,
    ) -> Result<NodeStat, SessionError> {
        let stat = self
            .client()?
            .set_data(path, data, expected_version)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(node_stat(&stat))
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), SessionError> {
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        self.client()?
            .create(path, data, &options)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(())
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), SessionError> {
        self.client()?
            .delete(path, expected_version)
            .await
            .map_err(|e| map_error(e, path))
    }

    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, NodeStat), SessionError> {
        let (children, stat, _watcher) = self
            .client()?
            .get_and_watch_children(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok((children, node_stat(&stat)))
    }

    async fn close(&self) {
        // Dropping the last client handle closes the session.
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
