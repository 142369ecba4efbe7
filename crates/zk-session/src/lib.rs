//! Coordination-service session abstraction for zkbench.
//!
//! The load-test engine never talks to a wire protocol directly. It goes
//! through the [`Session`] and [`Connector`] traits defined here, which cover
//! the handful of tree operations the harness needs: existence checks,
//! get/set of node data, create, delete and listing children with a watch.
//!
//! Two backends are provided:
//!
//! - [`MemoryCluster`]: an in-process tree used by tests and by the `memory`
//!   backend of the CLI. It can inject per-request latency and scripted
//!   failures.
//! - `ZkConnector` (feature `zookeeper`): a ZooKeeper backend built on the
//!   `zookeeper-client` crate.

mod error;
mod memory;
mod traits;
#[cfg(feature = "zookeeper")]
mod zookeeper;

pub use error::SessionError;
pub use memory::{MemoryCluster, Op};
pub use traits::{Connector, NodeStat, Session};
#[cfg(feature = "zookeeper")]
pub use zookeeper::ZkConnector;
