//! Benchmark configuration types.

use crate::workload::Workload;
use crate::LoadTestError;
use std::collections::BTreeSet;

/// Set of workloads selected for a base benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BenchTypes(BTreeSet<Workload>);

impl BenchTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workload to the set.
    pub fn with(mut self, workload: Workload) -> Self {
        self.0.insert(workload);
        self
    }

    pub fn insert(&mut self, workload: Workload) {
        self.0.insert(workload);
    }

    pub fn contains(&self, workload: Workload) -> bool {
        self.0.contains(&workload)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Workload> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Workload> for BenchTypes {
    fn from_iter<I: IntoIterator<Item = Workload>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Settings shared by every component of a benchmark run.
///
/// Built once by the configuration layer and passed by reference; never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Absolute namespace path under which every client gets a subtree.
    pub namespace: String,
    /// Number of clients in the pool.
    pub clients: usize,
    /// Server names, parallel to `endpoints`.
    pub servers: Vec<String>,
    /// Server endpoints (`host:port`), assigned round-robin to clients.
    pub endpoints: Vec<String>,
    /// Workloads to run.
    pub types: BenchTypes,
    /// Requests per client per workload.
    pub requests: u64,
    /// Key width in bytes.
    pub key_size: usize,
    /// Value size in bytes.
    pub value_size: usize,
    /// Send every request to one fixed key.
    pub same_key: bool,
    /// Zipf-skewed key selection for READ, WRITE and MIXED.
    pub random_access: bool,
    /// Parallel ranges per MIXED sub-stream.
    pub parallelism: usize,
    /// MIXED read volume as a fraction of `requests`; `None` means all of it.
    pub read_percent: Option<f64>,
    /// MIXED write volume as a fraction of `requests`; `None` means all of it.
    pub write_percent: Option<f64>,
    /// Delete client subtrees when the run finishes.
    pub cleanup: bool,
}

impl BenchConfig {
    /// Create a configuration for `clients` clients against `endpoints`,
    /// named `server.1`, `server.2`, ... in order.
    pub fn new(namespace: impl Into<String>, clients: usize, endpoints: Vec<String>) -> Self {
        let servers = (1..=endpoints.len()).map(|i| format!("server.{i}")).collect();
        Self {
            namespace: namespace.into(),
            clients,
            servers,
            endpoints,
            types: BenchTypes::new(),
            requests: 1000,
            key_size: 8,
            value_size: 64,
            same_key: false,
            random_access: false,
            parallelism: 1,
            read_percent: None,
            write_percent: None,
            cleanup: true,
        }
    }

    pub fn with_types(mut self, types: BenchTypes) -> Self {
        self.types = types;
        self
    }

    pub fn with_requests(mut self, requests: u64) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_sizes(mut self, key_size: usize, value_size: usize) -> Self {
        self.key_size = key_size;
        self.value_size = value_size;
        self
    }

    pub fn with_same_key(mut self, same_key: bool) -> Self {
        self.same_key = same_key;
        self
    }

    pub fn with_random_access(mut self, random_access: bool) -> Self {
        self.random_access = random_access;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_mix(mut self, read_percent: Option<f64>, write_percent: Option<f64>) -> Self {
        self.read_percent = read_percent;
        self.write_percent = write_percent;
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Requests issued by one MIXED sub-stream whose share is `percent`.
    /// An unset or zero share means the full request volume.
    pub fn mix_requests(&self, percent: Option<f64>) -> u64 {
        match percent {
            Some(p) if p > 0.0 => ((self.requests as f64 * p) as u64).max(1),
            _ => self.requests,
        }
    }

    /// Check the invariants every component relies on.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.clients == 0 {
            return Err(LoadTestError::Config("clients must be positive".into()));
        }
        if self.requests == 0 {
            return Err(LoadTestError::Config("requests must be positive".into()));
        }
        if self.key_size == 0 || self.value_size == 0 {
            return Err(LoadTestError::Config(
                "key and value sizes must be positive".into(),
            ));
        }
        if self.parallelism == 0 {
            return Err(LoadTestError::Config("parallelism must be positive".into()));
        }
        if self.endpoints.is_empty() {
            return Err(LoadTestError::Config("at least one server is required".into()));
        }
        if self.servers.len() != self.endpoints.len() {
            return Err(LoadTestError::Config(
                "server names and endpoints differ in length".into(),
            ));
        }
        if !self.namespace.starts_with('/') {
            return Err(LoadTestError::Config(format!(
                "namespace must be absolute, got '{}'",
                self.namespace
            )));
        }
        for p in [self.read_percent, self.write_percent].into_iter().flatten() {
            if !(0.0..=1.0).contains(&p) {
                return Err(LoadTestError::Config(format!(
                    "mix percentages must be in [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }
}
