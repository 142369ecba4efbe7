//! Workload descriptors, request generators and request handlers.
//!
//! A workload is resolved into one or more [`WorkloadStream`]s, each pairing
//! a [`RequestGenerator`] with a [`RequestHandler`]. Generators are pure
//! functions of the iteration index; handlers perform exactly one session
//! call per request.

use crate::client::ClientHandle;
use crate::config::BenchConfig;
use crate::request::{random_value, same_key, sequential_key, Request};
use std::fmt;
use std::sync::Arc;
use zkbench_session::SessionError;

/// Zipf exponent used for skewed key selection.
pub const ZIPF_SKEW: f64 = 1.3;

/// Payload written by the FILL workload.
pub const FILL_PAYLOAD: &[u8] = b"zkbench-fill";

/// Kind of work a stream performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Workload {
    WarmUp,
    Create,
    Fill,
    Read,
    Write,
    Delete,
    Mixed,
}

impl Workload {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workload::WarmUp => "WARM_UP",
            Workload::Create => "CREATE",
            Workload::Fill => "FILL",
            Workload::Read => "READ",
            Workload::Write => "WRITE",
            Workload::Delete => "DELETE",
            Workload::Mixed => "MIXED",
        }
    }

    /// Resolve this workload into the streams that run concurrently for
    /// every client. MIXED yields a read and a write stream; everything else
    /// yields one.
    pub fn streams(&self, config: &BenchConfig) -> Vec<WorkloadStream> {
        let value = random_value(config.value_size);
        let keys = |value: Vec<u8>| -> Arc<dyn RequestGenerator> {
            if config.same_key {
                Arc::new(FixedKey::new(same_key(config.key_size), value))
            } else {
                Arc::new(SequentialKeys::new(config.key_size, value))
            }
        };
        let skewed = config.random_access;

        match self {
            Workload::WarmUp => vec![WorkloadStream::new(
                *self,
                (config.requests / 10).max(1),
                Arc::new(NamespaceNode),
                Arc::new(ReadHandler),
            )],
            Workload::Create => vec![WorkloadStream::new(
                *self,
                config.requests,
                keys(Vec::new()),
                Arc::new(CreateHandler),
            )
            .with_fixed_key(config.same_key)],
            Workload::Fill => vec![WorkloadStream::new(
                *self,
                config.requests,
                keys(FILL_PAYLOAD.to_vec()),
                Arc::new(WriteHandler),
            )
            .with_fixed_key(config.same_key)],
            Workload::Read => vec![WorkloadStream::new(
                *self,
                config.mix_requests(config.read_percent),
                keys(Vec::new()),
                Arc::new(ReadHandler),
            )
            .with_fixed_key(config.same_key)
            .with_skewed_keys(skewed)],
            Workload::Write => vec![WorkloadStream::new(
                *self,
                config.mix_requests(config.write_percent),
                keys(value),
                Arc::new(WriteHandler),
            )
            .with_fixed_key(config.same_key)
            .with_skewed_keys(skewed)],
            Workload::Delete => vec![WorkloadStream::new(
                *self,
                config.requests,
                keys(Vec::new()),
                Arc::new(DeleteHandler),
            )
            .with_fixed_key(config.same_key)],
            Workload::Mixed => vec![
                WorkloadStream::new(
                    *self,
                    config.mix_requests(config.read_percent),
                    keys(Vec::new()),
                    Arc::new(ReadHandler),
                )
                .with_fixed_key(config.same_key)
                .with_skewed_keys(skewed)
                .with_parallelism(config.parallelism),
                WorkloadStream::new(
                    *self,
                    config.mix_requests(config.write_percent),
                    keys(value),
                    Arc::new(WriteHandler),
                )
                .with_fixed_key(config.same_key)
                .with_skewed_keys(skewed)
                .with_parallelism(config.parallelism),
            ],
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an iteration index (or a sampled key index) to a request.
pub trait RequestGenerator: Send + Sync {
    fn generate(&self, iteration: u64) -> Request;
}

/// Executes one request against a client.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    /// Operation name used in logs.
    fn operation(&self) -> &'static str;

    async fn handle(&self, client: &ClientHandle, request: &Request) -> Result<(), SessionError>;
}

/// Every request addresses the client's namespace node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceNode;

impl RequestGenerator for NamespaceNode {
    fn generate(&self, _iteration: u64) -> Request {
        Request::default()
    }
}

/// Zero-padded decimal keys, one per iteration.
#[derive(Debug, Clone)]
pub struct SequentialKeys {
    key_size: usize,
    value: Vec<u8>,
}

impl SequentialKeys {
    pub fn new(key_size: usize, value: Vec<u8>) -> Self {
        Self { key_size, value }
    }
}

impl RequestGenerator for SequentialKeys {
    fn generate(&self, iteration: u64) -> Request {
        Request::new(sequential_key(self.key_size, iteration), self.value.clone())
    }
}

/// The same key for every iteration.
#[derive(Debug, Clone)]
pub struct FixedKey {
    key: String,
    value: Vec<u8>,
}

impl FixedKey {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl RequestGenerator for FixedKey {
    fn generate(&self, _iteration: u64) -> Request {
        Request::new(self.key.clone(), self.value.clone())
    }
}

/// Alternates reads (even iterations) and writes (odd iterations) over a
/// bounded key space. Writes carry a fresh random value.
#[derive(Debug, Clone)]
pub struct ReadWriteCycle {
    key_size: usize,
    key_space: u64,
    value_size: usize,
}

impl ReadWriteCycle {
    pub fn new(key_size: usize, key_space: u64, value_size: usize) -> Self {
        Self {
            key_size,
            key_space: key_space.max(1),
            value_size,
        }
    }
}

impl RequestGenerator for ReadWriteCycle {
    fn generate(&self, iteration: u64) -> Request {
        let key = sequential_key(self.key_size, iteration % self.key_space);
        if iteration % 2 == 0 {
            Request::key_only(key)
        } else {
            Request::new(key, random_value(self.value_size))
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadHandler;

#[async_trait::async_trait]
impl RequestHandler for ReadHandler {
    fn operation(&self) -> &'static str {
        "read"
    }

    async fn handle(&self, client: &ClientHandle, request: &Request) -> Result<(), SessionError> {
        client.read(&request.key).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteHandler;

#[async_trait::async_trait]
impl RequestHandler for WriteHandler {
    fn operation(&self) -> &'static str {
        "write"
    }

    async fn handle(&self, client: &ClientHandle, request: &Request) -> Result<(), SessionError> {
        client.write(&request.key, &request.value).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateHandler;

#[async_trait::async_trait]
impl RequestHandler for CreateHandler {
    fn operation(&self) -> &'static str {
        "create"
    }

    async fn handle(&self, client: &ClientHandle, request: &Request) -> Result<(), SessionError> {
        client.create(&request.key, &request.value).await
    }
}

/// Create the node unless it is already there.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureHandler;

#[async_trait::async_trait]
impl RequestHandler for EnsureHandler {
    fn operation(&self) -> &'static str {
        "ensure"
    }

    async fn handle(&self, client: &ClientHandle, request: &Request) -> Result<(), SessionError> {
        match client.create(&request.key, &request.value).await {
            Ok(()) | Err(SessionError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteHandler;

#[async_trait::async_trait]
impl RequestHandler for DeleteHandler {
    fn operation(&self) -> &'static str {
        "delete"
    }

    async fn handle(&self, client: &ClientHandle, request: &Request) -> Result<(), SessionError> {
        client.delete(&request.key).await
    }
}

/// Reads when the request carries no value, writes otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOrWriteHandler;

#[async_trait::async_trait]
impl RequestHandler for ReadOrWriteHandler {
    fn operation(&self) -> &'static str {
        "read/write"
    }

    async fn handle(&self, client: &ClientHandle, request: &Request) -> Result<(), SessionError> {
        if request.value.is_empty() {
            client.read(&request.key).await.map(|_| ())
        } else {
            client.write(&request.key, &request.value).await
        }
    }
}

/// One generator/handler pair with its request budget.
#[derive(Clone)]
pub struct WorkloadStream {
    pub workload: Workload,
    pub total_requests: u64,
    /// Number of contiguous index ranges run concurrently.
    pub parallelism: usize,
    /// Draw keys from a Zipf distribution instead of the iteration index.
    pub skewed_keys: bool,
    /// Generate one request up front and reuse it for every iteration.
    pub fixed_key: bool,
    pub generator: Arc<dyn RequestGenerator>,
    pub handler: Arc<dyn RequestHandler>,
}

impl WorkloadStream {
    pub fn new(
        workload: Workload,
        total_requests: u64,
        generator: Arc<dyn RequestGenerator>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            workload,
            total_requests,
            parallelism: 1,
            skewed_keys: false,
            fixed_key: false,
            generator,
            handler,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_skewed_keys(mut self, skewed: bool) -> Self {
        self.skewed_keys = skewed;
        self
    }

    pub fn with_fixed_key(mut self, fixed: bool) -> Self {
        self.fixed_key = fixed;
        self
    }

    pub fn with_total_requests(mut self, total_requests: u64) -> Self {
        self.total_requests = total_requests;
        self
    }
}

impl fmt::Debug for WorkloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadStream")
            .field("workload", &self.workload)
            .field("operation", &self.handler.operation())
            .field("total_requests", &self.total_requests)
            .field("parallelism", &self.parallelism)
            .field("skewed_keys", &self.skewed_keys)
            .field("fixed_key", &self.fixed_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BenchConfig {
        BenchConfig::new("/bench", 1, vec!["zk1:2181".into()])
            .with_requests(100)
            .with_sizes(4, 16)
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Workload::WarmUp.to_string(), "WARM_UP");
        assert_eq!(Workload::Mixed.to_string(), "MIXED");
    }

    #[test]
    fn test_warm_up_reads_tenth_of_requests() {
        let streams = Workload::WarmUp.streams(&config());
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].total_requests, 10);
        assert_eq!(streams[0].handler.operation(), "read");
        assert_eq!(streams[0].generator.generate(5), Request::default());

        let tiny = Workload::WarmUp.streams(&config().with_requests(3));
        assert_eq!(tiny[0].total_requests, 1);
    }

    #[test]
    fn test_sequential_and_fixed_keys() {
        let streams = Workload::Write.streams(&config());
        let request = streams[0].generator.generate(7);
        assert_eq!(request.key, "0007");
        assert_eq!(request.value.len(), 16);
        assert!(!streams[0].fixed_key);

        let streams = Workload::Write.streams(&config().with_same_key(true));
        assert!(streams[0].fixed_key);
        assert_eq!(streams[0].generator.generate(7).key, "xxxx");
        assert_eq!(streams[0].generator.generate(99).key, "xxxx");
    }

    #[test]
    fn test_fill_uses_fixed_payload() {
        let streams = Workload::Fill.streams(&config());
        assert_eq!(streams[0].generator.generate(0).value, FILL_PAYLOAD);
        assert_eq!(streams[0].handler.operation(), "write");
    }

    #[test]
    fn test_mixed_defaults_to_full_volume_per_stream() {
        let streams = Workload::Mixed.streams(&config().with_parallelism(4));
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].handler.operation(), "read");
        assert_eq!(streams[1].handler.operation(), "write");
        assert_eq!(streams[0].total_requests, 100);
        assert_eq!(streams[1].total_requests, 100);
        assert!(streams.iter().all(|s| s.parallelism == 4));

        let streams = Workload::Mixed.streams(&config().with_mix(Some(0.8), Some(0.2)));
        assert_eq!(streams[0].total_requests, 80);
        assert_eq!(streams[1].total_requests, 20);
    }

    #[test]
    fn test_only_read_write_and_mixed_are_skewed() {
        let skewed = config().with_random_access(true);
        for workload in [Workload::Read, Workload::Write, Workload::Mixed] {
            assert!(workload.streams(&skewed).iter().all(|s| s.skewed_keys));
        }
        for workload in [Workload::WarmUp, Workload::Create, Workload::Fill, Workload::Delete] {
            assert!(workload.streams(&skewed).iter().all(|s| !s.skewed_keys));
        }
    }

    #[test]
    fn test_read_write_cycle() {
        let cycle = ReadWriteCycle::new(3, 4, 8);
        let read = cycle.generate(6);
        assert_eq!(read.key, "002");
        assert!(read.value.is_empty());

        let write = cycle.generate(7);
        assert_eq!(write.key, "003");
        assert_eq!(write.value.len(), 8);
    }
}
