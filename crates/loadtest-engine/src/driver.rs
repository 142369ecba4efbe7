//! Request driver.
//!
//! Runs a [`WorkloadStream`] against a client, either as fast as the service
//! answers (split over `parallelism` child handles) or paced at a fixed rate
//! for a bounded duration.

use crate::client::ClientHandle;
use crate::partition::{describe_partitioning, partition};
use crate::request::Request;
use crate::stats::StatAccumulator;
use crate::workload::{WorkloadStream, ZIPF_SKEW};
use crate::LoadTestError;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Zipf};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use zkbench_session::SessionError;

/// Where a worker records its outcomes.
enum Sink<'a> {
    /// Sole writer; no lock.
    Exclusive(&'a mut StatAccumulator),
    /// One of several concurrent writers.
    Shared(Arc<Mutex<StatAccumulator>>),
}

impl Sink<'_> {
    async fn record(&mut self, op_id: u64, started_at: DateTime<Utc>, latency: Option<Duration>) {
        match self {
            Sink::Exclusive(stat) => stat.record(op_id, started_at, latency),
            Sink::Shared(stat) => stat.lock().await.record(op_id, started_at, latency),
        }
    }
}

/// Produces the request for each iteration of one worker.
struct RequestSource {
    fixed: Option<Request>,
    zipf: Option<(StdRng, Zipf<f64>)>,
}

impl RequestSource {
    fn new(stream: &WorkloadStream) -> Self {
        let fixed = stream.fixed_key.then(|| stream.generator.generate(0));
        let zipf = if stream.skewed_keys && fixed.is_none() {
            match Zipf::new(stream.total_requests.max(1), ZIPF_SKEW) {
                Ok(dist) => Some((StdRng::from_entropy(), dist)),
                Err(e) => {
                    warn!("Zipf keys disabled for {}: {}", stream.workload, e);
                    None
                }
            }
        } else {
            None
        };
        Self { fixed, zipf }
    }

    fn next(&mut self, stream: &WorkloadStream, iteration: u64) -> Request {
        if let Some(request) = &self.fixed {
            return request.clone();
        }
        match &mut self.zipf {
            // Zipf samples lie in [1, n]; shift to [0, n).
            Some((rng, dist)) => stream.generator.generate(dist.sample(rng) as u64 - 1),
            None => stream.generator.generate(iteration),
        }
    }
}

/// Issue one request and record its outcome. A handle left without a
/// session by an earlier failed reconnect reconnects first; a request that
/// reports no reachable server or a closed session reconnects afterwards.
async fn issue(
    client: &mut ClientHandle,
    stream: &WorkloadStream,
    op_id: u64,
    request: &Request,
    sink: &mut Sink<'_>,
) {
    let started_at = Utc::now();
    let begin = Instant::now();
    let result = match client.ensure_connected().await {
        Ok(()) => stream.handler.handle(client, request).await,
        Err(e) => Err(e),
    };
    let latency = begin.elapsed();

    match result {
        Ok(()) => sink.record(op_id, started_at, Some(latency)).await,
        Err(e) => {
            warn!(
                "[Client {}->{}]: error in processing {} {} request for key '{}': {}",
                client.id(),
                client.endpoint(),
                stream.workload,
                stream.handler.operation(),
                request.key,
                e
            );
            let lost = e.is_no_server() || matches!(e, SessionError::Closed);
            if lost && client.is_connected() {
                if let Err(e) = client.reconnect().await {
                    warn!("[Client {}]: reconnect failed: {}", client.id(), e);
                }
            }
            sink.record(op_id, started_at, None).await;
        }
    }
}

async fn run_range(
    client: &mut ClientHandle,
    stream: &WorkloadStream,
    range: Range<u64>,
    mut sink: Sink<'_>,
) {
    let mut source = RequestSource::new(stream);
    for j in range {
        let request = source.next(stream, j);
        issue(client, stream, j, &request, &mut sink).await;
    }
}

/// Run `stream` to completion against `client`.
///
/// With `parallelism > 1` the request indices are split into contiguous
/// ranges, each driven by a dedicated child handle; all workers are joined
/// and the children closed before returning. Per-request failures are
/// recorded, never returned.
pub async fn execute(
    client: &mut ClientHandle,
    stream: &WorkloadStream,
) -> Result<StatAccumulator, LoadTestError> {
    let started = Utc::now();
    let ranges = partition(stream.total_requests, stream.parallelism);
    let capacity = stream.total_requests as usize;

    let mut stat = if ranges.len() <= 1 {
        let mut stat = StatAccumulator::with_capacity(capacity);
        if let Some(range) = ranges.into_iter().next() {
            run_range(client, stream, range, Sink::Exclusive(&mut stat)).await;
        }
        stat
    } else {
        debug!(
            "[Client {}]: {} {}",
            client.id(),
            stream.workload,
            describe_partitioning(&ranges)
        );
        if let Err(e) = client.add_children(ranges.len()).await {
            client.close_children().await;
            return Err(e.into());
        }

        let shared = Arc::new(Mutex::new(StatAccumulator::with_capacity(capacity)));
        let mut workers = Vec::with_capacity(ranges.len());
        for (mut child, range) in client.take_children().into_iter().zip(ranges) {
            let stream = stream.clone();
            let sink = Sink::Shared(Arc::clone(&shared));
            workers.push(tokio::spawn(async move {
                run_range(&mut child, &stream, range, sink).await;
                child
            }));
        }

        let mut children = Vec::with_capacity(workers.len());
        let mut failure = None;
        for worker in workers {
            match worker.await {
                Ok(child) => children.push(child),
                Err(e) => failure = Some(e),
            }
        }
        client.restore_children(children);
        client.close_children().await;
        if let Some(e) = failure {
            return Err(e.into());
        }

        let mut guard = shared.lock().await;
        std::mem::take(&mut *guard)
    };

    stat.mark_window(started, Utc::now());
    Ok(stat)
}

/// Run `stream` as a single paced stream at `rps` requests per second.
///
/// Stops when `duration` has elapsed or `stream.total_requests` requests
/// have been issued, whichever comes first. Ticks missed while a slow
/// request is outstanding are skipped, not bunched.
pub async fn execute_paced(
    client: &mut ClientHandle,
    stream: &WorkloadStream,
    rps: u64,
    duration: Duration,
) -> StatAccumulator {
    let capacity = stream.total_requests.min(rps.saturating_mul(duration.as_secs().max(1)));
    let mut stat = StatAccumulator::with_capacity(capacity as usize);
    if rps == 0 || stream.total_requests == 0 || duration.is_zero() {
        return stat;
    }

    let started = Utc::now();
    let deadline = Instant::now() + duration;
    let period = Duration::from_secs(1) / rps.min(1_000_000_000) as u32;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let expired = tokio::time::sleep_until(deadline);
    tokio::pin!(expired);

    let mut source = RequestSource::new(stream);
    let mut sink = Sink::Exclusive(&mut stat);
    let mut issued = 0;
    while issued < stream.total_requests {
        if Instant::now() >= deadline {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut expired => break,
            _ = ticker.tick() => {}
        }
        let request = source.next(stream, issued);
        issue(client, stream, issued, &request, &mut sink).await;
        issued += 1;
    }

    stat.mark_window(started, Utc::now());
    stat
}

/// Run every stream against every client concurrently and merge each
/// client's streams into one accumulator per client, in client order.
///
/// A client running several streams drives each from its own child handle
/// so that no session is shared between workers. Handles come back even
/// when a stream fails, except those whose worker panicked.
pub async fn execute_on_clients(
    clients: Vec<ClientHandle>,
    streams: &[WorkloadStream],
) -> (Vec<ClientHandle>, Result<Vec<StatAccumulator>, LoadTestError>) {
    let mut workers = Vec::with_capacity(clients.len());
    for mut client in clients {
        let streams = streams.to_vec();
        workers.push(tokio::spawn(async move {
            let stat = run_streams(&mut client, &streams).await;
            (client, stat)
        }));
    }

    let mut handles = Vec::with_capacity(workers.len());
    let mut stats = Vec::with_capacity(workers.len());
    let mut failure = None;
    for worker in workers {
        match worker.await {
            Ok((client, stat)) => {
                handles.push(client);
                match stat {
                    Ok(stat) => stats.push(stat),
                    Err(e) => failure = Some(e),
                }
            }
            Err(e) => failure = Some(e.into()),
        }
    }
    match failure {
        Some(e) => (handles, Err(e)),
        None => (handles, Ok(stats)),
    }
}

async fn run_streams(
    client: &mut ClientHandle,
    streams: &[WorkloadStream],
) -> Result<StatAccumulator, LoadTestError> {
    match streams {
        [] => Ok(StatAccumulator::new()),
        [stream] => execute(client, stream).await,
        _ => {
            if let Err(e) = client.add_children(streams.len()).await {
                client.close_children().await;
                return Err(e.into());
            }
            let mut workers = Vec::with_capacity(streams.len());
            for (mut child, stream) in client.take_children().into_iter().zip(streams.iter().cloned()) {
                workers.push(tokio::spawn(async move {
                    let stat = execute(&mut child, &stream).await;
                    (child, stat)
                }));
            }

            let mut merged = StatAccumulator::new();
            let mut children = Vec::with_capacity(workers.len());
            let mut failure: Option<LoadTestError> = None;
            for worker in workers {
                match worker.await {
                    Ok((child, stat)) => {
                        children.push(child);
                        match stat {
                            Ok(stat) => merged.merge(&stat),
                            Err(e) => failure = Some(e),
                        }
                    }
                    Err(e) => failure = Some(e.into()),
                }
            }
            client.restore_children(children);
            client.close_children().await;
            match failure {
                Some(e) => Err(e),
                None => Ok(merged),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{
        CreateHandler, FixedKey, NamespaceNode, ReadHandler, SequentialKeys, Workload,
    };
    use zkbench_session::{MemoryCluster, Op};

    async fn client(cluster: &MemoryCluster) -> ClientHandle {
        let client =
            ClientHandle::connect(Arc::new(cluster.clone()), "0", "server.1", "zk1:2181", "/bench")
                .await
                .unwrap();
        client.setup().await.unwrap();
        client
    }

    fn create_stream(total: u64) -> WorkloadStream {
        WorkloadStream::new(
            Workload::Create,
            total,
            Arc::new(SequentialKeys::new(4, Vec::new())),
            Arc::new(CreateHandler),
        )
    }

    #[tokio::test]
    async fn test_single_worker_runs_every_request() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;

        let stat = execute(&mut client, &create_stream(20)).await.unwrap();

        assert_eq!(stat.ops, 20);
        assert_eq!(stat.errors, 0);
        assert!(cluster.contains("/bench/client0/0000"));
        assert!(cluster.contains("/bench/client0/0019"));
        let ids: Vec<u64> = stat.samples.iter().map(|s| s.op_id).collect();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_parallel_workers_cover_every_index_once() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;
        let connects = cluster.op_count(Op::Connect);

        let stat = execute(&mut client, &create_stream(107).with_parallelism(5))
            .await
            .unwrap();

        assert_eq!(stat.ops, 107);
        assert_eq!(stat.errors, 0);
        let mut ids: Vec<u64> = stat.samples.iter().map(|s| s.op_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..107).collect::<Vec<_>>());
        assert_eq!(cluster.op_count(Op::Connect), connects + 5);
        assert_eq!(client.num_children(), 0);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_errors_are_recorded_not_returned() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;
        let stream = create_stream(5);
        execute(&mut client, &stream).await.unwrap();

        // every key now exists
        let stat = execute(&mut client, &stream).await.unwrap();
        assert_eq!(stat.ops, 5);
        assert_eq!(stat.errors, 5);
        assert_eq!(stat.min_latency, None);
        assert!(stat.samples.iter().all(|s| s.is_error()));
    }

    #[tokio::test]
    async fn test_no_server_triggers_reconnect() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;
        cluster.inject_failure(Op::Get, "/bench", 1, SessionError::NoServer("zk1:2181".into()));
        let connects = cluster.op_count(Op::Connect);

        let stream = WorkloadStream::new(
            Workload::WarmUp,
            3,
            Arc::new(NamespaceNode),
            Arc::new(ReadHandler),
        );
        let stat = execute(&mut client, &stream).await.unwrap();

        assert_eq!(stat.errors, 1);
        assert_eq!(stat.successes, 2);
        assert_eq!(cluster.op_count(Op::Connect), connects + 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_recovers_on_next_request() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;
        cluster.inject_failure(Op::Get, "/bench", 1, SessionError::NoServer("zk1:2181".into()));
        cluster.inject_failure(Op::Connect, "zk1", 1, SessionError::NoServer("zk1:2181".into()));
        let connects = cluster.op_count(Op::Connect);

        let stream = WorkloadStream::new(
            Workload::Read,
            10,
            Arc::new(NamespaceNode),
            Arc::new(ReadHandler),
        );
        let first = execute(&mut client, &stream).await.unwrap();
        assert_eq!(first.errors, 1);
        assert_eq!(first.successes, 9);

        let second = execute(&mut client, &stream).await.unwrap();
        assert_eq!(second.errors, 0);
        assert!(client.is_connected());
        // the failed reconnect, then the one before the next request
        assert_eq!(cluster.op_count(Op::Connect), connects + 2);
    }

    #[tokio::test]
    async fn test_fixed_key_generates_once() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;
        client.create("xx", b"v").await.unwrap();

        let stream = WorkloadStream::new(
            Workload::Read,
            4,
            Arc::new(FixedKey::new("xx", Vec::new())),
            Arc::new(ReadHandler),
        )
        .with_fixed_key(true);
        let stat = execute(&mut client, &stream).await.unwrap();
        assert_eq!(stat.ops, 4);
        assert_eq!(stat.errors, 0);
    }

    #[tokio::test]
    async fn test_skewed_keys_stay_in_range() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;
        execute(&mut client, &create_stream(50)).await.unwrap();

        let stream = WorkloadStream::new(
            Workload::Read,
            50,
            Arc::new(SequentialKeys::new(4, Vec::new())),
            Arc::new(ReadHandler),
        )
        .with_skewed_keys(true);
        let stat = execute(&mut client, &stream).await.unwrap();
        assert_eq!(stat.ops, 50);
        assert_eq!(stat.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_stops_at_duration() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;

        let start = Instant::now();
        let stat = execute_paced(&mut client, &create_stream(1000), 10, Duration::from_secs(1)).await;

        assert_eq!(stat.ops, 10);
        assert!(start.elapsed() >= Duration::from_millis(900));
        assert!(start.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_stops_at_request_count() {
        let cluster = MemoryCluster::new();
        let mut client = client(&cluster).await;

        let start = Instant::now();
        let stat = execute_paced(&mut client, &create_stream(5), 10, Duration::from_secs(10)).await;

        assert_eq!(stat.ops, 5);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_skips_missed_ticks() {
        let cluster = MemoryCluster::new().with_latency(Duration::from_millis(250));
        let mut client = client(&cluster).await;

        // 100 rps requested, but each request takes 250ms
        let stat = execute_paced(&mut client, &create_stream(1000), 100, Duration::from_secs(1)).await;
        assert!(stat.ops <= 5, "issued {}", stat.ops);
        assert!(stat.ops >= 3, "issued {}", stat.ops);
    }

    #[tokio::test]
    async fn test_execute_on_clients_merges_mixed_streams_per_client() {
        let cluster = MemoryCluster::new();
        let connector: Arc<dyn zkbench_session::Connector> = Arc::new(cluster.clone());
        let mut clients = Vec::new();
        for id in 0..2 {
            let c = ClientHandle::connect(Arc::clone(&connector), id.to_string(), "s", "zk1:2181", "/bench")
                .await
                .unwrap();
            c.setup().await.unwrap();
            clients.push(c);
        }

        let streams = vec![
            create_stream(10),
            WorkloadStream::new(
                Workload::Mixed,
                7,
                Arc::new(NamespaceNode),
                Arc::new(ReadHandler),
            ),
        ];
        let (clients, stats) = execute_on_clients(clients, &streams).await;
        let stats = stats.unwrap();

        assert_eq!(clients.len(), 2);
        assert_eq!(clients[1].id(), "1");
        assert!(clients.iter().all(|c| c.num_children() == 0 && c.is_connected()));
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.ops == 17 && s.errors == 0));
    }
}
