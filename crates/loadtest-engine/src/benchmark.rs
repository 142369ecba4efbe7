//! The base benchmark: one pass over every selected workload on every
//! client.

use crate::client::ClientHandle;
use crate::config::BenchConfig;
use crate::driver::execute_on_clients;
use crate::pool::{cleanup_handles, CleanupReport, ClientPool};
use crate::stats::StatAccumulator;
use crate::workload::Workload;
use crate::LoadTestError;
use std::fs::File;
use std::sync::Arc;
use tracing::{error, info, warn};
use zkbench_session::{Connector, SessionError};

pub const SUMMARY_FILE: &str = "summary.dat";
pub const RAW_FILE: &str = "raw.dat";

const SUMMARY_HEADER: [&str; 9] = [
    "client_id",
    "bench_test",
    "operations",
    "errors",
    "average_latency",
    "min_latency",
    "max_latency",
    "total_latency",
    "throughput",
];
const RAW_HEADER: [&str; 6] = ["client_id", "bench_test", "time", "op_id", "error", "latency"];

/// Statistics of one workload on one client.
#[derive(Debug, Clone)]
pub struct ClientResult {
    pub client_id: String,
    pub workload: Workload,
    /// `<WORKLOAD>.<run>`.
    pub bench_test: String,
    pub stats: StatAccumulator,
}

/// CSV sinks for per-client summaries and, optionally, raw samples.
pub struct BenchOutput {
    summary: csv::Writer<File>,
    raw: Option<csv::Writer<File>>,
}

impl BenchOutput {
    /// Create `<prefix>summary.dat` and, when `raw` is set, `<prefix>raw.dat`.
    pub fn create(prefix: &str, raw: bool) -> Result<Self, LoadTestError> {
        let mut summary = csv::Writer::from_path(format!("{prefix}{SUMMARY_FILE}"))?;
        summary.write_record(SUMMARY_HEADER)?;
        let raw = if raw {
            let mut writer = csv::Writer::from_path(format!("{prefix}{RAW_FILE}"))?;
            writer.write_record(RAW_HEADER)?;
            Some(writer)
        } else {
            None
        };
        Ok(Self { summary, raw })
    }

    /// Append the summary row, and raw rows when enabled, for `result`.
    pub fn write(&mut self, result: &ClientResult) -> Result<(), LoadTestError> {
        let stats = &result.stats;
        let nanos = |d: Option<std::time::Duration>| d.map_or(0, |d| d.as_nanos()).to_string();
        self.summary.write_record([
            result.client_id.clone(),
            result.bench_test.clone(),
            stats.ops.to_string(),
            stats.errors.to_string(),
            stats.avg_latency().as_nanos().to_string(),
            nanos(stats.min_latency),
            nanos(stats.max_latency),
            stats.total_latency.as_nanos().to_string(),
            format!("{:.6}", stats.throughput()),
        ])?;

        if let Some(raw) = &mut self.raw {
            for sample in &stats.samples {
                let (error, latency) = match sample.latency {
                    Some(d) => ("0", d.as_nanos().to_string()),
                    None => ("1", "-1".to_string()),
                };
                raw.write_record([
                    result.client_id.clone(),
                    result.bench_test.clone(),
                    sample.started_at.format("%H:%M:%S%.5f").to_string(),
                    sample.op_id.to_string(),
                    error.to_string(),
                    latency,
                ])?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), LoadTestError> {
        self.summary.flush()?;
        if let Some(raw) = &mut self.raw {
            raw.flush()?;
        }
        Ok(())
    }
}

/// Order in which a base run executes the selected workloads.
pub fn run_order(config: &BenchConfig) -> Vec<Workload> {
    let mut order = vec![Workload::WarmUp];
    if config.types.contains(Workload::Create) {
        order.push(Workload::Create);
        order.push(Workload::Fill);
    }
    for workload in [Workload::Read, Workload::Write, Workload::Mixed, Workload::Delete] {
        if config.types.contains(workload) {
            order.push(workload);
        }
    }
    order
}

/// A pool plus the handle bound to the namespace root.
pub struct Benchmark {
    config: BenchConfig,
    pool: ClientPool,
    root: ClientHandle,
}

impl Benchmark {
    /// Connect every client and the root handle, then set up their
    /// subtrees. Setup failures are logged, not returned.
    pub async fn init(config: BenchConfig, connector: Arc<dyn Connector>) -> Result<Self, LoadTestError> {
        config.validate()?;

        let pool = ClientPool::create(
            Arc::clone(&connector),
            &config.servers,
            &config.endpoints,
            config.clients,
            &config.namespace,
        )
        .await?;
        let root = ClientHandle::connect_root(
            connector,
            &config.servers[0],
            &config.endpoints[0],
            &config.namespace,
        )
        .await
        .map_err(|source| LoadTestError::Connection {
            client: "root".into(),
            endpoint: config.endpoints[0].clone(),
            source,
        })?;

        if let Err(e) = root.setup().await {
            error!("[Client root]: error in initializing root client: {}", e);
        }
        pool.setup_all().await;
        info!("Benchmark initialized with {} clients", pool.len());

        Ok(Self { config, pool, root })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ClientPool {
        &mut self.pool
    }

    /// List the namespace children through every client.
    pub async fn smoke(&self) -> Vec<(String, Result<Vec<String>, SessionError>)> {
        let mut results = Vec::with_capacity(self.pool.len());
        for client in self.pool.clients() {
            let listed = client.list_children(&self.config.namespace).await;
            match &listed {
                Ok((children, stat)) => info!(
                    "[Client {}->{}]: children: {:?}; stat: {:?}",
                    client.id(),
                    client.endpoint(),
                    children,
                    stat
                ),
                Err(e) => warn!("[Client {}->{}]: smoke test failed: {}", client.id(), client.endpoint(), e),
            }
            results.push((client.id().to_string(), listed.map(|(children, _)| children)));
        }
        results
    }

    /// Run one workload on every client concurrently.
    pub async fn run_workload(&mut self, workload: Workload, run: u32) -> Result<Vec<ClientResult>, LoadTestError> {
        let streams = workload.streams(&self.config);
        info!("Running {} ({} stream(s) per client)", workload, streams.len());

        let clients = self.pool.take_clients();
        let (clients, stats) = execute_on_clients(clients, &streams).await;
        self.pool.restore_clients(clients);
        let stats = stats?;

        let bench_test = format!("{workload}.{run}");
        let results = self
            .pool
            .clients()
            .iter()
            .zip(stats)
            .enumerate()
            .map(|(index, (client, stats))| {
                info!("[Client {}->{}]: done bench {}", client.id(), client.endpoint(), workload);
                ClientResult {
                    client_id: index.to_string(),
                    workload,
                    bench_test: bench_test.clone(),
                    stats,
                }
            })
            .collect();
        Ok(results)
    }

    /// Run every selected workload in order, writing each client's result to
    /// `output` as soon as its workload finishes.
    pub async fn run(&mut self, output: &mut BenchOutput) -> Result<Vec<ClientResult>, LoadTestError> {
        let mut all = Vec::new();
        for workload in run_order(&self.config) {
            let results = self.run_workload(workload, 1).await?;
            for result in &results {
                output.write(result)?;
            }
            output.flush()?;
            all.extend(results);
        }
        Ok(all)
    }

    /// Remove every client subtree with bounded retries, then the namespace
    /// root.
    pub async fn done(mut self) -> CleanupReport {
        let report = self.pool.cleanup().await;
        let root = cleanup_handles(vec![&mut self.root]).await;
        if !root.is_success() {
            error!("[Client root]: error in clean up root directory");
        }
        self.pool.close().await;
        report
    }

    /// Close every session without deleting anything.
    pub async fn close(mut self) {
        self.pool.close().await;
        self.root.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchTypes;

    #[test]
    fn test_run_order() {
        let config = BenchConfig::new("/bench", 1, vec!["zk1:2181".into()]).with_types(
            BenchTypes::new()
                .with(Workload::Delete)
                .with(Workload::Mixed)
                .with(Workload::Create)
                .with(Workload::Read),
        );
        assert_eq!(
            run_order(&config),
            vec![
                Workload::WarmUp,
                Workload::Create,
                Workload::Fill,
                Workload::Read,
                Workload::Mixed,
                Workload::Delete,
            ]
        );

        let bare = BenchConfig::new("/bench", 1, vec!["zk1:2181".into()]);
        assert_eq!(run_order(&bare), vec![Workload::WarmUp]);
    }
}
