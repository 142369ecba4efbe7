//! One bounded workload step of the overload experiment.

use crate::client::ClientHandle;
use crate::driver::{execute_on_clients, execute_paced};
use crate::partition::share;
use crate::pool::ClientPool;
use crate::request::random_value;
use crate::stats::StatAccumulator;
use crate::workload::{
    EnsureHandler, ReadOrWriteHandler, ReadWriteCycle, SequentialKeys, Workload, WorkloadStream,
};
use crate::LoadTestError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Aggregated result of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkloadStepResult {
    /// Target rate in requests per second.
    pub workload: u64,
    pub duration_secs: u64,
    /// Issued requests per second of step duration.
    pub throughput: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub errors: u64,
    pub total_requests: u64,
}

impl WorkloadStepResult {
    /// Summarise a merged step accumulator.
    pub fn from_stats(workload: u64, duration_secs: u64, stat: &StatAccumulator) -> Self {
        let throughput = if duration_secs > 0 {
            stat.ops as f64 / duration_secs as f64
        } else {
            0.0
        };
        Self {
            workload,
            duration_secs,
            throughput,
            avg_latency_ms: as_millis(stat.avg_latency()),
            max_latency_ms: stat.max_latency.map(as_millis).unwrap_or(0.0),
            p99_latency_ms: stat.p99_latency().map(as_millis).unwrap_or(0.0),
            errors: stat.errors,
            total_requests: stat.ops,
        }
    }

    /// Failed fraction of issued requests, `None` for an empty step.
    pub fn error_rate(&self) -> Option<f64> {
        (self.total_requests > 0).then(|| self.errors as f64 / self.total_requests as f64)
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Executes steps for the overload state machine.
#[async_trait::async_trait]
pub trait StepRunner: Send {
    /// Called once before the first step.
    async fn prepare(&mut self) -> Result<(), LoadTestError> {
        Ok(())
    }

    /// Run one step at `rps` requests per second for `duration_secs`.
    async fn run_step(
        &mut self,
        rps: u64,
        duration_secs: u64,
    ) -> Result<WorkloadStepResult, LoadTestError>;
}

/// Runs steps across every client of a pool.
///
/// Each step alternates reads and writes over a prepared key space of
/// `key_space` keys per client; the step budget is split evenly across
/// clients, which run paced and concurrently.
pub struct PoolStepRunner<'a> {
    pool: &'a mut ClientPool,
    key_size: usize,
    value_size: usize,
    key_space: u64,
}

impl<'a> PoolStepRunner<'a> {
    pub fn new(pool: &'a mut ClientPool, key_size: usize, value_size: usize, key_space: u64) -> Self {
        Self {
            pool,
            key_size,
            value_size,
            key_space: key_space.max(1),
        }
    }
}

#[async_trait::async_trait]
impl StepRunner for PoolStepRunner<'_> {
    async fn prepare(&mut self) -> Result<(), LoadTestError> {
        info!(
            "Preparing {} keys for each of {} clients",
            self.key_space,
            self.pool.len()
        );
        let stream = WorkloadStream::new(
            Workload::Create,
            self.key_space,
            Arc::new(SequentialKeys::new(self.key_size, random_value(self.value_size))),
            Arc::new(EnsureHandler),
        );

        let clients = self.pool.take_clients();
        let (clients, stats) = execute_on_clients(clients, &[stream]).await;
        self.pool.restore_clients(clients);
        let stats = stats?;

        let failed: u64 = stats.iter().map(|s| s.errors).sum();
        if failed > 0 {
            warn!("{} keys could not be prepared", failed);
        }
        Ok(())
    }

    async fn run_step(
        &mut self,
        rps: u64,
        duration_secs: u64,
    ) -> Result<WorkloadStepResult, LoadTestError> {
        let clients = self.pool.take_clients();
        let budgets = share(rps.saturating_mul(duration_secs), clients.len(), 1);
        let rates = share(rps, clients.len(), 1);
        let duration = Duration::from_secs(duration_secs);
        let stream = WorkloadStream::new(
            Workload::Mixed,
            0,
            Arc::new(ReadWriteCycle::new(self.key_size, self.key_space, self.value_size)),
            Arc::new(ReadOrWriteHandler),
        );

        let mut workers = Vec::with_capacity(clients.len());
        for ((mut client, budget), rate) in clients.into_iter().zip(budgets).zip(rates) {
            let stream = stream.clone().with_total_requests(budget);
            workers.push(tokio::spawn(async move {
                let stat = execute_paced(&mut client, &stream, rate, duration).await;
                (client, stat)
            }));
        }

        let mut merged = StatAccumulator::new();
        let mut clients: Vec<ClientHandle> = Vec::with_capacity(workers.len());
        let mut failure = None;
        for worker in workers {
            match worker.await {
                Ok((client, stat)) => {
                    merged.merge(&stat);
                    clients.push(client);
                }
                Err(e) => failure = Some(e),
            }
        }
        self.pool.restore_clients(clients);
        if let Some(e) = failure {
            return Err(e.into());
        }

        Ok(WorkloadStepResult::from_stats(rps, duration_secs, &merged))
    }
}
