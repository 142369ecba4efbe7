//! Per-request statistics and their merge semantics.
//!
//! A `StatAccumulator` is filled by one worker (or by several workers under a
//! lock) and folded upwards: child handles into a client, clients into a
//! step. Only sums, counts, extrema, timestamps and the sample series are
//! stored. Average latency and throughput are always derived from the merged
//! sums and never merged themselves.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One issued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySample {
    /// Iteration index the request was generated for.
    pub op_id: u64,
    /// Wall-clock time the request was issued.
    pub started_at: DateTime<Utc>,
    /// Request latency, `None` when the request failed.
    pub latency: Option<Duration>,
}

impl LatencySample {
    pub fn is_error(&self) -> bool {
        self.latency.is_none()
    }
}

/// Accumulated statistics for a stream of requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatAccumulator {
    /// Requests issued, failed ones included.
    pub ops: u64,
    /// Failed requests.
    pub errors: u64,
    /// Requests with a valid latency sample.
    pub successes: u64,
    /// Sum of successful request latencies.
    pub total_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Samples in issue order per worker.
    pub samples: Vec<LatencySample>,
}

impl StatAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops == 0 && self.started_at.is_none()
    }

    /// Widen the observed wall-clock window to include `start..end`.
    pub fn mark_window(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.started_at = Some(self.started_at.map_or(start, |s| s.min(start)));
        self.ended_at = Some(self.ended_at.map_or(end, |e| e.max(end)));
    }

    /// Record one request outcome. `latency` is `None` for a failed request.
    pub fn record(&mut self, op_id: u64, started_at: DateTime<Utc>, latency: Option<Duration>) {
        self.ops += 1;
        match latency {
            Some(d) => {
                self.successes += 1;
                self.total_latency += d;
                self.min_latency = Some(self.min_latency.map_or(d, |m| m.min(d)));
                self.max_latency = Some(self.max_latency.map_or(d, |m| m.max(d)));
            }
            None => self.errors += 1,
        }
        self.samples.push(LatencySample {
            op_id,
            started_at,
            latency,
        });
    }

    /// Fold `other` into `self`.
    ///
    /// Counts and sums add, extrema take min/max (an empty side adopts the
    /// other side's value), windows widen and sample series concatenate.
    pub fn merge(&mut self, other: &StatAccumulator) {
        self.ops += other.ops;
        self.errors += other.errors;
        self.successes += other.successes;
        self.total_latency += other.total_latency;
        self.min_latency = merge_opt(self.min_latency, other.min_latency, Ord::min);
        self.max_latency = merge_opt(self.max_latency, other.max_latency, Ord::max);
        self.started_at = merge_opt(self.started_at, other.started_at, Ord::min);
        self.ended_at = merge_opt(self.ended_at, other.ended_at, Ord::max);
        self.samples.extend(other.samples.iter().cloned());
    }

    /// Owned variant of [`merge`](Self::merge).
    pub fn merged(mut self, other: &StatAccumulator) -> Self {
        self.merge(other);
        self
    }

    /// Mean latency over successful requests.
    pub fn avg_latency(&self) -> Duration {
        if self.successes == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_latency.as_nanos() / self.successes as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Requests per second of summed request latency.
    ///
    /// Under concurrency this differs from [`wall_clock_throughput`]: the
    /// denominator is the sum of per-request latencies across all workers,
    /// not the elapsed time.
    ///
    /// [`wall_clock_throughput`]: Self::wall_clock_throughput
    pub fn throughput(&self) -> f64 {
        let secs = self.total_latency.as_secs_f64();
        if secs > 0.0 {
            self.ops as f64 / secs
        } else {
            0.0
        }
    }

    /// Requests per second of elapsed wall-clock time.
    pub fn wall_clock_throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.ops as f64 / secs
        } else {
            0.0
        }
    }

    /// Elapsed wall-clock window.
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// Nearest-rank percentile over successful samples.
    pub fn percentile(&self, pct: f64) -> Option<Duration> {
        let mut latencies: Vec<Duration> = self.samples.iter().filter_map(|s| s.latency).collect();
        if latencies.is_empty() {
            return None;
        }
        latencies.sort_unstable();
        let rank = ((pct / 100.0) * latencies.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, latencies.len()) - 1;
        Some(latencies[idx])
    }

    pub fn p99_latency(&self) -> Option<Duration> {
        self.percentile(99.0)
    }
}

fn merge_opt<T: Copy>(a: Option<T>, b: Option<T>, pick: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(pick(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}
