//! Durable sinks for step metrics, phase transitions and the mitigation
//! signal.

use crate::overload::{Phase, PhaseRecord};
use crate::step::WorkloadStepResult;
use crate::LoadTestError;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Timestamp layout shared by every record stream.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub const METRICS_FILE: &str = "gradual_overload_metrics.csv";
pub const PHASES_FILE: &str = "phase_transitions.csv";
pub const SUMMARY_FILE: &str = "test_summary.txt";

const METRICS_HEADER: [&str; 9] = [
    "timestamp",
    "phase",
    "workload",
    "throughput",
    "avg_latency_ms",
    "max_latency_ms",
    "p99_latency_ms",
    "errors",
    "total_requests",
];
const PHASES_HEADER: [&str; 3] = ["phase", "timestamp", "workload"];

/// Receives every step result, phase transition and mitigation signal of an
/// overload run.
pub trait RunRecorder: Send {
    fn record_step(&mut self, phase: Phase, result: &WorkloadStepResult) -> Result<(), LoadTestError>;

    fn record_phase(&mut self, record: &PhaseRecord) -> Result<(), LoadTestError>;

    /// Notify the external mitigation agent that the run failed at
    /// `failure_point`.
    fn signal_mitigation(&mut self, failure_point: u64) -> Result<(), LoadTestError>;
}

/// CSV-backed recorder. Every append is flushed and synced before it
/// returns.
pub struct CsvRecorder {
    metrics: csv::Writer<File>,
    phases: csv::Writer<File>,
    marker_path: Option<PathBuf>,
}

impl CsvRecorder {
    /// Create `<prefix>gradual_overload_metrics.csv` and
    /// `<prefix>phase_transitions.csv`, writing their headers. Mitigation
    /// signals go to `marker_path` when given and are dropped otherwise.
    pub fn create(prefix: &str, marker_path: Option<PathBuf>) -> Result<Self, LoadTestError> {
        let mut metrics = csv::Writer::from_path(format!("{prefix}{METRICS_FILE}"))?;
        metrics.write_record(METRICS_HEADER)?;
        sync(&mut metrics)?;

        let mut phases = csv::Writer::from_path(format!("{prefix}{PHASES_FILE}"))?;
        phases.write_record(PHASES_HEADER)?;
        sync(&mut phases)?;

        Ok(Self {
            metrics,
            phases,
            marker_path,
        })
    }

    /// Flush both streams and close them.
    pub fn close(mut self) -> Result<(), LoadTestError> {
        sync(&mut self.metrics)?;
        sync(&mut self.phases)?;
        Ok(())
    }
}

fn sync(writer: &mut csv::Writer<File>) -> Result<(), LoadTestError> {
    writer.flush()?;
    writer.get_ref().sync_data()?;
    Ok(())
}

impl RunRecorder for CsvRecorder {
    fn record_step(&mut self, phase: Phase, result: &WorkloadStepResult) -> Result<(), LoadTestError> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.metrics.write_record([
            timestamp,
            phase.to_string(),
            result.workload.to_string(),
            format!("{:.2}", result.throughput),
            format!("{:.2}", result.avg_latency_ms),
            format!("{:.2}", result.max_latency_ms),
            format!("{:.2}", result.p99_latency_ms),
            result.errors.to_string(),
            result.total_requests.to_string(),
        ])?;
        sync(&mut self.metrics)
    }

    fn record_phase(&mut self, record: &PhaseRecord) -> Result<(), LoadTestError> {
        self.phases.write_record([
            record.phase.to_string(),
            record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            record.workload.to_string(),
        ])?;
        sync(&mut self.phases)
    }

    fn signal_mitigation(&mut self, failure_point: u64) -> Result<(), LoadTestError> {
        match &self.marker_path {
            Some(path) => append_mitigation_marker(path, failure_point, Local::now()),
            None => Ok(()),
        }
    }
}

/// Append `mit,<timestamp>,workload=<N>` to `path`, creating the file and
/// its parent directories if needed.
pub fn append_mitigation_marker(
    path: &Path,
    workload: u64,
    at: DateTime<Local>,
) -> Result<(), LoadTestError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "mit,{},workload={}", at.format(TIMESTAMP_FORMAT), workload)?;
    file.sync_data()?;
    info!("Mitigation marker written to {}", path.display());
    Ok(())
}

/// `agent/metrics/mitigation_trigger.txt`, two levels above the directory
/// holding the running executable.
pub fn default_mitigation_marker_path() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    let base = dir
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.join("../.."));
    Ok(base.join("agent").join("metrics").join("mitigation_trigger.txt"))
}

/// Last non-empty record of the injection marker file, `None` when the file
/// is absent, unreadable or empty.
pub fn read_injection_marker(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}
