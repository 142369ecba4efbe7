//! Gradual-overload state machine.
//!
//! The run moves through `INIT -> WARMUP -> LOAD_INCREASE` and then either
//! ends in `STABLE` or goes `FAILURE -> MITIGATION -> RECOVERED` (or
//! `PARTIAL_RECOVERY`). Steps are executed by a [`StepRunner`]; every step
//! and transition is handed to a [`RunRecorder`].

use crate::recorder::RunRecorder;
use crate::step::{StepRunner, WorkloadStepResult};
use crate::LoadTestError;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Error rate above which a step counts as failed.
pub const ERROR_RATE_CEILING: f64 = 0.10;

/// Fraction of the failure point used for the mitigation probe.
pub const MITIGATION_LOAD_FACTOR: f64 = 0.7;

/// Fraction of peak throughput the mitigation probe must exceed to count as
/// recovered.
pub const RECOVERY_THROUGHPUT_FACTOR: f64 = 0.8;

/// Pause between warmup steps.
pub const WARMUP_PAUSE: Duration = Duration::from_secs(2);

/// Pause between load-increase steps.
pub const LOAD_INCREASE_PAUSE: Duration = Duration::from_secs(3);

/// Parameters of one overload run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradualOverloadConfig {
    /// Starting rate in requests per second.
    pub initial_requests: u64,
    /// Highest rate tried before declaring the service stable.
    pub max_requests: u64,
    /// Rate increment per load-increase step.
    pub step_size: u64,
    /// Seconds per step.
    pub step_duration: u64,
    pub warmup_steps: u64,
    /// Average latency in milliseconds above which a step fails.
    pub latency_threshold: f64,
    /// Throughput drop from peak, in percent, above which a step fails.
    pub throughput_drop: f64,
    /// Seconds to wait after INIT, after WARMUP and before the mitigation
    /// probe.
    pub stabilization_time: u64,
}

impl GradualOverloadConfig {
    /// Defaults derived from the base request count.
    pub fn from_requests(requests: u64) -> Self {
        Self {
            initial_requests: requests / 20,
            max_requests: requests * 5,
            step_size: requests / 10,
            step_duration: 10,
            warmup_steps: 5,
            latency_threshold: 50.0,
            throughput_drop: 30.0,
            stabilization_time: 5,
        }
    }

    pub fn validate(&self) -> Result<(), LoadTestError> {
        let counts = [
            ("initial_requests", self.initial_requests),
            ("max_requests", self.max_requests),
            ("step_size", self.step_size),
            ("step_duration", self.step_duration),
            ("warmup_steps", self.warmup_steps),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(LoadTestError::Config(format!("{name} must be positive")));
            }
        }
        if self.max_requests < self.initial_requests {
            return Err(LoadTestError::Config(format!(
                "max_requests ({}) is below initial_requests ({})",
                self.max_requests, self.initial_requests
            )));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.latency_threshold) || !positive(self.throughput_drop) {
            return Err(LoadTestError::Config(
                "latency and throughput-drop thresholds must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Rate at which LOAD_INCREASE starts.
    pub fn load_increase_start(&self) -> u64 {
        self.initial_requests + self.step_size * self.warmup_steps
    }

    /// Rate increment per warmup step.
    pub fn warmup_increment(&self) -> u64 {
        (self.step_size / self.warmup_steps.max(1)).max(1)
    }
}

/// Phases of an overload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Warmup,
    LoadIncrease,
    Failure,
    Mitigation,
    Recovered,
    PartialRecovery,
    Stable,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Warmup => "WARMUP",
            Phase::LoadIncrease => "LOAD_INCREASE",
            Phase::Failure => "FAILURE",
            Phase::Mitigation => "MITIGATION",
            Phase::Recovered => "RECOVERED",
            Phase::PartialRecovery => "PARTIAL_RECOVERY",
            Phase::Stable => "STABLE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Recovered | Phase::PartialRecovery | Phase::Stable)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phase transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub timestamp: DateTime<Local>,
    pub workload: u64,
}

/// Why a step was judged a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Latency { avg_ms: f64, threshold_ms: f64 },
    ThroughputDrop { drop_percent: f64, threshold_percent: f64 },
    ErrorRate { rate: f64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Latency {
                avg_ms,
                threshold_ms,
            } => write!(f, "latency {avg_ms:.2}ms above {threshold_ms:.2}ms"),
            FailureReason::ThroughputDrop {
                drop_percent,
                threshold_percent,
            } => write!(
                f,
                "throughput dropped {drop_percent:.2}% from peak (threshold {threshold_percent:.2}%)"
            ),
            FailureReason::ErrorRate { rate } => write!(
                f,
                "error rate {:.2}% above {:.2}%",
                rate * 100.0,
                ERROR_RATE_CEILING * 100.0
            ),
        }
    }
}

/// Percentage drop of `current` below `peak`, `None` without a peak.
pub fn throughput_drop_percent(current: f64, peak: f64) -> Option<f64> {
    (peak > 0.0).then(|| (1.0 - current / peak) * 100.0)
}

/// Evaluate the failure predicate for one step against the running peak.
/// Conditions are checked in order and the first match is returned.
pub fn detect_failure(
    config: &GradualOverloadConfig,
    current: &WorkloadStepResult,
    peak_throughput: f64,
) -> Option<FailureReason> {
    if current.avg_latency_ms > config.latency_threshold {
        return Some(FailureReason::Latency {
            avg_ms: current.avg_latency_ms,
            threshold_ms: config.latency_threshold,
        });
    }
    if let Some(drop) = throughput_drop_percent(current.throughput, peak_throughput) {
        if drop > config.throughput_drop {
            return Some(FailureReason::ThroughputDrop {
                drop_percent: drop,
                threshold_percent: config.throughput_drop,
            });
        }
    }
    match current.error_rate() {
        Some(rate) if rate > ERROR_RATE_CEILING => Some(FailureReason::ErrorRate { rate }),
        _ => None,
    }
}

/// Load used by the mitigation probe, truncated towards zero.
pub fn mitigated_load(failure_point: u64) -> u64 {
    (failure_point as f64 * MITIGATION_LOAD_FACTOR) as u64
}

/// Whether a mitigation probe result counts as a full recovery.
pub fn is_recovered(
    config: &GradualOverloadConfig,
    probe: &WorkloadStepResult,
    peak_throughput: f64,
) -> bool {
    probe.avg_latency_ms < config.latency_threshold
        && probe.throughput > peak_throughput * RECOVERY_THROUGHPUT_FACTOR
}

/// Everything a finished run observed.
#[derive(Debug, Clone)]
pub struct OverloadOutcome {
    pub config: GradualOverloadConfig,
    /// INIT step result.
    pub baseline: WorkloadStepResult,
    pub peak_throughput: f64,
    pub failure_point: Option<u64>,
    pub failure_reason: Option<FailureReason>,
    /// Mitigation probe result, when a failure was detected.
    pub mitigation: Option<WorkloadStepResult>,
    pub phases: Vec<PhaseRecord>,
    pub steps: Vec<(Phase, WorkloadStepResult)>,
    /// Recorder appends that failed during the run.
    pub recorder_failures: u64,
}

impl OverloadOutcome {
    /// Terminal phase of the run.
    pub fn final_phase(&self) -> Option<Phase> {
        self.phases.last().map(|r| r.phase).filter(Phase::is_terminal)
    }

    pub fn phase_sequence(&self) -> Vec<Phase> {
        self.phases.iter().map(|r| r.phase).collect()
    }

    pub fn baseline_latency_ms(&self) -> f64 {
        self.baseline.avg_latency_ms
    }

    /// `[initial, failure_point - step_size]`, when a failure was detected.
    pub fn safe_operating_range(&self) -> Option<(u64, u64)> {
        self.failure_point.map(|fp| {
            (
                self.config.initial_requests,
                fp.saturating_sub(self.config.step_size),
            )
        })
    }
}

/// Drives one overload run.
pub struct OverloadEngine<R, W> {
    config: GradualOverloadConfig,
    runner: R,
    recorder: W,
    phases: Vec<PhaseRecord>,
    steps: Vec<(Phase, WorkloadStepResult)>,
    peak_throughput: f64,
    recorder_failures: u64,
}

impl<R: StepRunner, W: RunRecorder> OverloadEngine<R, W> {
    pub fn new(config: GradualOverloadConfig, runner: R, recorder: W) -> Self {
        Self {
            config,
            runner,
            recorder,
            phases: Vec::new(),
            steps: Vec::new(),
            peak_throughput: 0.0,
            recorder_failures: 0,
        }
    }

    /// Give back the recorder, e.g. to close it.
    pub fn into_recorder(self) -> W {
        self.recorder
    }

    /// Run every phase to a terminal state.
    pub async fn run(&mut self) -> Result<OverloadOutcome, LoadTestError> {
        self.config.validate()?;
        self.phases.clear();
        self.steps.clear();
        self.peak_throughput = 0.0;
        self.recorder_failures = 0;

        info!("Starting gradual overload test");
        info!(
            "Configuration: Initial={}, Max={}, Step={}, StepDuration={}s",
            self.config.initial_requests,
            self.config.max_requests,
            self.config.step_size,
            self.config.step_duration
        );
        self.runner.prepare().await?;

        let baseline = self.run_init().await?;
        self.run_warmup().await?;

        let mut failure_point = None;
        let mut failure_reason = None;
        let mut mitigation = None;
        match self.run_load_increase().await? {
            Some((load, reason)) => {
                info!("Failure detected at workload: {} requests", load);
                self.mark_phase(Phase::Failure, load);
                mitigation = Some(self.run_mitigation(load).await?);
                failure_point = Some(load);
                failure_reason = Some(reason);
            }
            None => {
                info!("System remained stable up to maximum workload");
                self.mark_phase(Phase::Stable, self.config.max_requests);
            }
        }

        if self.recorder_failures > 0 {
            warn!("{} recorder appends failed during the run", self.recorder_failures);
        }

        Ok(OverloadOutcome {
            config: self.config.clone(),
            baseline,
            peak_throughput: self.peak_throughput,
            failure_point,
            failure_reason,
            mitigation,
            phases: self.phases.clone(),
            steps: self.steps.clone(),
            recorder_failures: self.recorder_failures,
        })
    }

    async fn run_init(&mut self) -> Result<WorkloadStepResult, LoadTestError> {
        let load = self.config.initial_requests;
        self.mark_phase(Phase::Init, load);
        info!("Phase: INIT - establishing baseline at {} requests", load);

        let baseline = self.run_step(Phase::Init, load, self.config.step_duration).await?;
        self.peak_throughput = baseline.throughput;
        info!(
            "Baseline established - Latency: {:.2}ms, Throughput: {:.2} ops/s",
            baseline.avg_latency_ms, baseline.throughput
        );

        self.stabilize().await;
        Ok(baseline)
    }

    async fn run_warmup(&mut self) -> Result<(), LoadTestError> {
        let mut load = self.config.initial_requests;
        self.mark_phase(Phase::Warmup, load);
        info!(
            "Phase: WARMUP - increasing load over {} steps",
            self.config.warmup_steps
        );

        let increment = self.config.warmup_increment();
        for i in 0..self.config.warmup_steps {
            load += increment;
            info!("Warmup step {}/{}: {} requests", i + 1, self.config.warmup_steps, load);
            let result = self.run_step(Phase::Warmup, load, self.config.step_duration).await?;
            self.update_peak(result.throughput);
            tokio::time::sleep(WARMUP_PAUSE).await;
        }

        info!("Warmup complete - Peak throughput: {:.2} ops/s", self.peak_throughput);
        self.stabilize().await;
        Ok(())
    }

    /// Returns the failure point and reason, or `None` when `max_requests`
    /// was exceeded without a failure.
    async fn run_load_increase(&mut self) -> Result<Option<(u64, FailureReason)>, LoadTestError> {
        let mut load = self.config.load_increase_start();
        // the marker carries no workload; each step row has its own
        self.mark_phase(Phase::LoadIncrease, 0);
        info!("Phase: LOAD_INCREASE - increasing load to find the critical point");

        let mut previous: Option<WorkloadStepResult> = None;
        while load <= self.config.max_requests {
            info!("Testing workload: {} requests", load);
            let result = self
                .run_step(Phase::LoadIncrease, load, self.config.step_duration)
                .await?;

            if let Some(reason) = detect_failure(&self.config, &result, self.peak_throughput) {
                warn!("FAILURE DETECTED at workload {}: {}", load, reason);
                if let Some(prev) = &previous {
                    warn!(
                        "  previous step: {:.2} ops/s at {:.2}ms",
                        prev.throughput, prev.avg_latency_ms
                    );
                }
                return Ok(Some((load, reason)));
            }

            self.update_peak(result.throughput);
            previous = Some(result);
            load += self.config.step_size;
            tokio::time::sleep(LOAD_INCREASE_PAUSE).await;
        }

        Ok(None)
    }

    async fn run_mitigation(&mut self, failure_point: u64) -> Result<WorkloadStepResult, LoadTestError> {
        self.mark_phase(Phase::Mitigation, failure_point);
        info!("Phase: MITIGATION - signalling mitigation");
        if let Err(e) = self.recorder.signal_mitigation(failure_point) {
            error!("Failed to write mitigation marker: {}", e);
            self.recorder_failures += 1;
        }

        let load = mitigated_load(failure_point);
        info!(
            "Reducing load to {} requests ({:.0}% of failure point)",
            load,
            MITIGATION_LOAD_FACTOR * 100.0
        );
        self.stabilize().await;

        let probe = self
            .run_step(Phase::Mitigation, load, self.config.step_duration * 2)
            .await?;
        if is_recovered(&self.config, &probe, self.peak_throughput) {
            info!(
                "Mitigation SUCCESSFUL - Latency: {:.2}ms, Throughput: {:.2} ops/s",
                probe.avg_latency_ms, probe.throughput
            );
            self.mark_phase(Phase::Recovered, load);
        } else {
            info!(
                "Mitigation PARTIAL - Latency: {:.2}ms, Throughput: {:.2} ops/s",
                probe.avg_latency_ms, probe.throughput
            );
            self.mark_phase(Phase::PartialRecovery, load);
        }
        Ok(probe)
    }

    async fn run_step(
        &mut self,
        phase: Phase,
        load: u64,
        duration_secs: u64,
    ) -> Result<WorkloadStepResult, LoadTestError> {
        let result = self.runner.run_step(load, duration_secs).await?;
        if let Err(e) = self.recorder.record_step(phase, &result) {
            error!("Failed to record {} step at workload {}: {}", phase, load, e);
            self.recorder_failures += 1;
        }
        self.steps.push((phase, result.clone()));
        Ok(result)
    }

    fn mark_phase(&mut self, phase: Phase, workload: u64) {
        let record = PhaseRecord {
            phase,
            timestamp: Local::now(),
            workload,
        };
        if let Err(e) = self.recorder.record_phase(&record) {
            error!("Failed to record phase {}: {}", phase, e);
            self.recorder_failures += 1;
        }
        info!("=== PHASE TRANSITION: {} at workload {} ===", phase, workload);
        self.phases.push(record);
    }

    fn update_peak(&mut self, throughput: f64) {
        if throughput > self.peak_throughput {
            self.peak_throughput = throughput;
        }
    }

    async fn stabilize(&self) {
        tokio::time::sleep(Duration::from_secs(self.config.stabilization_time)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GradualOverloadConfig {
        GradualOverloadConfig {
            initial_requests: 100,
            max_requests: 1000,
            step_size: 100,
            step_duration: 10,
            warmup_steps: 5,
            latency_threshold: 50.0,
            throughput_drop: 30.0,
            stabilization_time: 5,
        }
    }

    fn step(throughput: f64, avg_latency_ms: f64, errors: u64, total: u64) -> WorkloadStepResult {
        WorkloadStepResult {
            throughput,
            avg_latency_ms,
            errors,
            total_requests: total,
            ..WorkloadStepResult::default()
        }
    }

    #[test]
    fn test_defaults_from_requests() {
        let config = GradualOverloadConfig::from_requests(1000);
        assert_eq!(config.initial_requests, 50);
        assert_eq!(config.max_requests, 5000);
        assert_eq!(config.step_size, 100);
        assert_eq!(config.step_duration, 10);
        assert_eq!(config.warmup_steps, 5);
        assert_eq!(config.latency_threshold, 50.0);
        assert_eq!(config.throughput_drop, 30.0);
        assert_eq!(config.stabilization_time, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = config();
        c.step_size = 0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.max_requests = 50;
        assert!(c.validate().is_err());

        let mut c = config();
        c.latency_threshold = f64::NAN;
        assert!(c.validate().is_err());

        // tiny base request counts derive a zero initial rate
        assert!(GradualOverloadConfig::from_requests(10).validate().is_err());
    }

    #[test]
    fn test_warmup_increment_and_start() {
        let c = config();
        assert_eq!(c.warmup_increment(), 20);
        assert_eq!(c.load_increase_start(), 600);

        let mut small = config();
        small.step_size = 3;
        assert_eq!(small.warmup_increment(), 1);
    }

    #[test]
    fn test_throughput_drop_example() {
        let drop = throughput_drop_percent(1100.2, 1850.5).unwrap();
        assert!((drop - 40.55).abs() < 0.01);

        let current = step(1100.2, 10.0, 0, 1000);
        assert!(matches!(
            detect_failure(&config(), &current, 1850.5),
            Some(FailureReason::ThroughputDrop { .. })
        ));

        let mut lenient = config();
        lenient.throughput_drop = 45.0;
        assert_eq!(detect_failure(&lenient, &current, 1850.5), None);
    }

    #[test]
    fn test_error_rate_triggers_regardless_of_latency_and_throughput() {
        let current = step(2000.0, 1.0, 150, 1000);
        assert_eq!(
            detect_failure(&config(), &current, 1000.0),
            Some(FailureReason::ErrorRate { rate: 0.15 })
        );

        let at_ceiling = step(2000.0, 1.0, 100, 1000);
        assert_eq!(detect_failure(&config(), &at_ceiling, 1000.0), None);
    }

    #[test]
    fn test_first_matching_condition_wins() {
        let current = step(10.0, 80.0, 500, 1000);
        assert!(matches!(
            detect_failure(&config(), &current, 1000.0),
            Some(FailureReason::Latency { .. })
        ));
    }

    #[test]
    fn test_empty_step_and_zero_peak_do_not_fail() {
        let empty = step(0.0, 0.0, 0, 0);
        assert_eq!(detect_failure(&config(), &empty, 0.0), None);
        assert_eq!(throughput_drop_percent(5.0, 0.0), None);
    }

    #[test]
    fn test_mitigated_load() {
        assert_eq!(mitigated_load(2300), 1610);
        assert_eq!(mitigated_load(1001), 700);
        assert_eq!(mitigated_load(1), 0);
    }

    #[test]
    fn test_is_recovered() {
        let c = config();
        assert!(is_recovered(&c, &step(900.0, 10.0, 0, 100), 1000.0));
        assert!(!is_recovered(&c, &step(800.0, 10.0, 0, 100), 1000.0));
        assert!(!is_recovered(&c, &step(900.0, 50.0, 0, 100), 1000.0));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::PartialRecovery.to_string(), "PARTIAL_RECOVERY");
        assert_eq!(Phase::LoadIncrease.to_string(), "LOAD_INCREASE");
        assert!(Phase::Stable.is_terminal());
        assert!(!Phase::Failure.is_terminal());
    }
}
