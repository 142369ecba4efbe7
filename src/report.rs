//! Human-readable reports for finished runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use std::fmt::Write as _;
use std::path::PathBuf;
use zkbench_loadtest::recorder::{SUMMARY_FILE, TIMESTAMP_FORMAT};
use zkbench_loadtest::{ClientResult, OverloadOutcome};

/// `<prefix>-<YYYY-MM-DD-HH_MM_SS>-`, with `-<tag>` before the timestamp
/// when given.
pub fn timestamped_prefix(prefix: &str, tag: Option<&str>, at: DateTime<Local>) -> String {
    let stamp = at.format("%Y-%m-%d-%H_%M_%S");
    match tag {
        Some(tag) => format!("{prefix}-{tag}-{stamp}-"),
        None => format!("{prefix}-{stamp}-"),
    }
}

/// Per-client results of a base run as a table.
pub fn format_client_table(results: &[ClientResult]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Client",
        "Test",
        "Ops",
        "Errors",
        "Avg latency",
        "Max latency",
        "Ops/sec",
    ]);

    let mut total_ops = 0;
    let mut total_errors = 0;
    for result in results {
        let stats = &result.stats;
        total_ops += stats.ops;
        total_errors += stats.errors;

        let errors = if stats.errors == 0 {
            Cell::new("0").fg(Color::Green)
        } else {
            Cell::new(format_number(stats.errors)).fg(Color::Red)
        };
        let max = stats
            .max_latency
            .map(|d| format_millis(d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&result.client_id),
            Cell::new(&result.bench_test),
            Cell::new(format_number(stats.ops)),
            errors,
            Cell::new(format_millis(stats.avg_latency().as_secs_f64() * 1000.0)),
            Cell::new(max),
            Cell::new(format!("{:.1}", stats.throughput())),
        ]);
    }

    table.add_row(vec![
        Cell::new("TOTAL").fg(Color::Cyan),
        Cell::new(format!("{} results", results.len())),
        Cell::new(format_number(total_ops)),
        Cell::new(format_number(total_errors)),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
    ]);

    table.to_string()
}

/// Every step of an overload run as a table.
pub fn format_step_table(outcome: &OverloadOutcome) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Phase", "Workload", "Duration", "Ops/sec", "Avg", "P99", "Errors",
    ]);

    for (phase, step) in &outcome.steps {
        let errors = match step.error_rate() {
            Some(rate) if rate > 0.0 => Cell::new(format!(
                "{} ({:.1}%)",
                format_number(step.errors),
                rate * 100.0
            ))
            .fg(Color::Red),
            _ => Cell::new("0").fg(Color::Green),
        };
        table.add_row(vec![
            Cell::new(phase.as_str()),
            Cell::new(format_number(step.workload)),
            Cell::new(format_duration(step.duration_secs as f64)),
            Cell::new(format!("{:.1}", step.throughput)),
            Cell::new(format_millis(step.avg_latency_ms)),
            Cell::new(format_millis(step.p99_latency_ms)),
            errors,
        ]);
    }

    table.to_string()
}

/// Text of `<prefix>test_summary.txt`.
pub fn format_overload_summary(outcome: &OverloadOutcome, injection: Option<&str>) -> String {
    let config = &outcome.config;
    let mut out = String::new();

    let _ = writeln!(out, "=== Gradual Overload Test Summary ===");
    let _ = writeln!(out);
    let _ = writeln!(out, "Test Configuration:");
    let _ = writeln!(out, "  Initial Requests: {}", config.initial_requests);
    let _ = writeln!(out, "  Max Requests: {}", config.max_requests);
    let _ = writeln!(out, "  Step Size: {}", config.step_size);
    let _ = writeln!(out, "  Step Duration: {} seconds", config.step_duration);
    let _ = writeln!(out, "  Warmup Steps: {}", config.warmup_steps);
    let _ = writeln!(out, "  Latency Threshold: {:.2} ms", config.latency_threshold);
    let _ = writeln!(out, "  Throughput Drop Threshold: {:.2}%", config.throughput_drop);
    let _ = writeln!(out);

    let _ = writeln!(out, "Test Results:");
    let _ = writeln!(out, "  Baseline Latency: {:.2} ms", outcome.baseline_latency_ms());
    let _ = writeln!(out, "  Peak Throughput: {:.2} ops/s", outcome.peak_throughput);
    match (outcome.failure_point, outcome.safe_operating_range()) {
        (Some(point), Some((low, high))) => {
            let _ = writeln!(out, "  Critical Failure Point: {point} requests");
            if let Some(reason) = &outcome.failure_reason {
                let _ = writeln!(out, "  Failure Reason: {reason}");
            }
            let _ = writeln!(out, "  Safe Operating Range: {low}-{high} requests");
        }
        _ => {
            let _ = writeln!(out, "  No failure detected up to {} requests", config.max_requests);
        }
    }
    if let Some(probe) = &outcome.mitigation {
        let _ = writeln!(
            out,
            "  Mitigation Probe: {} requests, {:.2} ops/s, {:.2} ms",
            probe.workload, probe.throughput, probe.avg_latency_ms
        );
    }
    if let Some(phase) = outcome.final_phase() {
        let _ = writeln!(out, "  Final Phase: {phase}");
    }
    if outcome.recorder_failures > 0 {
        let _ = writeln!(out, "  Recorder Failures: {}", outcome.recorder_failures);
    }
    let _ = writeln!(out, "  Last Injection: {}", injection.unwrap_or("none"));
    let _ = writeln!(out);

    let _ = writeln!(out, "Phase Transitions:");
    for record in &outcome.phases {
        let _ = writeln!(
            out,
            "  {}: {} (workload: {})",
            record.phase,
            record.timestamp.format(TIMESTAMP_FORMAT),
            record.workload
        );
    }

    out
}

/// Write the overload summary next to the recorder streams.
pub fn write_overload_summary(
    prefix: &str,
    outcome: &OverloadOutcome,
    injection: Option<&str>,
) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{prefix}{SUMMARY_FILE}"));
    std::fs::write(&path, format_overload_summary(outcome, injection))
        .with_context(|| format!("Failed to write summary report: {path:?}"))?;
    Ok(path)
}

fn format_millis(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.0}µs", ms * 1000.0)
    } else {
        format!("{ms:.2}ms")
    }
}

/// Format duration in human-readable format.
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        format!("{}m {:02.0}s", mins as u64, secs - mins * 60.0)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs - hours * 3600.0) / 60.0).floor();
        format!("{}h {:02}m", hours as u64, mins as u64)
    }
}

/// Format number with thousands separators.
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
