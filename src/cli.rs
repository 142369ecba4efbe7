//! Command-line definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use zkbench_loadtest::GradualOverloadConfig;

#[derive(Parser)]
#[command(name = "zkbench")]
#[command(about = "Load generation and gradual-overload benchmarking for coordination services")]
#[command(long_about = None)]
pub struct Cli {
    /// Session backend (defaults to zookeeper when built with that feature)
    #[arg(long, value_enum, global = true, env = "ZKBENCH_BACKEND")]
    pub backend: Option<Backend>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// A ZooKeeper ensemble
    Zookeeper,
    /// An in-process tree, for dry runs
    Memory,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "zookeeper") {
            Backend::Zookeeper
        } else {
            Backend::Memory
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every selected workload once on every client
    Bench(BenchArgs),

    /// Ramp load step by step until the service degrades, then probe recovery
    Overload(OverloadArgs),

    /// Delete every client subtree left by an earlier run
    Purge {
        /// Benchmark configuration file
        #[arg(long, default_value = "bench.conf")]
        conf: PathBuf,
    },

    /// List the namespace children through every client
    Smoke {
        /// Benchmark configuration file
        #[arg(long, default_value = "bench.conf")]
        conf: PathBuf,
    },
}

#[derive(Args)]
pub struct BenchArgs {
    /// Benchmark configuration file
    #[arg(long, default_value = "bench.conf")]
    pub conf: PathBuf,

    /// Prefix of the output files
    #[arg(long, default_value = "zkresult")]
    pub outprefix: String,

    /// Also write every latency sample
    #[arg(long)]
    pub raw: bool,

    /// Keep client subtrees after the run
    #[arg(long)]
    pub no_clean: bool,
}

#[derive(Args)]
pub struct OverloadArgs {
    /// Benchmark configuration file
    #[arg(long, default_value = "bench.conf")]
    pub conf: PathBuf,

    /// Prefix of the output files
    #[arg(long, default_value = "zkresult")]
    pub outprefix: String,

    #[command(flatten)]
    pub overrides: OverloadOverrides,

    /// Where to append the mitigation trigger (default: agent/metrics next to the install)
    #[arg(long, value_name = "PATH")]
    pub mitigation_marker: Option<PathBuf>,

    /// Fault-injection marker whose last record goes into the summary
    #[arg(long, value_name = "PATH")]
    pub injection_marker: Option<PathBuf>,

    /// Keep client subtrees after the run
    #[arg(long)]
    pub no_clean: bool,
}

/// Overload settings given on the command line; each replaces the file value.
#[derive(Args, Debug, Default)]
pub struct OverloadOverrides {
    /// Initial workload in requests per second
    #[arg(long = "initial")]
    pub initial_requests: Option<u64>,

    /// Workload at which a run without failure stops
    #[arg(long = "max")]
    pub max_requests: Option<u64>,

    /// Load added per LOAD_INCREASE step
    #[arg(long = "step")]
    pub step_size: Option<u64>,

    /// Step duration in seconds
    #[arg(long = "duration")]
    pub step_duration: Option<u64>,

    #[arg(long = "warmup")]
    pub warmup_steps: Option<u64>,

    /// Average latency threshold in milliseconds
    #[arg(long = "latency")]
    pub latency_threshold: Option<f64>,

    /// Throughput drop threshold in percent of the peak
    #[arg(long = "throughput")]
    pub throughput_drop: Option<f64>,

    /// Pause after INIT, WARMUP and before the mitigation probe, in seconds
    #[arg(long = "stabilization")]
    pub stabilization_time: Option<u64>,
}

impl OverloadOverrides {
    pub fn apply(&self, config: &mut GradualOverloadConfig) {
        if let Some(v) = self.initial_requests {
            config.initial_requests = v;
        }
        if let Some(v) = self.max_requests {
            config.max_requests = v;
        }
        if let Some(v) = self.step_size {
            config.step_size = v;
        }
        if let Some(v) = self.step_duration {
            config.step_duration = v;
        }
        if let Some(v) = self.warmup_steps {
            config.warmup_steps = v;
        }
        if let Some(v) = self.latency_threshold {
            config.latency_threshold = v;
        }
        if let Some(v) = self.throughput_drop {
            config.throughput_drop = v;
        }
        if let Some(v) = self.stabilization_time {
            config.stabilization_time = v;
        }
    }
}
