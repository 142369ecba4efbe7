//! Command-line interface for zkbench
//!
//! # Usage Examples
//!
//! ```bash
//! # Base benchmark against the servers listed in bench.conf
//! zkbench bench --conf bench.conf --outprefix zkresult
//!
//! # Gradual overload, mitigation marker in a custom location
//! zkbench overload --conf bench.conf --mitigation-marker /tmp/mitigation_trigger.txt
//!
//! # Dry run on the in-process backend
//! zkbench --backend memory overload --conf bench.conf --duration 2 --stabilization 1
//! ```

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use zkbench::cli::{Backend, BenchArgs, Cli, Commands, OverloadArgs};
use zkbench::report::{
    format_client_table, format_step_table, timestamped_prefix, write_overload_summary,
};
use zkbench::FileConfig;
use zkbench_loadtest::benchmark::SUMMARY_FILE;
use zkbench_loadtest::recorder::{default_mitigation_marker_path, read_injection_marker};
use zkbench_loadtest::{
    BenchOutput, Benchmark, CsvRecorder, OverloadEngine, PoolStepRunner,
};
use zkbench_session::{Connector, MemoryCluster};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let backend = cli.backend.unwrap_or_default();

    match cli.command {
        Commands::Bench(args) => run_bench(backend, args).await,
        Commands::Overload(args) => run_overload(backend, args).await,
        Commands::Purge { conf } => run_purge(backend, &conf).await,
        Commands::Smoke { conf } => run_smoke(backend, &conf).await,
    }
}

fn load_config(path: &Path) -> anyhow::Result<FileConfig> {
    let config = FileConfig::from_file(path)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    info!(
        "Loaded {}: {} clients against {:?}",
        path.display(),
        config.bench.clients,
        config.bench.endpoints
    );
    Ok(config)
}

fn connector(backend: Backend) -> anyhow::Result<Arc<dyn Connector>> {
    match backend {
        Backend::Memory => {
            info!("Using the in-process backend");
            Ok(Arc::new(MemoryCluster::new()))
        }
        #[cfg(feature = "zookeeper")]
        Backend::Zookeeper => Ok(Arc::new(zkbench_session::ZkConnector::new())),
        #[cfg(not(feature = "zookeeper"))]
        Backend::Zookeeper => {
            anyhow::bail!("zkbench was built without the `zookeeper` feature; use --backend memory")
        }
    }
}

/// Delete subtrees when `cleanup` is set, otherwise only close sessions.
async fn finish(bench: Benchmark, cleanup: bool) {
    if !cleanup {
        bench.close().await;
        return;
    }
    let report = bench.done().await;
    if !report.is_success() {
        warn!(
            "{} clients could not be cleaned up after {} rounds",
            report.failed.len(),
            report.rounds
        );
    }
}

async fn run_bench(backend: Backend, args: BenchArgs) -> anyhow::Result<()> {
    let config = load_config(&args.conf)?;
    let cleanup = config.bench.cleanup && !args.no_clean;
    let bench_config = config.bench.with_cleanup(cleanup);
    let prefix = timestamped_prefix(&args.outprefix, None, Local::now());

    let mut output = BenchOutput::create(&prefix, args.raw)
        .with_context(|| format!("Failed to create output files with prefix {prefix}"))?;
    let mut bench = Benchmark::init(bench_config, connector(backend)?)
        .await
        .context("Failed to initialize benchmark")?;

    let results = bench.run(&mut output).await;
    if let Err(e) = output.flush() {
        error!("Failed to flush results: {}", e);
    }
    finish(bench, cleanup).await;

    let results = results.context("Benchmark run failed")?;
    println!("{}", format_client_table(&results));
    info!("Results written to {prefix}{SUMMARY_FILE}");
    Ok(())
}

async fn run_overload(backend: Backend, args: OverloadArgs) -> anyhow::Result<()> {
    let config = load_config(&args.conf)?;
    let mut overload = config.overload.clone();
    args.overrides.apply(&mut overload);
    overload
        .validate()
        .context("Invalid gradual overload configuration")?;

    let cleanup = config.bench.cleanup && !args.no_clean;
    let prefix = timestamped_prefix(&args.outprefix, Some("gradual"), Local::now());
    let marker = match args.mitigation_marker {
        Some(path) => Some(path),
        None => match default_mitigation_marker_path() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("No mitigation marker path available: {}", e);
                None
            }
        },
    };
    let recorder = CsvRecorder::create(&prefix, marker)
        .with_context(|| format!("Failed to create metrics files with prefix {prefix}"))?;

    let (key_size, value_size, key_space) = (
        config.bench.key_size,
        config.bench.value_size,
        config.bench.requests,
    );
    let mut bench = Benchmark::init(config.bench, connector(backend)?)
        .await
        .context("Failed to initialize benchmark")?;

    let outcome = {
        let runner = PoolStepRunner::new(bench.pool_mut(), key_size, value_size, key_space);
        let mut engine = OverloadEngine::new(overload, runner, recorder);
        let outcome = engine.run().await;
        if let Err(e) = engine.into_recorder().close() {
            error!("Failed to close metrics files: {}", e);
        }
        outcome
    };
    finish(bench, cleanup).await;

    let outcome = outcome.context("Gradual overload run failed")?;
    println!("{}", format_step_table(&outcome));

    let injection = args
        .injection_marker
        .as_deref()
        .and_then(read_injection_marker);
    let path = write_overload_summary(&prefix, &outcome, injection.as_deref())?;
    info!("Test summary written to {}", path.display());
    Ok(())
}

async fn run_purge(backend: Backend, conf: &Path) -> anyhow::Result<()> {
    let config = load_config(conf)?;
    let bench = Benchmark::init(config.bench, connector(backend)?)
        .await
        .context("Failed to connect for purge")?;

    let report = bench.done().await;
    if !report.is_success() {
        anyhow::bail!(
            "{} clients could not be cleaned up: {:?}",
            report.failed.len(),
            report.failed
        );
    }
    info!("Purge finished after {} round(s)", report.rounds);
    Ok(())
}

async fn run_smoke(backend: Backend, conf: &Path) -> anyhow::Result<()> {
    let config = load_config(conf)?;
    let bench = Benchmark::init(config.bench, connector(backend)?)
        .await
        .context("Failed to connect for smoke test")?;

    let listings = bench.smoke().await;
    bench.close().await;

    let failed = listings.iter().filter(|(_, listed)| listed.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} clients could not list the namespace", listings.len());
    }
    Ok(())
}
