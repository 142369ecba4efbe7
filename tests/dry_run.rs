//! Configuration file to finished run on the in-process backend.

use std::sync::Arc;
use zkbench::cli::OverloadOverrides;
use zkbench::report::write_overload_summary;
use zkbench::FileConfig;
use zkbench_loadtest::{Benchmark, CsvRecorder, OverloadEngine, Phase, PoolStepRunner};
use zkbench_session::MemoryCluster;

const CONF: &str = "\
namespace = dryrun
clients = 2
requests = 20
key_size_bytes = 4
value_size_bytes = 8
type = crud
same_key = false
cleanup = true
server.1 = zk1:2181
";

#[tokio::test(start_paused = true)]
async fn test_overload_dry_run_reaches_stable() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = format!("{}/zk-gradual-", dir.path().display());
    let cluster = MemoryCluster::new();

    let config: FileConfig = CONF.parse().unwrap();
    let mut overload = config.overload.clone();
    OverloadOverrides {
        initial_requests: Some(10),
        max_requests: Some(30),
        step_size: Some(10),
        step_duration: Some(1),
        warmup_steps: Some(1),
        stabilization_time: Some(1),
        ..OverloadOverrides::default()
    }
    .apply(&mut overload);

    let mut bench = Benchmark::init(config.bench.clone(), Arc::new(cluster.clone()))
        .await
        .unwrap();
    let recorder = CsvRecorder::create(&prefix, None).unwrap();
    let outcome = {
        let runner = PoolStepRunner::new(bench.pool_mut(), 4, 8, 20);
        let mut engine = OverloadEngine::new(overload, runner, recorder);
        let outcome = engine.run().await.unwrap();
        engine.into_recorder().close().unwrap();
        outcome
    };

    assert_eq!(outcome.final_phase(), Some(Phase::Stable));
    assert_eq!(outcome.phases.last().unwrap().workload, 30);
    assert!(outcome.steps.iter().all(|(_, step)| step.errors == 0));
    // prepared keys for both clients
    assert!(cluster.contains("/dryrun/client1/0019"));

    let summary = write_overload_summary(&prefix, &outcome, None).unwrap();
    let text = std::fs::read_to_string(summary).unwrap();
    assert!(text.contains("No failure detected up to 30 requests"));
    assert!(text.contains("Last Injection: none"));

    let phases = std::fs::read_to_string(format!("{prefix}phase_transitions.csv")).unwrap();
    assert_eq!(phases.lines().count(), 1 + 4);

    assert!(bench.done().await.is_success());
    assert_eq!(cluster.node_count(), 0);
}

#[tokio::test]
async fn test_base_run_from_config() {
    let cluster = MemoryCluster::new();
    let config: FileConfig = CONF.parse().unwrap();

    let mut bench = Benchmark::init(config.bench, Arc::new(cluster.clone())).await.unwrap();
    let results = {
        let mut results = Vec::new();
        for workload in zkbench_loadtest::benchmark::run_order(bench.config()) {
            results.extend(bench.run_workload(workload, 1).await.unwrap());
        }
        results
    };

    // WARM_UP, CREATE, FILL, READ, WRITE, DELETE for each of 2 clients
    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|r| r.stats.errors == 0));
    assert!(bench.done().await.is_success());
}
