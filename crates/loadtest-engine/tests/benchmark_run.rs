//! A full base benchmark run on the in-process backend.

use std::sync::Arc;
use zkbench_loadtest::{BenchConfig, BenchOutput, BenchTypes, Benchmark, Workload};
use zkbench_session::MemoryCluster;

fn config() -> BenchConfig {
    let types = [
        Workload::Create,
        Workload::Read,
        Workload::Write,
        Workload::Mixed,
        Workload::Delete,
    ]
    .into_iter()
    .collect::<BenchTypes>();
    BenchConfig::new("/zkbench", 3, vec!["zk1:2181".into(), "zk2:2181".into()])
        .with_types(types)
        .with_requests(20)
        .with_sizes(3, 16)
        .with_parallelism(2)
}

#[tokio::test]
async fn test_full_run_writes_summary_and_raw_rows() {
    let cluster = MemoryCluster::new();
    let dir = tempfile::tempdir().unwrap();
    let prefix = format!("{}/run-", dir.path().display());

    let mut bench = Benchmark::init(config(), Arc::new(cluster.clone())).await.unwrap();
    let mut output = BenchOutput::create(&prefix, true).unwrap();
    let results = bench.run(&mut output).await.unwrap();
    output.flush().unwrap();

    // 7 workloads (WARM_UP, CREATE, FILL, READ, WRITE, MIXED, DELETE) x 3 clients
    assert_eq!(results.len(), 21);
    assert!(results.iter().all(|r| r.stats.errors == 0));
    let mixed = results
        .iter()
        .find(|r| r.workload == Workload::Mixed)
        .unwrap();
    assert_eq!(mixed.bench_test, "MIXED.1");
    assert_eq!(mixed.stats.ops, 40);

    let summary = std::fs::read_to_string(format!("{prefix}summary.dat")).unwrap();
    assert_eq!(summary.lines().count(), 22);
    assert!(summary.starts_with("client_id,bench_test,operations"));

    // per client: 2 + 20 + 20 + 20 + 20 + 40 + 20 samples
    let raw = std::fs::read_to_string(format!("{prefix}raw.dat")).unwrap();
    assert_eq!(raw.lines().count(), 427);

    // DELETE removed every key, leaving only the subtrees
    assert_eq!(cluster.node_count(), 4);
    let report = bench.done().await;
    assert!(report.is_success());
    assert_eq!(cluster.node_count(), 0);
}

#[tokio::test]
async fn test_smoke_lists_every_client_subtree() {
    let cluster = MemoryCluster::new();
    let bench = Benchmark::init(config(), Arc::new(cluster)).await.unwrap();

    let listings = bench.smoke().await;
    assert_eq!(listings.len(), 3);
    for (_, listed) in &listings {
        assert_eq!(
            listed.as_ref().unwrap(),
            &vec![
                "client1".to_string(),
                "client2".to_string(),
                "client3".to_string()
            ]
        );
    }
    bench.close().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = config().with_requests(0);
    let result = Benchmark::init(config, Arc::new(MemoryCluster::new())).await;
    assert!(result.is_err());
}
