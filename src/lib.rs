//! zkbench
//!
//! Benchmarks a ZooKeeper-style coordination service in two ways:
//!
//! - A base run that drives every selected workload (create, read, write,
//!   delete, mixed) once on a pool of clients and records per-client
//!   latency and throughput
//! - A gradual-overload run that ramps the request rate step by step until
//!   latency, throughput or error rate degrade, signals mitigation and
//!   probes recovery at reduced load
//!
//! The load generation itself lives in `zkbench-loadtest`; this crate holds
//! the configuration-file reader, the command-line definitions and report
//! formatting.
//!
//! # CLI Usage
//!
//! ```bash
//! # Base run with raw samples
//! zkbench bench --conf bench.conf --outprefix results/zk --raw
//!
//! # Gradual overload with a tighter latency threshold
//! zkbench overload --conf bench.conf --outprefix results/zk --latency 20
//!
//! # Remove subtrees left behind by a run started with --no-clean
//! zkbench purge --conf bench.conf
//! ```

pub mod cli;
pub mod config;
pub mod report;

pub use config::{ConfigError, FileConfig};
