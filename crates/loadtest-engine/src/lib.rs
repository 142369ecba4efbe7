//! Load generation engine for zkbench.
//!
//! This crate drives request workloads against a coordination service through
//! the session abstraction of `zkbench-session`:
//! 1. A [`ClientPool`] of long-lived [`ClientHandle`]s, one private namespace
//!    subtree each
//! 2. Workload streams pairing a [`RequestGenerator`] with a
//!    [`RequestHandler`], executed by the [`driver`] either unpaced across
//!    parallel child handles or paced at a fixed rate
//! 3. [`StatAccumulator`]s merged from workers into clients and from clients
//!    into steps
//! 4. The [`OverloadEngine`] state machine, which ramps load until the
//!    service degrades and then probes recovery, reporting to a
//!    [`RunRecorder`]
//!
//! # Example
//!
//! ```ignore
//! use zkbench_loadtest::{ClientPool, CsvRecorder, GradualOverloadConfig, OverloadEngine, PoolStepRunner};
//!
//! let mut pool = ClientPool::create(connector, &servers, &endpoints, 8, "/zkbench").await?;
//! pool.setup_all().await;
//! let runner = PoolStepRunner::new(&mut pool, 8, 64, 1000);
//! let recorder = CsvRecorder::create("run-", None)?;
//! let mut engine = OverloadEngine::new(GradualOverloadConfig::from_requests(1000), runner, recorder);
//! let outcome = engine.run().await?;
//! ```

pub mod benchmark;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod overload;
pub mod partition;
pub mod pool;
pub mod recorder;
pub mod request;
pub mod stats;
pub mod step;
pub mod workload;

pub use benchmark::{BenchOutput, Benchmark, ClientResult};
pub use client::ClientHandle;
pub use config::{BenchConfig, BenchTypes};
pub use error::LoadTestError;
pub use overload::{
    detect_failure, mitigated_load, FailureReason, GradualOverloadConfig, OverloadEngine,
    OverloadOutcome, Phase, PhaseRecord,
};
pub use pool::{CleanupReport, ClientPool, CLEANUP_ROUNDS};
pub use recorder::{CsvRecorder, RunRecorder};
pub use request::Request;
pub use stats::{LatencySample, StatAccumulator};
pub use step::{PoolStepRunner, StepRunner, WorkloadStepResult};
pub use workload::{RequestGenerator, RequestHandler, Workload, WorkloadStream};
