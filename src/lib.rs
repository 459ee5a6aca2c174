//! Pystone: a Dhrystone-style CPU benchmark engine.
//!
//! The [`kernel`] performs a fixed amount of synthetic work per pass, the
//! [`driver`] times it, and the [`worker`] runs the driver on a background
//! thread with cooperative cancellation. Sessions, reports and the HTTP engine
//! are built on top of the worker; [`monitor`] and [`suite`] add host
//! resource sampling and the supplementary CPU, memory and disk tests.

pub mod config;
pub mod driver;
pub mod error;
pub mod kernel;
pub mod monitor;
pub mod record;
pub mod report;
pub mod server;
pub mod session;
pub mod stats;
pub mod suite;
pub mod sys_info;
pub mod thread_manager;
pub mod worker;

pub use driver::{BenchmarkDriver, BenchmarkRunResult, DriverState, Progress, RunOutcome};
pub use error::{BenchError, KernelFault, Result};
pub use session::{run_session, SessionEvent, SessionPlan, SessionResults};
pub use worker::{global_worker, BenchmarkObserver, BenchmarkWorker, RunHandle, WorkerEvent};
