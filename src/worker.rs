//! Background execution of benchmark runs.
//!
//! A [`BenchmarkWorker`] owns a single run slot. Starting a run spawns a
//! dedicated thread that drives the workload and reports to a
//! [`BenchmarkObserver`]; the returned [`RunHandle`] stops it cooperatively
//! through a shared `AtomicBool`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use once_cell::sync::Lazy;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};
use uuid::Uuid;

use crate::driver::{panic_message, BenchmarkDriver, BenchmarkRunResult, Progress, RunOutcome};
use crate::error::{BenchError, Result};

static GLOBAL_WORKER: Lazy<BenchmarkWorker> = Lazy::new(BenchmarkWorker::new);

/// The process-wide worker shared by the CLI and the HTTP engine.
pub fn global_worker() -> &'static BenchmarkWorker {
    &GLOBAL_WORKER
}

/// Receives notifications from a run, on the run's thread.
///
/// Progress arrives in strictly increasing order. Exactly one of
/// `on_completed`, `on_cancelled` or `on_failed` follows the last progress
/// notification.
pub trait BenchmarkObserver: Send + 'static {
    fn on_progress(&mut self, _progress: Progress) {}

    fn on_completed(&mut self, _result: BenchmarkRunResult) {}

    fn on_cancelled(&mut self) {}

    fn on_failed(&mut self, _message: String) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress(Progress),
    Completed(BenchmarkRunResult),
    Cancelled,
    Failed(String),
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerEvent::Progress(_))
    }
}

/// Forwards notifications into a channel; a dropped receiver is ignored.
impl BenchmarkObserver for UnboundedSender<WorkerEvent> {
    fn on_progress(&mut self, progress: Progress) {
        let _ = self.send(WorkerEvent::Progress(progress));
    }

    fn on_completed(&mut self, result: BenchmarkRunResult) {
        let _ = self.send(WorkerEvent::Completed(result));
    }

    fn on_cancelled(&mut self) {
        let _ = self.send(WorkerEvent::Cancelled);
    }

    fn on_failed(&mut self, message: String) {
        let _ = self.send(WorkerEvent::Failed(message));
    }
}

/// Clears the worker's busy flag when the run thread is done with the slot.
struct SlotGuard(Arc<AtomicBool>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkWorker {
    busy: Arc<AtomicBool>,
}

impl BenchmarkWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn start<O>(&self, iterations: u64, observer: O) -> Result<RunHandle>
    where
        O: BenchmarkObserver,
    {
        self.start_with_stop_flag(iterations, Arc::new(AtomicBool::new(false)), observer)
    }

    /// Like [`start`](Self::start), observing a caller-owned stop flag.
    ///
    /// The flag is not cleared; a flag that is already set cancels the run at
    /// its first chunk boundary.
    pub fn start_with_stop_flag<O>(
        &self,
        iterations: u64,
        stop_flag: Arc<AtomicBool>,
        mut observer: O,
    ) -> Result<RunHandle>
    where
        O: BenchmarkObserver,
    {
        if iterations < 1 {
            return Err(BenchError::InvalidArgument(format!(
                "iteration count must be at least 1, got {iterations}"
            )));
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BenchError::Busy);
        }

        let id = Uuid::new_v4();
        let slot = SlotGuard(Arc::clone(&self.busy));
        let stop = Arc::clone(&stop_flag);

        let join = thread::Builder::new()
            .name(format!("pystone-{id}"))
            .spawn(move || {
                info!(%id, iterations, "starting benchmark run");
                let mut driver = BenchmarkDriver::new();
                let result = driver.run(iterations, &stop, |p| observer.on_progress(p));
                drop(slot);

                match &result {
                    Ok(RunOutcome::Completed(run)) => {
                        info!(
                            %id,
                            elapsed = run.elapsed_time,
                            pystones = run.throughput,
                            "benchmark completed"
                        );
                        observer.on_completed(*run);
                    }
                    Ok(RunOutcome::Cancelled) => {
                        info!(%id, "benchmark stopped");
                        observer.on_cancelled();
                    }
                    Err(err) => {
                        error!(%id, error = %err, "benchmark failed");
                        observer.on_failed(err.to_string());
                    }
                }
                result
            })?;

        Ok(RunHandle {
            id,
            iterations,
            stop_flag,
            join,
        })
    }
}

/// Handle to a run started by [`BenchmarkWorker::start`].
#[derive(Debug)]
pub struct RunHandle {
    id: Uuid,
    iterations: u64,
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<Result<RunOutcome>>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Requests a cooperative stop. Does nothing once the run has ended.
    pub fn stop(&self) {
        if !self.is_finished() {
            self.stop_flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the run thread exits.
    pub fn join(self) -> Result<RunOutcome> {
        self.join
            .join()
            .map_err(|payload| BenchError::RuntimeFault(panic_message(payload.as_ref())))?
    }
}
