//! Several sequential runs with the same iteration count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{DEFAULT_LOOPS, DEFAULT_RUNS, MAX_RUNS};
use crate::driver::Progress;
use crate::error::{BenchError, Result};
use crate::stats::Summary;
use crate::worker::{BenchmarkWorker, WorkerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPlan {
    pub iterations: u64,
    pub runs: u32,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_LOOPS,
            runs: DEFAULT_RUNS,
        }
    }
}

impl SessionPlan {
    pub fn new(iterations: u64, runs: u32) -> Result<Self> {
        if iterations < 1 {
            return Err(BenchError::InvalidArgument(format!(
                "iteration count must be at least 1, got {iterations}"
            )));
        }
        if !(1..=MAX_RUNS).contains(&runs) {
            return Err(BenchError::InvalidArgument(format!(
                "run count must be between 1 and {MAX_RUNS}, got {runs}"
            )));
        }
        Ok(Self { iterations, runs })
    }
}

/// Timing of one completed run within a session, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: u32,
    pub elapsed_time: f64,
    pub throughput: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub runs: usize,
    pub avg_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub median_time: f64,
    pub stdev_time: f64,
    pub avg_throughput: f64,
    pub min_throughput: f64,
    pub max_throughput: f64,
    pub median_throughput: f64,
    pub stdev_throughput: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResults {
    pub iterations: u64,
    pub records: Vec<RunRecord>,
    pub cancelled: bool,
}

impl SessionResults {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }

    /// Summary over completed runs; `None` until one has completed.
    pub fn stats(&self) -> Option<SessionStats> {
        if self.records.is_empty() {
            return None;
        }
        let times: Vec<f64> = self.records.iter().map(|r| r.elapsed_time).collect();
        let stones: Vec<f64> = self.records.iter().map(|r| r.throughput).collect();
        let times = Summary::of(&times);
        let stones = Summary::of(&stones);

        Some(SessionStats {
            runs: self.records.len(),
            avg_time: times.mean,
            min_time: times.min,
            max_time: times.max,
            median_time: times.median,
            stdev_time: times.stdev,
            avg_throughput: stones.mean,
            min_throughput: stones.min,
            max_throughput: stones.max,
            median_throughput: stones.median,
            stdev_throughput: stones.stdev,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RunStarted {
        run: u32,
        runs: u32,
    },
    Progress {
        run: u32,
        runs: u32,
        progress: Progress,
        overall_percent: u32,
    },
    RunCompleted(RunRecord),
}

/// Percent of the whole session done, counting finished runs as 100 each.
pub fn overall_percent(run: u32, runs: u32, progress: Progress) -> u32 {
    if runs == 0 || progress.total == 0 {
        return 0;
    }
    let run_percent = (progress.current.min(progress.total) * 100 / progress.total) as u32;
    (run.saturating_sub(1) * 100 + run_percent) / runs
}

/// Executes `plan` on `worker`, one run after another.
///
/// Setting `stop` cancels the active run at its next chunk boundary and ends
/// the session with `cancelled` set; completed runs are kept. A failed run
/// ends the session with its error.
pub async fn run_session<F>(
    worker: &BenchmarkWorker,
    plan: SessionPlan,
    stop: Arc<AtomicBool>,
    mut on_event: F,
) -> Result<SessionResults>
where
    F: FnMut(SessionEvent),
{
    let plan = SessionPlan::new(plan.iterations, plan.runs)?;
    let mut results = SessionResults::new(plan.iterations);
    info!(iterations = plan.iterations, runs = plan.runs, "starting benchmark session");

    for run in 1..=plan.runs {
        if stop.load(Ordering::SeqCst) {
            results.cancelled = true;
            break;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = worker.start_with_stop_flag(plan.iterations, Arc::clone(&stop), tx)?;
        debug!(run, id = %handle.id(), "run started");
        on_event(SessionEvent::RunStarted {
            run,
            runs: plan.runs,
        });

        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Progress(progress) => on_event(SessionEvent::Progress {
                    run,
                    runs: plan.runs,
                    progress,
                    overall_percent: overall_percent(run, plan.runs, progress),
                }),
                other => {
                    terminal = Some(other);
                    break;
                }
            }
        }

        match terminal {
            Some(WorkerEvent::Completed(result)) => {
                let record = RunRecord {
                    run,
                    elapsed_time: result.elapsed_time,
                    throughput: result.throughput,
                };
                results.records.push(record);
                on_event(SessionEvent::RunCompleted(record));
            }
            Some(WorkerEvent::Cancelled) => {
                results.cancelled = true;
                break;
            }
            Some(WorkerEvent::Failed(message)) => return Err(BenchError::RuntimeFault(message)),
            Some(WorkerEvent::Progress(_)) | None => {
                return Err(BenchError::RuntimeFault(
                    "run ended without a terminal notification".to_string(),
                ))
            }
        }
    }

    if let Some(stats) = results.stats() {
        info!(
            runs = stats.runs,
            avg_time = stats.avg_time,
            avg_pystones = stats.avg_throughput,
            "benchmark session finished"
        );
    }
    Ok(results)
}
