//! Timed execution of the workload.
//!
//! A run moves through `Idle -> WarmingUp -> Running` and ends in one of
//! `Completed`, `Cancelled` or `Failed`. The warm-up pass times the timed
//! loop's bookkeeping without any kernel work, and that overhead is
//! subtracted from the timed phase.

use std::any::Any;
use std::cmp::min;
use std::hint::black_box;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{BenchError, KernelFault, Result};
use crate::kernel::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    WarmingUp,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Net timing of one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRunResult {
    /// Seconds spent in the timed loop minus the warm-up overhead.
    pub elapsed_time: f64,
    /// Iterations per second, or 0 when `elapsed_time <= 0`.
    pub throughput: f64,
}

impl BenchmarkRunResult {
    pub fn from_elapsed(loops: u64, elapsed_time: f64) -> Self {
        let throughput = if elapsed_time <= 0.0 {
            0.0
        } else {
            loops as f64 / elapsed_time
        };
        Self {
            elapsed_time,
            throughput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunOutcome {
    Completed(BenchmarkRunResult),
    Cancelled,
}

/// Chunk size of the warm-up pass.
pub fn warmup_chunk(loops: u64) -> u64 {
    min(1000, (loops / 100).max(1))
}

/// Chunk size of the timed loop.
pub fn run_chunk(loops: u64) -> u64 {
    (loops / 100).max(1)
}

/// Forwards strictly increasing progress values to a sink.
struct ProgressGate<F> {
    total: u64,
    last: u64,
    sink: F,
}

impl<F: FnMut(Progress)> ProgressGate<F> {
    fn new(total: u64, sink: F) -> Self {
        Self {
            total,
            last: 0,
            sink,
        }
    }

    fn report(&mut self, current: u64) {
        if current <= self.last || current > self.total {
            return;
        }
        self.last = current;
        trace!(current, total = self.total, "progress");
        (self.sink)(Progress {
            current,
            total: self.total,
        });
    }

    fn finish(&mut self) {
        self.report(self.total);
    }
}

/// Runs the workload on the calling thread.
#[derive(Debug)]
pub struct BenchmarkDriver {
    state: DriverState,
    run_state: RunState,
    current_loops: u64,
}

impl Default for BenchmarkDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkDriver {
    pub fn new() -> Self {
        Self {
            state: DriverState::Idle,
            run_state: RunState::new(),
            current_loops: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Workload state left behind by the most recent run.
    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    /// Executes `loops` iterations, checking `stop` at every chunk start.
    ///
    /// A final `(loops, loops)` progress event is always delivered before this
    /// returns, whatever the outcome. Kernel faults and panics raised while
    /// running end the run with [`BenchError::RuntimeFault`].
    pub fn run<F>(&mut self, loops: u64, stop: &AtomicBool, on_progress: F) -> Result<RunOutcome>
    where
        F: FnMut(Progress),
    {
        if loops < 1 {
            return Err(BenchError::InvalidArgument(format!(
                "iteration count must be at least 1, got {loops}"
            )));
        }

        self.run_state = RunState::new();
        self.current_loops = 0;
        let mut gate = ProgressGate::new(loops, on_progress);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(loops, stop, &mut gate)
        }));
        let finished = panic::catch_unwind(AssertUnwindSafe(|| gate.finish()));

        let result = match outcome {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(fault)) => Err(BenchError::RuntimeFault(fault.to_string())),
            Err(payload) => Err(BenchError::RuntimeFault(panic_message(payload.as_ref()))),
        };
        let result = match (result, finished) {
            (Ok(_), Err(payload)) => {
                Err(BenchError::RuntimeFault(panic_message(payload.as_ref())))
            }
            (result, _) => result,
        };

        match &result {
            Ok(RunOutcome::Completed(_)) => self.state = DriverState::Completed,
            Ok(RunOutcome::Cancelled) => self.state = DriverState::Cancelled,
            Err(err) => {
                warn!(error = %err, at = self.current_loops, "benchmark run failed");
                self.state = DriverState::Failed;
            }
        }
        result
    }

    fn execute<F>(
        &mut self,
        loops: u64,
        stop: &AtomicBool,
        gate: &mut ProgressGate<F>,
    ) -> std::result::Result<RunOutcome, KernelFault>
    where
        F: FnMut(Progress),
    {
        self.transition(DriverState::WarmingUp);
        let Some(nulltime) = self.warm_up(loops, stop) else {
            self.transition(DriverState::Cancelled);
            return Ok(RunOutcome::Cancelled);
        };

        self.run_state.link_records();
        self.transition(DriverState::Running);

        let start = Instant::now();
        let chunk = run_chunk(loops);
        let mut i = 0;
        while i < loops {
            if stop.load(Ordering::SeqCst) {
                self.transition(DriverState::Cancelled);
                return Ok(RunOutcome::Cancelled);
            }

            let end = min(i + chunk, loops);
            for j in i..end {
                self.current_loops = black_box(j);
                if j == end - 1 {
                    gate.report(j + 1);
                }
            }

            self.run_state.pass()?;
            i += chunk;
        }

        let benchtime = start.elapsed().as_secs_f64() - nulltime;
        debug!(loops, nulltime, benchtime, "timed loop finished");
        Ok(RunOutcome::Completed(BenchmarkRunResult::from_elapsed(
            loops, benchtime,
        )))
    }

    /// Estimated cost of `loops` iterations of loop bookkeeping, or `None`
    /// when stopped.
    ///
    /// Chunks are timed one by one and the fastest per-iteration rate is
    /// scaled to `loops`, so a chunk stalled by the scheduler cannot inflate
    /// the overhead.
    fn warm_up(&mut self, loops: u64, stop: &AtomicBool) -> Option<f64> {
        let chunk = warmup_chunk(loops);
        let mut fastest = f64::INFINITY;
        let mut i = 0;
        while i < loops {
            if stop.load(Ordering::SeqCst) {
                return None;
            }
            let end = min(i + chunk, loops);
            let start = Instant::now();
            for j in i..end {
                self.current_loops = black_box(j);
                if j == end - 1 {
                    black_box(j + 1);
                }
            }
            fastest = fastest.min(start.elapsed().as_secs_f64() / (end - i) as f64);
            i += chunk;
        }
        self.current_loops = 0;
        Some(fastest * loops as f64)
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "driver state");
        self.state = next;
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(loops: u64, stop: &AtomicBool) -> (Result<RunOutcome>, Vec<Progress>, BenchmarkDriver) {
        let mut driver = BenchmarkDriver::new();
        let mut events = Vec::new();
        let result = driver.run(loops, stop, |p| events.push(p));
        (result, events, driver)
    }

    #[test]
    fn chunk_sizes() {
        assert_eq!(run_chunk(1), 1);
        assert_eq!(run_chunk(1000), 10);
        assert_eq!(run_chunk(50_000), 500);
        assert_eq!(warmup_chunk(1), 1);
        assert_eq!(warmup_chunk(50_000), 500);
        assert_eq!(warmup_chunk(1_000_000), 1000);
    }

    #[test]
    fn throughput_is_zero_without_positive_elapsed() {
        assert_eq!(BenchmarkRunResult::from_elapsed(100, 0.0).throughput, 0.0);
        assert_eq!(BenchmarkRunResult::from_elapsed(100, -0.5).throughput, 0.0);
        assert_eq!(BenchmarkRunResult::from_elapsed(100, 2.0).throughput, 50.0);
    }

    #[test]
    fn rejects_zero_iterations_before_touching_state() {
        let stop = AtomicBool::new(false);
        let (result, events, driver) = collect(0, &stop);
        assert!(matches!(result, Err(BenchError::InvalidArgument(_))));
        assert!(events.is_empty());
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[test]
    fn single_iteration_runs_one_pass() {
        let stop = AtomicBool::new(false);
        let (result, events, driver) = collect(1, &stop);

        let RunOutcome::Completed(run) = result.unwrap() else {
            panic!("expected completion");
        };
        assert!(run.elapsed_time.is_finite());
        assert!(run.throughput.is_finite());
        if run.elapsed_time > 0.0 {
            assert_eq!(run.throughput, 1.0 / run.elapsed_time);
        } else {
            assert_eq!(run.throughput, 0.0);
        }
        assert_eq!(events, vec![Progress { current: 1, total: 1 }]);
        assert_eq!(driver.run_state().passes, 1);
        assert_eq!(driver.state(), DriverState::Completed);
    }

    #[test]
    fn progress_is_strictly_increasing_and_ends_at_total() {
        let stop = AtomicBool::new(false);
        let (result, events, driver) = collect(1005, &stop);
        assert!(matches!(result, Ok(RunOutcome::Completed(_))));

        assert_eq!(events.len(), 101);
        assert!(events.windows(2).all(|w| w[0].current < w[1].current));
        assert_eq!(events[0], Progress { current: 10, total: 1005 });
        assert_eq!(events.last().unwrap().current, 1005);
        assert_eq!(driver.run_state().passes, 101);
    }

    #[test]
    fn stop_before_start_cancels_without_passes() {
        let stop = AtomicBool::new(true);
        let (result, events, driver) = collect(1000, &stop);
        assert_eq!(result.unwrap(), RunOutcome::Cancelled);
        assert_eq!(events, vec![Progress { current: 1000, total: 1000 }]);
        assert_eq!(driver.run_state().passes, 0);
        assert_eq!(driver.state(), DriverState::Cancelled);
    }

    #[test]
    fn stop_after_first_progress_cancels_at_next_chunk() {
        let stop = AtomicBool::new(false);
        let mut driver = BenchmarkDriver::new();
        let mut events = Vec::new();
        let result = driver.run(1000, &stop, |p| {
            events.push(p);
            stop.store(true, Ordering::SeqCst);
        });

        assert_eq!(result.unwrap(), RunOutcome::Cancelled);
        assert_eq!(
            events,
            vec![
                Progress { current: 10, total: 1000 },
                Progress { current: 1000, total: 1000 },
            ]
        );
        assert_eq!(driver.run_state().passes, 1);
    }

    #[test]
    fn consecutive_runs_do_not_leak_state() {
        let stop = AtomicBool::new(false);
        let mut driver = BenchmarkDriver::new();
        driver.run(2000, &stop, |_| {}).unwrap();
        let first = driver.run_state().clone();
        driver.run(2000, &stop, |_| {}).unwrap();

        assert_eq!(driver.run_state(), &first);

        let (_, _, fresh) = collect(2000, &stop);
        assert_eq!(fresh.run_state(), &first);
    }

    #[test]
    fn reference_loop_count_always_scores() {
        let stop = AtomicBool::new(false);
        let mut driver = BenchmarkDriver::new();
        for _ in 0..10 {
            match driver.run(50_000, &stop, |_| {}).unwrap() {
                RunOutcome::Completed(run) => {
                    assert!(run.elapsed_time > 0.0, "elapsed {}", run.elapsed_time);
                    assert!(run.throughput > 0.0);
                    assert_eq!(run.throughput, 50_000.0 / run.elapsed_time);
                }
                RunOutcome::Cancelled => panic!("run was not stopped"),
            }
        }
    }

    #[test]
    fn warm_up_leaves_no_trace_in_state() {
        let stop = AtomicBool::new(false);
        let mut driver = BenchmarkDriver::new();
        let overhead = driver.warm_up(5000, &stop).unwrap();
        assert!(overhead >= 0.0 && overhead.is_finite());
        assert_eq!(driver.current_loops, 0);
        assert_eq!(driver.run_state().passes, 0);

        assert_eq!(driver.warm_up(5000, &AtomicBool::new(true)), None);
    }

    #[test]
    fn panicking_progress_sink_fails_the_run() {
        let stop = AtomicBool::new(false);
        let mut driver = BenchmarkDriver::new();
        let mut seen = Vec::new();
        let result = driver.run(100, &stop, |p| {
            seen.push(p);
            if p.current < p.total {
                panic!("sink exploded");
            }
        });

        match result {
            Err(BenchError::RuntimeFault(message)) => assert!(message.contains("sink exploded")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(driver.state(), DriverState::Failed);
        assert_eq!(seen.last(), Some(&Progress { current: 100, total: 100 }));
    }
}
