use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use crate::driver::Progress;
use crate::error::{BenchError, Result};
use crate::session::{SessionEvent, SessionPlan, SessionResults, SessionStats};

/// Prefix of every task id handed out by the engine.
pub const TASK_PREFIX: &str = "pystone";

static NEXT_TASK: AtomicUsize = AtomicUsize::new(1);

pub type TaskRegistry = Arc<Mutex<HashMap<String, TaskEntry>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// What the engine reports about a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub plan: SessionPlan,
    pub status: TaskStatus,
    pub current_run: u32,
    pub progress: Option<Progress>,
    pub overall_percent: u32,
    pub results: SessionResults,
    pub stats: Option<SessionStats>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct TaskEntry {
    snapshot: TaskSnapshot,
    stop_flag: Arc<AtomicBool>,
}

pub fn new_registry() -> TaskRegistry {
    Arc::new(Mutex::new(HashMap::new()))
}

/// `pystone-<n>`, with `n` increasing for the life of the process.
pub fn next_task_id() -> String {
    format!("{TASK_PREFIX}-{}", NEXT_TASK.fetch_add(1, Ordering::Relaxed))
}

fn lock(registry: &TaskRegistry) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn task_number(id: &str) -> usize {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Adds a running task. Fails with [`BenchError::Busy`] while another task
/// is still running.
pub fn register_task(
    registry: &TaskRegistry,
    id: &str,
    plan: SessionPlan,
    stop_flag: Arc<AtomicBool>,
) -> Result<()> {
    let mut guard = lock(registry);
    if guard
        .values()
        .any(|entry| entry.snapshot.status == TaskStatus::Running)
    {
        return Err(BenchError::Busy);
    }

    guard.insert(
        id.to_string(),
        TaskEntry {
            snapshot: TaskSnapshot {
                id: id.to_string(),
                plan,
                status: TaskStatus::Running,
                current_run: 0,
                progress: None,
                overall_percent: 0,
                results: SessionResults::new(plan.iterations),
                stats: None,
                error: None,
            },
            stop_flag,
        },
    );
    info!(task = id, total = guard.len(), "task registered");
    Ok(())
}

pub fn record_event(registry: &TaskRegistry, id: &str, event: &SessionEvent) {
    let mut guard = lock(registry);
    let Some(entry) = guard.get_mut(id) else {
        return;
    };
    let snapshot = &mut entry.snapshot;
    match event {
        SessionEvent::RunStarted { run, .. } => {
            snapshot.current_run = *run;
            snapshot.progress = None;
        }
        SessionEvent::Progress {
            progress,
            overall_percent,
            ..
        } => {
            snapshot.progress = Some(*progress);
            snapshot.overall_percent = *overall_percent;
        }
        SessionEvent::RunCompleted(record) => {
            snapshot.results.records.push(*record);
            snapshot.stats = snapshot.results.stats();
        }
    }
}

pub fn finish_task(registry: &TaskRegistry, id: &str, outcome: &Result<SessionResults>) {
    let mut guard = lock(registry);
    let Some(entry) = guard.get_mut(id) else {
        return;
    };
    let snapshot = &mut entry.snapshot;
    match outcome {
        Ok(results) => {
            snapshot.status = if results.cancelled {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Completed
            };
            snapshot.results = results.clone();
            snapshot.stats = results.stats();
        }
        Err(err) => {
            snapshot.status = TaskStatus::Failed;
            snapshot.error = Some(err.to_string());
        }
    }
    debug!(task = id, status = ?snapshot.status, "task finished");
}

/// Requests a stop. Returns `false` for unknown ids.
pub fn stop_task(id: &str, registry: &TaskRegistry) -> bool {
    match lock(registry).get(id) {
        Some(entry) => {
            if entry.snapshot.status == TaskStatus::Running {
                entry.stop_flag.store(true, Ordering::SeqCst);
            }
            true
        }
        None => false,
    }
}

pub fn get_task(id: &str, registry: &TaskRegistry) -> Option<TaskSnapshot> {
    lock(registry).get(id).map(|entry| entry.snapshot.clone())
}

pub fn list_tasks(registry: &TaskRegistry) -> Vec<TaskSnapshot> {
    let mut tasks: Vec<TaskSnapshot> = lock(registry)
        .values()
        .map(|entry| entry.snapshot.clone())
        .collect();
    tasks.sort_by_key(|task| task_number(&task.id));
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RunRecord;

    fn plan() -> SessionPlan {
        SessionPlan::new(1000, 2).unwrap()
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = next_task_id();
        let b = next_task_id();
        assert!(a.starts_with("pystone-"));
        assert_ne!(a, b);
        assert!(task_number(&a) < task_number(&b));
    }

    #[test]
    fn only_one_running_task() {
        let registry = new_registry();
        let flag = Arc::new(AtomicBool::new(false));
        register_task(&registry, "pystone-1", plan(), Arc::clone(&flag)).unwrap();
        assert!(matches!(
            register_task(&registry, "pystone-2", plan(), Arc::clone(&flag)),
            Err(BenchError::Busy)
        ));

        finish_task(&registry, "pystone-1", &Ok(SessionResults::new(1000)));
        register_task(&registry, "pystone-2", plan(), flag).unwrap();

        let ids: Vec<_> = list_tasks(&registry).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["pystone-1", "pystone-2"]);
    }

    #[test]
    fn events_update_snapshot() {
        let registry = new_registry();
        register_task(&registry, "pystone-7", plan(), Arc::new(AtomicBool::new(false))).unwrap();

        record_event(&registry, "pystone-7", &SessionEvent::RunStarted { run: 1, runs: 2 });
        record_event(
            &registry,
            "pystone-7",
            &SessionEvent::Progress {
                run: 1,
                runs: 2,
                progress: Progress {
                    current: 500,
                    total: 1000,
                },
                overall_percent: 25,
            },
        );
        record_event(
            &registry,
            "pystone-7",
            &SessionEvent::RunCompleted(RunRecord {
                run: 1,
                elapsed_time: 0.1,
                throughput: 10_000.0,
            }),
        );

        let task = get_task("pystone-7", &registry).unwrap();
        assert_eq!(task.current_run, 1);
        assert_eq!(task.overall_percent, 25);
        assert_eq!(task.results.records.len(), 1);
        assert_eq!(task.stats.unwrap().avg_throughput, 10_000.0);
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn stop_sets_flag_of_running_task() {
        let registry = new_registry();
        let flag = Arc::new(AtomicBool::new(false));
        register_task(&registry, "pystone-3", plan(), Arc::clone(&flag)).unwrap();

        assert!(stop_task("pystone-3", &registry));
        assert!(flag.load(Ordering::SeqCst));
        assert!(!stop_task("pystone-404", &registry));

        finish_task(
            &registry,
            "pystone-3",
            &Err(BenchError::RuntimeFault("boom".to_string())),
        );
        let task = get_task("pystone-3", &registry).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("benchmark run failed: boom"));
    }
}
