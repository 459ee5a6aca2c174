//! Defaults shared by the CLI and the HTTP engine.

/// Iterations per run when none are given.
pub const DEFAULT_LOOPS: u64 = 50_000;

/// Runs per session when none are given.
pub const DEFAULT_RUNS: u32 = 1;

/// Upper bound on runs in one session.
pub const MAX_RUNS: u32 = 100;

/// Address the engine listens on.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Log level used when `--log-level` is absent.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Time between hardware samples taken beside a run.
pub const MONITOR_INTERVAL_MS: u64 = 1000;

/// Floating-point operations per CPU math repetition.
pub const SUITE_MATH_OPS: usize = 1_000_000;

/// Length of the list that is sorted, before it is repeated.
pub const SUITE_SORT_LEN: usize = 100_000;

/// How many copies of the sort list are concatenated.
pub const SUITE_SORT_REPEAT: usize = 10;

/// Elements allocated per memory repetition.
pub const SUITE_ALLOC_LEN: usize = 1_000_000;

/// Bytes written and read back per disk repetition.
pub const SUITE_DISK_BYTES: usize = 10 * 1024 * 1024;
