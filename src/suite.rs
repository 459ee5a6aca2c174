//! Supplementary CPU, memory and disk micro-tests.
//!
//! Each test repeats a fixed workload, timing every repetition. The stop
//! flag is polled before each repetition, as the stress workloads do.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::hint::black_box;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::{
    SUITE_ALLOC_LEN, SUITE_DISK_BYTES, SUITE_MATH_OPS, SUITE_SORT_LEN, SUITE_SORT_REPEAT,
};
use crate::error::{BenchError, Result};
use crate::stats::{mean, Summary};

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub math_ops: usize,
    pub sort_len: usize,
    pub sort_repeat: usize,
    pub alloc_len: usize,
    pub disk_bytes: usize,
    pub math_iterations: u32,
    pub sort_iterations: u32,
    pub alloc_iterations: u32,
    pub disk_iterations: u32,
    /// Where the disk test puts its scratch file; the system temp dir if unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            math_ops: SUITE_MATH_OPS,
            sort_len: SUITE_SORT_LEN,
            sort_repeat: SUITE_SORT_REPEAT,
            alloc_len: SUITE_ALLOC_LEN,
            disk_bytes: SUITE_DISK_BYTES,
            math_iterations: 5,
            sort_iterations: 3,
            alloc_iterations: 5,
            disk_iterations: 3,
            scratch_dir: None,
        }
    }
}

impl SuiteConfig {
    pub fn validate(&self) -> Result<()> {
        let iterations = [
            self.math_iterations,
            self.sort_iterations,
            self.alloc_iterations,
            self.disk_iterations,
        ];
        if iterations.contains(&0) {
            return Err(BenchError::InvalidArgument(
                "every suite test needs at least one iteration".to_string(),
            ));
        }
        if self.disk_bytes == 0 {
            return Err(BenchError::InvalidArgument(
                "disk test size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timings of one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub score: f64,
    pub unit: String,
    pub iterations: u32,
    pub times: Vec<f64>,
    #[serde(flatten)]
    pub timing: Summary,
    pub metadata: BTreeMap<String, Value>,
}

impl TestResult {
    fn new(name: &str, unit: &str, score: f64, times: Vec<f64>, metadata: Value) -> Self {
        let metadata = match metadata {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Self {
            name: name.to_string(),
            score,
            unit: unit.to_string(),
            iterations: times.len() as u32,
            timing: Summary::of(&times),
            times,
            metadata,
        }
    }

    /// Operations per second from the mean repetition time.
    fn ops(name: &str, times: Vec<f64>, metadata: Value) -> Self {
        let avg = mean(&times);
        let score = if avg > 0.0 { 1.0 / avg } else { 0.0 };
        Self::new(name, "ops/s", score, times, metadata)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteResults {
    pub results: Vec<TestResult>,
    pub cancelled: bool,
}

/// Times `iterations` calls of `work`; `None` when stopped first.
fn time_repeated<F>(iterations: u32, stop: &AtomicBool, mut work: F) -> Result<Option<Vec<f64>>>
where
    F: FnMut() -> Result<()>,
{
    let mut times = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        if stop.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let start = Instant::now();
        work()?;
        times.push(start.elapsed().as_secs_f64());
    }
    Ok(Some(times))
}

#[allow(clippy::approx_constant)]
pub fn cpu_math(config: &SuiteConfig, stop: &AtomicBool) -> Result<Option<TestResult>> {
    let n = config.math_ops;
    let times = time_repeated(config.math_iterations, stop, || {
        for _ in 0..n {
            let mut x = black_box(3.14159f64) * 2.71828;
            x = x.sqrt();
            x = x.sin() + x.cos();
            black_box((x + 1.0).ln().exp());
        }
        Ok(())
    })?;
    Ok(times.map(|times| {
        TestResult::ops(
            "CPU Math Operations",
            times,
            json!({ "test_type": "cpu", "operations": "arithmetic, sqrt, trig, exp, log" }),
        )
    }))
}

pub fn cpu_sorting(config: &SuiteConfig, stop: &AtomicBool) -> Result<Option<TestResult>> {
    let base: Vec<u64> = (0..config.sort_len as u64).collect();
    let data_size = config.sort_len * config.sort_repeat;
    let times = time_repeated(config.sort_iterations, stop, || {
        let mut data = base.repeat(config.sort_repeat);
        data.sort();
        black_box(data);
        Ok(())
    })?;
    Ok(times.map(|times| {
        TestResult::ops(
            "CPU Sorting",
            times,
            json!({ "test_type": "cpu", "data_size": data_size }),
        )
    }))
}

pub fn memory_allocation(config: &SuiteConfig, stop: &AtomicBool) -> Result<Option<TestResult>> {
    let size = config.alloc_len as u64;
    let times = time_repeated(config.alloc_iterations, stop, || {
        let data: Vec<u64> = (0..size).map(|i| i * 2).collect();
        black_box(data.iter().map(|x| x % 17).sum::<u64>());
        Ok(())
    })?;
    Ok(times.map(|times| {
        TestResult::ops(
            "Memory Allocation & Access",
            times,
            json!({ "test_type": "memory", "data_size": size }),
        )
    }))
}

/// Writes then reads back a random payload. Returns the write, read and
/// combined results, the last scored in MB/s.
pub fn disk_io(config: &SuiteConfig, stop: &AtomicBool) -> Result<Option<Vec<TestResult>>> {
    let scratch = match &config.scratch_dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    let path = scratch.path().to_path_buf();
    let mut data = vec![0u8; config.disk_bytes];
    rand::fill(&mut data[..]);
    debug!(path = %path.display(), bytes = data.len(), "disk test scratch file");

    let Some(write_times) = time_repeated(config.disk_iterations, stop, || {
        let mut file = File::create(&path)?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(())
    })?
    else {
        return Ok(None);
    };
    let Some(read_times) = time_repeated(config.disk_iterations, stop, || {
        let read = fs::read(&path)?;
        if read.len() != data.len() {
            return Err(BenchError::RuntimeFault(format!(
                "read back {} of {} bytes",
                read.len(),
                data.len()
            )));
        }
        Ok(())
    })?
    else {
        return Ok(None);
    };

    let size_mb = data.len() as f64 / MB;
    let speed = |times: &[f64]| {
        let avg = mean(times);
        if avg > 0.0 {
            format!("{:.2} MB/s", size_mb / avg)
        } else {
            "N/A".to_string()
        }
    };
    let total = mean(&write_times) + mean(&read_times);
    let combined_score = if total > 0.0 { 2.0 * size_mb / total } else { 0.0 };
    let combined_meta = json!({
        "test_type": "disk",
        "data_size": data.len(),
        "write_speed": speed(&write_times),
        "read_speed": speed(&read_times),
    });

    let write = TestResult::ops(
        "Disk Write Speed",
        write_times.clone(),
        json!({ "test_type": "disk", "operation": "write", "data_size": data.len() }),
    );
    let read = TestResult::ops(
        "Disk Read Speed",
        read_times.clone(),
        json!({ "test_type": "disk", "operation": "read", "data_size": data.len() }),
    );
    let mut times = write_times;
    times.extend(read_times);
    let mut combined = TestResult::new("Disk I/O Speed", "MB/s", combined_score, times, combined_meta);
    combined.iterations = config.disk_iterations;

    Ok(Some(vec![write, read, combined]))
}

/// Runs every test in order, disk last. A set stop flag ends the suite after
/// the current repetition and keeps finished tests.
pub fn run_suite<F>(config: &SuiteConfig, stop: &AtomicBool, mut on_result: F) -> Result<SuiteResults>
where
    F: FnMut(&TestResult),
{
    config.validate()?;
    info!("starting benchmark suite");
    let mut suite = SuiteResults::default();

    type SingleTest = fn(&SuiteConfig, &AtomicBool) -> Result<Option<TestResult>>;
    let single: [SingleTest; 3] = [cpu_math, cpu_sorting, memory_allocation];
    for test in single {
        match test(config, stop)? {
            Some(result) => {
                on_result(&result);
                suite.results.push(result);
            }
            None => {
                suite.cancelled = true;
                return Ok(suite);
            }
        }
    }

    match disk_io(config, stop)? {
        Some(results) => {
            for result in results {
                on_result(&result);
                suite.results.push(result);
            }
        }
        None => suite.cancelled = true,
    }

    info!(tests = suite.results.len(), cancelled = suite.cancelled, "benchmark suite finished");
    Ok(suite)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SuiteConfig {
        SuiteConfig {
            math_ops: 1000,
            sort_len: 1000,
            sort_repeat: 3,
            alloc_len: 1000,
            disk_bytes: 64 * 1024,
            math_iterations: 2,
            sort_iterations: 2,
            alloc_iterations: 2,
            disk_iterations: 2,
            scratch_dir: None,
        }
    }

    #[test]
    fn full_suite_reports_every_test() {
        let dir = tempfile::tempdir().unwrap();
        let config = SuiteConfig {
            scratch_dir: Some(dir.path().to_path_buf()),
            ..small()
        };
        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        let suite = run_suite(&config, &stop, |r| seen.push(r.name.clone())).unwrap();

        assert!(!suite.cancelled);
        assert_eq!(
            seen,
            vec![
                "CPU Math Operations",
                "CPU Sorting",
                "Memory Allocation & Access",
                "Disk Write Speed",
                "Disk Read Speed",
                "Disk I/O Speed",
            ]
        );
        let combined = suite.results.last().unwrap();
        assert_eq!(combined.unit, "MB/s");
        assert_eq!(combined.times.len(), 4);
        assert_eq!(combined.iterations, 2);
        assert_eq!(combined.metadata["data_size"], 64 * 1024);
        assert_eq!(suite.results[1].metadata["data_size"], 3000);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn timing_summary_matches_times() {
        let stop = AtomicBool::new(false);
        let result = memory_allocation(&small(), &stop).unwrap().unwrap();
        assert_eq!(result.iterations, 2);
        assert_eq!(result.timing, Summary::of(&result.times));
        assert!(result.timing.min <= result.timing.max);
        if result.timing.mean > 0.0 {
            assert_eq!(result.score, 1.0 / result.timing.mean);
        }

        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("median").is_some());
        assert!(value.get("stdev").is_some());
    }

    #[test]
    fn preset_stop_runs_nothing() {
        let stop = AtomicBool::new(true);
        let suite = run_suite(&small(), &stop, |_| panic!("no test should finish")).unwrap();
        assert!(suite.cancelled);
        assert!(suite.results.is_empty());
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let config = SuiteConfig {
            sort_iterations: 0,
            ..small()
        };
        assert!(matches!(
            run_suite(&config, &AtomicBool::new(false), |_| {}),
            Err(BenchError::InvalidArgument(_))
        ));
    }
}
