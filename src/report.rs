//! Exporting session results.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::monitor::MonitorSummary;
use crate::session::{RunRecord, SessionResults, SessionStats};
use crate::suite::{SuiteResults, TestResult};
use crate::sys_info::SystemSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// `.csv` selects CSV; every other extension is written as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportFormat::Csv,
            _ => ExportFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub timestamp: String,
    pub iterations: u64,
    pub cancelled: bool,
    pub benchmark_results: Vec<RunRecord>,
    pub stats: Option<SessionStats>,
    pub system: Option<SystemSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<MonitorSummary>,
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn write_report<T: Serialize>(path: &Path, report: &T, csv: impl FnOnce() -> String) -> Result<()> {
    let format = ExportFormat::from_path(path);
    let mut out = BufWriter::new(File::create(path)?);
    match format {
        ExportFormat::Json => serde_json::to_writer_pretty(&mut out, report)?,
        ExportFormat::Csv => out.write_all(csv().as_bytes())?,
    }
    out.flush()?;
    info!(path = %path.display(), ?format, "exported benchmark results");
    Ok(())
}

/// Quotes a CSV field when it holds a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl SessionReport {
    pub fn new(results: &SessionResults, system: Option<SystemSnapshot>) -> Self {
        Self {
            timestamp: timestamp(),
            iterations: results.iterations,
            cancelled: results.cancelled,
            benchmark_results: results.records.clone(),
            stats: results.stats(),
            system,
            hardware: None,
        }
    }

    /// Attaches resource usage measured while the session ran.
    pub fn with_hardware(mut self, hardware: Option<MonitorSummary>) -> Self {
        self.hardware = hardware;
        self
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        write_report(path, self, || self.to_csv())
    }

    pub fn to_csv(&self) -> String {
        let mut csv = String::from("run,time_s,pystones_per_sec\n");
        for record in &self.benchmark_results {
            let _ = writeln!(
                csv,
                "{},{},{}",
                record.run, record.elapsed_time, record.throughput
            );
        }
        csv
    }
}

/// Renders the per-run table, followed by statistics when more than one run
/// completed.
pub fn results_table(results: &SessionResults) -> String {
    let mut table = String::new();
    let _ = writeln!(table, "Run #\tTime (s)\tPystones/sec");
    let _ = writeln!(table, "{}", "-".repeat(50));
    for record in &results.records {
        let _ = writeln!(
            table,
            "{:4}\t{:8.2}\t{:10.2}",
            record.run, record.elapsed_time, record.throughput
        );
    }

    if let Some(stats) = results.stats().filter(|stats| stats.runs > 1) {
        let _ = writeln!(table, "\n--- Statistics (over {} runs) ---", stats.runs);
        let _ = writeln!(
            table,
            "Average time: {:.2}s (min: {:.2}s, max: {:.2}s)",
            stats.avg_time, stats.min_time, stats.max_time
        );
        let _ = writeln!(
            table,
            "Average performance: {:.2} pystones/sec (min: {:.2}, max: {:.2})",
            stats.avg_throughput, stats.min_throughput, stats.max_throughput
        );
        let _ = writeln!(
            table,
            "Median: {:.2}s, {:.2} pystones/sec (stdev: {:.2}s, {:.2})",
            stats.median_time, stats.median_throughput, stats.stdev_time, stats.stdev_throughput
        );
    }
    table
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub timestamp: String,
    pub cancelled: bool,
    pub benchmark_results: Vec<TestResult>,
}

impl SuiteReport {
    pub fn new(suite: &SuiteResults) -> Self {
        Self {
            timestamp: timestamp(),
            cancelled: suite.cancelled,
            benchmark_results: suite.results.clone(),
        }
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        write_report(path, self, || self.to_csv())
    }

    /// Fixed columns first, then one `metadata_<key>` column per key seen in
    /// any result, sorted.
    pub fn to_csv(&self) -> String {
        let keys: BTreeSet<&str> = self
            .benchmark_results
            .iter()
            .flat_map(|r| r.metadata.keys().map(String::as_str))
            .collect();

        let mut csv = String::from("name,score,unit,iterations,min,max,mean,median,stdev,times");
        for key in &keys {
            let _ = write!(csv, ",{}", csv_field(&format!("metadata_{key}")));
        }
        csv.push('\n');

        for r in &self.benchmark_results {
            let times: Vec<String> = r.times.iter().map(f64::to_string).collect();
            let _ = write!(
                csv,
                "{},{},{},{},{},{},{},{},{},{}",
                csv_field(&r.name),
                r.score,
                csv_field(&r.unit),
                r.iterations,
                r.timing.min,
                r.timing.max,
                r.timing.mean,
                r.timing.median,
                r.timing.stdev,
                times.join(";")
            );
            for key in &keys {
                let cell = match r.metadata.get(*key) {
                    Some(serde_json::Value::String(text)) => csv_field(text),
                    Some(value) => csv_field(&value.to_string()),
                    None => String::new(),
                };
                let _ = write!(csv, ",{cell}");
            }
            csv.push('\n');
        }
        csv
    }
}

/// One line per test: name, score and mean repetition time.
pub fn suite_table(suite: &SuiteResults) -> String {
    let mut table = String::new();
    let _ = writeln!(table, "{:<28}{:>16}  {:<6}{:>12}", "Test", "Score", "Unit", "Mean (s)");
    let _ = writeln!(table, "{}", "-".repeat(64));
    for r in &suite.results {
        let _ = writeln!(
            table,
            "{:<28}{:>16.2}  {:<6}{:>12.4}",
            r.name, r.score, r.unit, r.timing.mean
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionResults {
        SessionResults {
            iterations: 50_000,
            records: vec![
                RunRecord {
                    run: 1,
                    elapsed_time: 0.5,
                    throughput: 100_000.0,
                },
                RunRecord {
                    run: 2,
                    elapsed_time: 0.25,
                    throughput: 200_000.0,
                },
            ],
            cancelled: false,
        }
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a.csv")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("a.CSV")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("a.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("results")), ExportFormat::Json);
    }

    #[test]
    fn json_export_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let report = SessionReport::new(&sample(), None);
        report.export(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: SessionReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.benchmark_results, sample().records);
        assert_eq!(parsed.stats.unwrap().avg_throughput, 150_000.0);
    }

    #[test]
    fn csv_export_writes_one_row_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        SessionReport::new(&sample(), None).export(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["run,time_s,pystones_per_sec", "1,0.5,100000", "2,0.25,200000"]
        );
    }

    #[test]
    fn table_lists_runs_and_statistics() {
        let table = results_table(&sample());
        assert!(table.starts_with("Run #\tTime (s)\tPystones/sec\n"));
        assert!(table.contains("   1\t    0.50\t 100000.00"));
        assert!(table.contains("--- Statistics (over 2 runs) ---"));
        assert!(table.contains("Average performance: 150000.00 pystones/sec"));

        let mut single = sample();
        single.records.truncate(1);
        assert!(!results_table(&single).contains("Statistics"));
    }

    #[test]
    fn hardware_summary_is_exported_when_attached() {
        let bare = serde_json::to_value(SessionReport::new(&sample(), None)).unwrap();
        assert!(bare.get("hardware").is_none());

        let summary = MonitorSummary {
            start_time: "2024-01-01T00:00:00+00:00".to_string(),
            end_time: "2024-01-01T00:00:02+00:00".to_string(),
            duration_seconds: 2.0,
            samples: 3,
            cpu_avg: 97.5,
            cpu_max: 100.0,
            memory_avg: 40.0,
            memory_max: 41.0,
            total_disk_read_mb: 0.0,
            total_disk_write_mb: 0.5,
            total_network_sent_mb: 0.0,
            total_network_recv_mb: 0.0,
            cpu_temp_max: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitored.json");
        SessionReport::new(&sample(), None)
            .with_hardware(Some(summary.clone()))
            .export(&path)
            .unwrap();

        let parsed: SessionReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.hardware, Some(summary));
    }

    fn suite() -> SuiteResults {
        let json = serde_json::json!({
            "results": [
                {
                    "name": "CPU Math Operations", "score": 4.0, "unit": "ops/s",
                    "iterations": 2, "times": [0.25, 0.25],
                    "min": 0.25, "max": 0.25, "mean": 0.25, "median": 0.25, "stdev": 0.0,
                    "metadata": { "test_type": "cpu", "operations": "arithmetic, sqrt" }
                },
                {
                    "name": "Disk I/O Speed", "score": 80.0, "unit": "MB/s",
                    "iterations": 1, "times": [0.1, 0.15],
                    "min": 0.1, "max": 0.15, "mean": 0.125, "median": 0.125, "stdev": 0.0,
                    "metadata": { "test_type": "disk", "data_size": 10485760 }
                }
            ],
            "cancelled": false
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn suite_csv_spreads_metadata_into_columns() {
        let csv = SuiteReport::new(&suite()).to_csv();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "name,score,unit,iterations,min,max,mean,median,stdev,times,\
                 metadata_data_size,metadata_operations,metadata_test_type",
                "CPU Math Operations,4,ops/s,2,0.25,0.25,0.25,0.25,0,0.25;0.25,,\"arithmetic, sqrt\",cpu",
                "Disk I/O Speed,80,MB/s,1,0.1,0.15,0.125,0.125,0,0.1;0.15,10485760,,disk",
            ]
        );
    }

    #[test]
    fn suite_json_round_trips_through_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        SuiteReport::new(&suite()).export(&path).unwrap();

        let parsed: SuiteReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.benchmark_results, suite().results);
        assert!(suite_table(&suite()).contains("Disk I/O Speed"));
    }
}
