//! Host resource sampling beside a benchmark run.
//!
//! A [`HardwareMonitor`] samples CPU load, memory, disk and network traffic
//! and CPU temperature on its own thread until it is finished, then reduces
//! the samples to a [`MonitorSummary`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Components, Disks, Networks, System};
use tracing::{debug, info, warn};

use crate::error::{BenchError, Result};

const MB: f64 = 1024.0 * 1024.0;
const POLL: Duration = Duration::from_millis(50);

/// One reading. Byte counters are deltas since the previous reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_used_mb: f64,
    pub memory_available_mb: f64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub net_sent_bytes: u64,
    pub net_recv_bytes: u64,
    pub cpu_temp_c: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub samples: usize,
    pub cpu_avg: f32,
    pub cpu_max: f32,
    pub memory_avg: f32,
    pub memory_max: f32,
    pub total_disk_read_mb: f64,
    pub total_disk_write_mb: f64,
    pub total_network_sent_mb: f64,
    pub total_network_recv_mb: f64,
    pub cpu_temp_max: Option<f32>,
}

/// Reduces samples to averages, peaks and traffic totals.
pub fn summarize(samples: &[HardwareSample]) -> Option<MonitorSummary> {
    let (first, last) = (samples.first()?, samples.last()?);
    let n = samples.len() as f32;
    let total_mb = |f: fn(&HardwareSample) -> u64| samples.iter().map(f).sum::<u64>() as f64 / MB;

    Some(MonitorSummary {
        start_time: first.timestamp.to_rfc3339(),
        end_time: last.timestamp.to_rfc3339(),
        duration_seconds: (last.timestamp - first.timestamp)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
        samples: samples.len(),
        cpu_avg: samples.iter().map(|s| s.cpu_percent).sum::<f32>() / n,
        cpu_max: samples.iter().map(|s| s.cpu_percent).fold(0.0, f32::max),
        memory_avg: samples.iter().map(|s| s.memory_percent).sum::<f32>() / n,
        memory_max: samples.iter().map(|s| s.memory_percent).fold(0.0, f32::max),
        total_disk_read_mb: total_mb(|s| s.disk_read_bytes),
        total_disk_write_mb: total_mb(|s| s.disk_write_bytes),
        total_network_sent_mb: total_mb(|s| s.net_sent_bytes),
        total_network_recv_mb: total_mb(|s| s.net_recv_bytes),
        cpu_temp_max: samples.iter().filter_map(|s| s.cpu_temp_c).reduce(f32::max),
    })
}

/// sysinfo handles kept between readings so that counters yield deltas.
pub struct Sampler {
    sys: System,
    disks: Disks,
    networks: Networks,
    components: Components,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self) -> HardwareSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);
        self.components.refresh(true);

        let total = self.sys.total_memory();
        let available = self.sys.available_memory();
        let used = total.saturating_sub(available);
        let memory_percent = if total == 0 {
            0.0
        } else {
            used as f32 / total as f32 * 100.0
        };

        let (disk_read_bytes, disk_write_bytes) = self
            .disks
            .list()
            .iter()
            .map(|disk| disk.usage())
            .fold((0, 0), |(r, w), u| (r + u.read_bytes, w + u.written_bytes));
        let (net_recv_bytes, net_sent_bytes) = self
            .networks
            .list()
            .values()
            .fold((0, 0), |(r, t), data| (r + data.received(), t + data.transmitted()));

        HardwareSample {
            timestamp: Utc::now(),
            cpu_percent: self.sys.global_cpu_usage(),
            memory_percent,
            memory_used_mb: used as f64 / MB,
            memory_available_mb: available as f64 / MB,
            disk_read_bytes,
            disk_write_bytes,
            net_sent_bytes,
            net_recv_bytes,
            cpu_temp_c: self.cpu_temperature(),
        }
    }

    fn cpu_temperature(&self) -> Option<f32> {
        let mut fallback = None;
        for component in &self.components {
            let Some(temp) = component.temperature() else {
                continue;
            };
            let label = component.label().to_ascii_lowercase();
            if ["cpu", "package", "tctl", "core"].iter().any(|k| label.contains(k)) {
                return Some(temp);
            }
            fallback.get_or_insert(temp);
        }
        fallback
    }
}

/// Background sampler; stops and joins on [`finish`](Self::finish) or drop.
pub struct HardwareMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<HardwareSample>>>,
}

impl HardwareMonitor {
    /// Starts sampling every `interval`. A last sample is always taken on
    /// finish, so even a short run yields one reading.
    pub fn start(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(BenchError::InvalidArgument(
                "monitor interval must be positive".to_string(),
            ));
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("pystone-monitor".to_string())
            .spawn(move || {
                let mut sampler = Sampler::new();
                let mut samples = Vec::new();
                let mut last = Instant::now();
                while !stop_for_thread.load(Ordering::SeqCst) {
                    thread::sleep(POLL.min(interval));
                    if last.elapsed() >= interval {
                        samples.push(sampler.sample());
                        last = Instant::now();
                    }
                }
                samples.push(sampler.sample());
                samples
            })?;

        info!(interval_ms = interval.as_millis() as u64, "hardware monitoring started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops sampling and returns every reading taken.
    pub fn finish(mut self) -> Vec<HardwareSample> {
        let samples = self.join();
        info!(samples = samples.len(), "hardware monitoring stopped");
        samples
    }

    fn join(&mut self) -> Vec<HardwareSample> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(samples)) => samples,
            Some(Err(_)) => {
                warn!("hardware monitor thread panicked");
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

impl Drop for HardwareMonitor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!("hardware monitor dropped before finish");
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(offset_ms: i64, cpu: f32, mem: f32, temp: Option<f32>) -> HardwareSample {
        let base = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        HardwareSample {
            timestamp: base + chrono::Duration::milliseconds(offset_ms),
            cpu_percent: cpu,
            memory_percent: mem,
            memory_used_mb: 1024.0,
            memory_available_mb: 2048.0,
            disk_read_bytes: 1024 * 1024,
            disk_write_bytes: 2 * 1024 * 1024,
            net_sent_bytes: 512 * 1024,
            net_recv_bytes: 0,
            cpu_temp_c: temp,
        }
    }

    #[test]
    fn summary_averages_peaks_and_totals() {
        assert_eq!(summarize(&[]), None);

        let samples = [
            sample(0, 20.0, 40.0, None),
            sample(1000, 60.0, 50.0, Some(55.0)),
            sample(2500, 100.0, 45.0, Some(61.5)),
        ];
        let summary = summarize(&samples).unwrap();

        assert_eq!(summary.samples, 3);
        assert_eq!(summary.duration_seconds, 2.5);
        assert_eq!(summary.cpu_avg, 60.0);
        assert_eq!(summary.cpu_max, 100.0);
        assert_eq!(summary.memory_avg, 45.0);
        assert_eq!(summary.memory_max, 50.0);
        assert_eq!(summary.total_disk_read_mb, 3.0);
        assert_eq!(summary.total_disk_write_mb, 6.0);
        assert_eq!(summary.total_network_sent_mb, 1.5);
        assert_eq!(summary.total_network_recv_mb, 0.0);
        assert_eq!(summary.cpu_temp_max, Some(61.5));
        assert_eq!(summary.start_time, "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn monitor_always_yields_a_final_sample() {
        let monitor = HardwareMonitor::start(Duration::from_secs(60)).unwrap();
        let samples = monitor.finish();
        assert_eq!(samples.len(), 1);
        assert!((0.0..=100.0).contains(&samples[0].memory_percent));
        assert!(summarize(&samples).is_some());
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(matches!(
            HardwareMonitor::start(Duration::ZERO),
            Err(BenchError::InvalidArgument(_))
        ));
    }
}
