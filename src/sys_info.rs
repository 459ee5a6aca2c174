//! Host facts recorded next to benchmark results.

use std::env;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sysinfo::System;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CpuInfo {
    pub model: String,
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub frequency_mhz: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_percent: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    pub timestamp: String,
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub machine: String,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
}

impl SystemSnapshot {
    /// Reads the current host state. Unavailable fields become `"unknown"`.
    pub fn capture() -> Self {
        let sys = System::new_all();

        let hostname = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(_) => "unknown".to_string(),
        };

        let mut model = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        if cfg!(target_os = "linux") {
            if let Some(name) = proc_cpuinfo_model() {
                model = name;
            }
        }

        let total = sys.total_memory();
        let available = sys.available_memory();
        let used_percent = if total == 0 {
            0.0
        } else {
            (total.saturating_sub(available) as f32 / total as f32) * 100.0
        };

        Self {
            timestamp: Utc::now().to_rfc3339(),
            hostname,
            os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            kernel_version: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
            machine: env::consts::ARCH.to_string(),
            cpu: CpuInfo {
                model,
                physical_cores: num_cpus::get_physical(),
                logical_cores: num_cpus::get(),
                frequency_mhz: sys.cpus().first().map(|cpu| cpu.frequency()).filter(|&f| f > 0),
            },
            memory: MemoryInfo {
                total_bytes: total,
                available_bytes: available,
                used_percent,
            },
        }
    }
}

fn proc_cpuinfo_model() -> Option<String> {
    let output = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    output
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split(':').nth(1))
        .map(|model| model.trim().to_string())
}

const SIZE_UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// `bytes` in 1024-based units with two decimals, e.g. `1.50 KB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = SIZE_UNITS[0];
    for next in &SIZE_UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.2} {unit}")
}

impl fmt::Display for SystemSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== System Information ===")?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Operating System: {} {}", self.os_name, self.os_version)?;
        writeln!(f, "Kernel: {}", self.kernel_version)?;
        writeln!(f, "Machine Type: {}", self.machine)?;
        writeln!(f, "Hostname: {}", self.hostname)?;

        writeln!(f, "\n--- CPU ---")?;
        writeln!(f, "Model: {}", self.cpu.model)?;
        writeln!(f, "Physical Cores: {}", self.cpu.physical_cores)?;
        writeln!(f, "Logical Cores: {}", self.cpu.logical_cores)?;
        if let Some(freq) = self.cpu.frequency_mhz {
            writeln!(f, "Frequency: {} MHz", freq)?;
        }

        writeln!(f, "\n--- Memory ---")?;
        writeln!(f, "Total: {}", format_bytes(self.memory.total_bytes))?;
        writeln!(f, "Available: {}", format_bytes(self.memory.available_bytes))?;
        write!(f, "Used Percent: {:.1}%", self.memory.used_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_scale_by_1024() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(8 * 1024 * 1024 * 1024), "8.00 GB");
        assert_eq!(format_bytes(u64::MAX), "16.00 EB");
    }

    #[test]
    fn capture_fills_required_fields() {
        let snapshot = SystemSnapshot::capture();
        assert!(!snapshot.hostname.is_empty());
        assert!(!snapshot.cpu.model.is_empty());
        assert!(snapshot.cpu.logical_cores >= 1);
        assert!(snapshot.memory.used_percent >= 0.0);
        assert!(snapshot.to_string().contains("--- CPU ---"));
    }
}
