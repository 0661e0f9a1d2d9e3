use std::path::Path;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, System, SystemExt};
use thiserror::Error;

/// CPU utilization is meaningless as a single instantaneous read, so the
/// provider blocks for one sampling interval between two refreshes.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no disk mounted at {0}")]
    DiskUnavailable(String),
}

/// One entry from a point-in-time process listing. Entries for processes
/// that exit mid-read are skipped by the provider, never surfaced as errors.
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Synchronous point-in-time reads of OS metrics. A failed read of one
/// metric never prevents reading the others.
pub trait MetricsProvider: Send + Sync {
    fn cpu_percent(&self) -> Result<f64, ProviderError>;
    fn memory_percent(&self) -> Result<f64, ProviderError>;
    fn disk_percent(&self, path: &Path) -> Result<f64, ProviderError>;
    fn load_average_1m(&self) -> Result<f64, ProviderError>;
    fn network_bytes_total(&self) -> Result<u64, ProviderError>;
    fn list_processes(&self) -> Result<Vec<ProcessSample>, ProviderError>;
    /// Total GPU memory in GB; 0 when no GPU subsystem is available.
    fn gpu_total_memory_gb(&self) -> Result<f64, ProviderError>;
    fn memory_total_gb(&self) -> Result<f64, ProviderError>;
    fn disk_total_gb(&self, path: &Path) -> Result<f64, ProviderError>;
    fn logical_core_count(&self) -> Result<usize, ProviderError>;
}

pub struct SysinfoProvider {
    system: Mutex<System>,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for SysinfoProvider {
    fn cpu_percent(&self) -> Result<f64, ProviderError> {
        self.system().refresh_cpu();
        // Lock released while the sample interval elapses; concurrent limit
        // reads must not wait a full second behind a tick.
        std::thread::sleep(CPU_SAMPLE_INTERVAL);

        let mut system = self.system();
        system.refresh_cpu();
        let cpus = system.cpus();
        if cpus.is_empty() {
            return Ok(0.0);
        }
        let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        Ok((sum / cpus.len() as f32) as f64)
    }

    fn memory_percent(&self) -> Result<f64, ProviderError> {
        let mut system = self.system();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Ok(0.0);
        }
        Ok((system.used_memory() as f64 / total as f64) * 100.0)
    }

    fn disk_percent(&self, path: &Path) -> Result<f64, ProviderError> {
        let mut system = self.system();
        system.refresh_disks_list();
        system.refresh_disks();
        let disk = system
            .disks()
            .iter()
            .find(|d| d.mount_point() == path)
            .ok_or_else(|| ProviderError::DiskUnavailable(path.display().to_string()))?;

        let total = disk.total_space();
        if total == 0 {
            return Ok(0.0);
        }
        let used = total.saturating_sub(disk.available_space());
        Ok((used as f64 / total as f64) * 100.0)
    }

    fn load_average_1m(&self) -> Result<f64, ProviderError> {
        Ok(self.system().load_average().one.max(0.0))
    }

    fn network_bytes_total(&self) -> Result<u64, ProviderError> {
        let mut system = self.system();
        system.refresh_networks_list();
        system.refresh_networks();
        Ok(system
            .networks()
            .iter()
            .map(|(_, data)| data.total_received().saturating_add(data.total_transmitted()))
            .fold(0_u64, u64::saturating_add))
    }

    fn list_processes(&self) -> Result<Vec<ProcessSample>, ProviderError> {
        let mut system = self.system();
        system.refresh_processes();
        let total_memory = system.total_memory();

        let samples = system
            .processes()
            .values()
            .filter(|p| !p.name().is_empty())
            .map(|p| {
                let memory_percent = if total_memory == 0 {
                    0.0
                } else {
                    (p.memory() as f64 / total_memory as f64) * 100.0
                };
                ProcessSample {
                    pid: p.pid().as_u32(),
                    name: p.name().to_string(),
                    cpu_percent: p.cpu_usage() as f64,
                    memory_percent,
                }
            })
            .collect();
        Ok(samples)
    }

    fn gpu_total_memory_gb(&self) -> Result<f64, ProviderError> {
        Ok(nvidia_total_memory_gb().unwrap_or(0.0))
    }

    fn memory_total_gb(&self) -> Result<f64, ProviderError> {
        let mut system = self.system();
        system.refresh_memory();
        Ok(system.total_memory() as f64 / BYTES_PER_GB)
    }

    fn disk_total_gb(&self, path: &Path) -> Result<f64, ProviderError> {
        let mut system = self.system();
        system.refresh_disks_list();
        system.refresh_disks();
        let disk = system
            .disks()
            .iter()
            .find(|d| d.mount_point() == path)
            .ok_or_else(|| ProviderError::DiskUnavailable(path.display().to_string()))?;
        Ok(disk.total_space() as f64 / BYTES_PER_GB)
    }

    fn logical_core_count(&self) -> Result<usize, ProviderError> {
        Ok(self.system().cpus().len())
    }
}

/// Total memory of the first GPU reported by nvidia-smi, in GB.
/// `None` when the tool is missing or its output is unusable; absence of a
/// GPU subsystem is not an error.
fn nvidia_total_memory_gb() -> Option<f64> {
    let output = run_nvidia_smi(&[
        "--query-gpu=memory.total",
        "--format=csv,noheader,nounits",
    ])?;
    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8(output.stdout).ok()?;
    let mib = text.lines().find_map(|line| parse_f64_loose(line))?;
    Some(mib / 1024.0)
}

fn run_nvidia_smi(args: &[&str]) -> Option<std::process::Output> {
    if let Ok(output) = Command::new("nvidia-smi").args(args).output() {
        return Some(output);
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = Command::new(r"C:\Windows\System32\nvidia-smi.exe")
            .args(args)
            .output()
        {
            return Some(output);
        }
    }

    None
}

fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }
    trimmed.replace(',', ".").parse::<f64>().ok()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_loose_accepts_plain_and_comma_decimals() {
        assert_eq!(parse_f64_loose("8192"), Some(8192.0));
        assert_eq!(parse_f64_loose(" 8192.5 "), Some(8192.5));
        assert_eq!(parse_f64_loose("8192,5"), Some(8192.5));
        assert_eq!(parse_f64_loose(""), None);
        assert_eq!(parse_f64_loose("N/A"), None);
    }

    #[test]
    fn sysinfo_provider_reports_sane_ranges() {
        let provider = SysinfoProvider::new();

        let ram = provider.memory_percent().unwrap();
        assert!((0.0..=100.0).contains(&ram));

        let load = provider.load_average_1m().unwrap();
        assert!(load >= 0.0);

        assert!(provider.logical_core_count().unwrap() >= 1);
        assert!(provider.memory_total_gb().unwrap() > 0.0);
    }

    #[test]
    fn cpu_sampling_does_not_stall_concurrent_capacity_reads() {
        use std::sync::Arc;
        use std::time::Instant;

        let provider = Arc::new(SysinfoProvider::new());
        let sampler = {
            let provider = provider.clone();
            std::thread::spawn(move || provider.cpu_percent().unwrap())
        };
        // Let the sampler enter its blocking interval.
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        provider.memory_total_gb().unwrap();
        provider.logical_core_count().unwrap();
        assert!(
            started.elapsed() < CPU_SAMPLE_INTERVAL / 2,
            "capacity reads waited on the CPU sample"
        );

        sampler.join().unwrap();
    }

    #[test]
    fn list_processes_skips_unnamed_entries() {
        let provider = SysinfoProvider::new();
        let processes = provider.list_processes().unwrap();
        assert!(processes.iter().all(|p| !p.name.is_empty()));
    }
}
