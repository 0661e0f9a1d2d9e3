use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProcessSample;

pub const TOP_PROCESS_COUNT: usize = 10;

/// A `(name, percent)` pair; serializes as a two-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessUsage(pub String, pub f64);

/// One timestamped set of system metrics, immutable once written.
///
/// `gpu_usage` and `top_gpu_processes` carry the total GPU memory capacity in
/// GB rather than utilization; that is the historical field meaning and it is
/// preserved as-is (see DESIGN.md). `top_gpu_processes` is a JSON number when
/// a GPU is present and the empty array `[]` when not.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub gpu_usage: f64,
    pub ram_usage: f64,
    pub disk_usage: f64,
    pub load_average: f64,
    pub network_load: u64,
    pub top_cpu_processes: Vec<ProcessUsage>,
    pub top_gpu_processes: serde_json::Value,
    pub top_ram_processes: Vec<ProcessUsage>,
}

/// Top entries of one process listing, ranked descending by `key`.
pub fn top_processes_by<F>(processes: &[ProcessSample], key: F) -> Vec<ProcessUsage>
where
    F: Fn(&ProcessSample) -> f64,
{
    let mut ranked: Vec<&ProcessSample> = processes.iter().collect();
    ranked.sort_by(|a, b| key(b).total_cmp(&key(a)));
    ranked
        .into_iter()
        .take(TOP_PROCESS_COUNT)
        .map(|p| ProcessUsage(p.name.clone(), key(p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, cpu: f64, ram: f64) -> ProcessSample {
        ProcessSample {
            pid: 1,
            name: name.to_string(),
            cpu_percent: cpu,
            memory_percent: ram,
        }
    }

    #[test]
    fn ranking_sorts_descending_and_caps_at_ten() {
        let processes: Vec<ProcessSample> = (0..15)
            .map(|i| sample(&format!("proc{i}"), i as f64, 0.0))
            .collect();

        let top = top_processes_by(&processes, |p| p.cpu_percent);
        assert_eq!(top.len(), TOP_PROCESS_COUNT);
        assert_eq!(top[0], ProcessUsage("proc14".to_string(), 14.0));
        assert!(top.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn cpu_and_ram_rankings_use_their_own_key() {
        let processes = vec![
            sample("cpu-hog", 90.0, 1.0),
            sample("ram-hog", 1.0, 80.0),
        ];

        let by_cpu = top_processes_by(&processes, |p| p.cpu_percent);
        let by_ram = top_processes_by(&processes, |p| p.memory_percent);
        assert_eq!(by_cpu[0].0, "cpu-hog");
        assert_eq!(by_ram[0].0, "ram-hog");
    }

    #[test]
    fn process_usage_serializes_as_pair() {
        let pair = ProcessUsage("chrome".to_string(), 12.5);
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(json, r#"["chrome",12.5]"#);

        let back: ProcessUsage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pair);
    }

    #[test]
    fn ranking_of_empty_listing_is_empty() {
        assert!(top_processes_by(&[], |p| p.cpu_percent).is_empty());
    }
}
