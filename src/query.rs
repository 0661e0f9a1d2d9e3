use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::provider::MetricsProvider;
use crate::snapshot::{ProcessUsage, Snapshot};
use crate::store::{SampleStore, StoreError};

const ROOT_DISK: &str = "/";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid time format: {0}")]
    InvalidTimeFormat(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

impl WindowUnit {
    const SUFFIXES: [(&'static str, WindowUnit); 4] = [
        ("Hours", WindowUnit::Hours),
        ("Days", WindowUnit::Days),
        ("Weeks", WindowUnit::Weeks),
        ("Months", WindowUnit::Months),
    ];
}

/// Relative time window taken from the wire expression `<int><unit>`,
/// e.g. `24Hours` or `7Days`. The unit casing is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub count: u32,
    pub unit: WindowUnit,
}

impl TimeWindow {
    fn duration(self) -> Duration {
        let count = i64::from(self.count);
        match self.unit {
            WindowUnit::Hours => Duration::hours(count),
            WindowUnit::Days => Duration::days(count),
            WindowUnit::Weeks => Duration::weeks(count),
            // Calendar months vary; a fixed 30 days keeps the window
            // arithmetic total-ordered.
            WindowUnit::Months => Duration::days(count * 30),
        }
    }

    /// `[now - duration, now]`.
    pub fn range(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.duration(), now)
    }
}

impl FromStr for TimeWindow {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count_part, unit) = WindowUnit::SUFFIXES
            .iter()
            .find_map(|(suffix, unit)| s.strip_suffix(suffix).map(|rest| (rest, *unit)))
            .ok_or_else(|| {
                QueryError::InvalidTimeFormat(format!(
                    "expected <integer><Hours|Days|Weeks|Months>, got {s:?}"
                ))
            })?;

        let count = count_part.parse::<u32>().map_err(|_| {
            QueryError::InvalidTimeFormat(format!("{count_part:?} is not a valid count"))
        })?;

        Ok(TimeWindow { count, unit })
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub usage: Usage,
    pub limits: Limits,
}

#[derive(Debug, Serialize)]
pub struct Usage {
    pub cpu: Vec<f64>,
    pub gpu: Vec<f64>,
    pub ram: Vec<f64>,
    pub load: Vec<f64>,
    pub network: Vec<u64>,
    pub time: Vec<String>,
    pub processes: ProcessSeries,
}

#[derive(Debug, Serialize)]
pub struct ProcessSeries {
    pub cpu: Vec<Vec<ProcessUsage>>,
    pub gpu: Vec<serde_json::Value>,
    pub ram: Vec<Vec<ProcessUsage>>,
}

#[derive(Debug, Serialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub struct Limits {
    pub cpu: Range,
    pub gpu: Range,
    pub ram: Range,
    pub disk: Range,
    pub cores: usize,
}

/// Parses the window expression, reads the matching store range and reshapes
/// it into the response payload. Limits reflect the current host capacity,
/// not a historical value.
pub fn get_stats(
    store: &SampleStore,
    provider: &dyn MetricsProvider,
    time_window_expr: &str,
) -> Result<StatsResponse, QueryError> {
    let window: TimeWindow = time_window_expr.parse()?;
    let (start, end) = window.range(Utc::now());
    debug!(%start, %end, "querying sample range");

    let rows = store.query_range(start, end)?;
    Ok(StatsResponse {
        usage: shape_usage(rows),
        limits: current_limits(provider),
    })
}

fn shape_usage(rows: Vec<Snapshot>) -> Usage {
    let mut usage = Usage {
        cpu: Vec::with_capacity(rows.len()),
        gpu: Vec::with_capacity(rows.len()),
        ram: Vec::with_capacity(rows.len()),
        load: Vec::with_capacity(rows.len()),
        network: Vec::with_capacity(rows.len()),
        time: Vec::with_capacity(rows.len()),
        processes: ProcessSeries {
            cpu: Vec::with_capacity(rows.len()),
            gpu: Vec::with_capacity(rows.len()),
            ram: Vec::with_capacity(rows.len()),
        },
    };

    for row in rows {
        usage.cpu.push(row.cpu_usage);
        usage.gpu.push(row.gpu_usage);
        usage.ram.push(row.ram_usage);
        usage.load.push(row.load_average);
        usage.network.push(row.network_load);
        usage.time.push(row.timestamp.to_rfc3339());
        usage.processes.cpu.push(row.top_cpu_processes);
        usage.processes.gpu.push(row.top_gpu_processes);
        usage.processes.ram.push(row.top_ram_processes);
    }
    usage
}

fn current_limits(provider: &dyn MetricsProvider) -> Limits {
    Limits {
        cpu: Range {
            min: 0.0,
            max: 100.0,
        },
        gpu: Range {
            min: 0.0,
            max: provider.gpu_total_memory_gb().unwrap_or(0.0),
        },
        ram: Range {
            min: 0.0,
            max: provider.memory_total_gb().unwrap_or(0.0),
        },
        disk: Range {
            min: 0.0,
            max: provider.disk_total_gb(Path::new(ROOT_DISK)).unwrap_or(0.0),
        },
        cores: provider.logical_core_count().unwrap_or(0),
    }
}
