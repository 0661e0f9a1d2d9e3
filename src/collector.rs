use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::provider::{MetricsProvider, ProviderError};
use crate::snapshot::{top_processes_by, Snapshot};
use crate::store::SampleStore;

const ROOT_DISK: &str = "/";

/// Runs the sampling loop until shutdown is signalled. One tick reads the
/// metrics, builds a snapshot and appends it; a persistence failure drops
/// that tick and the loop continues.
pub async fn run(
    provider: Arc<dyn MetricsProvider>,
    store: Arc<SampleStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("stopping sample collection");
                break;
            }
            _ = ticker.tick() => {
                // Both the CPU read and the SQLite write block, so the whole
                // tick runs off the async runtime.
                let outcome = {
                    let provider = provider.clone();
                    let store = store.clone();
                    tokio::task::spawn_blocking(move || {
                        let snapshot = sample(provider.as_ref());
                        store.append(&snapshot)
                    })
                    .await
                };
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(error = %err, "failed to persist snapshot, dropping tick");
                    }
                    Err(err) => {
                        error!(error = %err, "sampling task panicked, skipping tick");
                    }
                }
            }
        }
    }
}

/// Builds one snapshot from the provider. Each metric is read independently;
/// a failed read degrades that field to zero instead of losing the tick. The
/// process list is read once and reused for both rankings.
pub fn sample(provider: &dyn MetricsProvider) -> Snapshot {
    let cpu_usage = read_or_zero(provider.cpu_percent(), "cpu_percent");
    let gpu_total_gb = read_or_zero(provider.gpu_total_memory_gb(), "gpu_total_memory");
    let ram_usage = read_or_zero(provider.memory_percent(), "memory_percent");
    let disk_usage = read_or_zero(provider.disk_percent(Path::new(ROOT_DISK)), "disk_percent");
    let load_average = read_or_zero(provider.load_average_1m(), "load_average");
    let network_load = read_or_zero(provider.network_bytes_total(), "network_bytes");
    let processes = read_or_zero(provider.list_processes(), "process_list");

    let top_cpu_processes = top_processes_by(&processes, |p| p.cpu_percent);
    let top_ram_processes = top_processes_by(&processes, |p| p.memory_percent);
    let top_gpu_processes = if gpu_total_gb > 0.0 {
        serde_json::json!(gpu_total_gb)
    } else {
        serde_json::json!([])
    };

    Snapshot {
        timestamp: Utc::now(),
        cpu_usage,
        gpu_usage: gpu_total_gb,
        ram_usage,
        disk_usage,
        load_average,
        network_load,
        top_cpu_processes,
        top_gpu_processes,
        top_ram_processes,
    }
}

fn read_or_zero<T: Default>(result: Result<T, ProviderError>, metric: &'static str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(metric, error = %err, "metric read failed, recording zero");
            T::default()
        }
    }
}
