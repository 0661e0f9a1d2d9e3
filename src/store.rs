use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::snapshot::{ProcessUsage, Snapshot};

/// Fixed-width RFC 3339 with millisecond precision and a `Z` suffix, so
/// lexicographic order on the TEXT column equals chronological order.
fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stats (
    id                INTEGER PRIMARY KEY,
    timestamp         TEXT NOT NULL,
    cpu_usage         REAL NOT NULL,
    gpu_usage         REAL NOT NULL,
    ram_usage         REAL NOT NULL,
    disk_usage        REAL NOT NULL,
    load_average      REAL NOT NULL,
    network_load      INTEGER NOT NULL,
    top_cpu_processes TEXT NOT NULL,
    top_gpu_processes TEXT NOT NULL,
    top_ram_processes TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stats_timestamp ON stats (timestamp);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored row has an unreadable timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("stored row has an unreadable process list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Append-only snapshot table. The collector is the sole writer, queries are
/// read-only; the connection mutex serializes writers against readers so a
/// row is seen fully or not at all.
pub struct SampleStore {
    conn: Mutex<Connection>,
}

impl SampleStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Idempotently ensures the schema exists; safe on every process start.
    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Durably persists one snapshot. A single INSERT commits atomically, so
    /// a concurrent reader sees the row completely or not at all.
    pub fn append(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let top_cpu = serde_json::to_string(&snapshot.top_cpu_processes)?;
        let top_gpu = snapshot.top_gpu_processes.to_string();
        let top_ram = serde_json::to_string(&snapshot.top_ram_processes)?;

        self.conn().execute(
            "INSERT INTO stats (timestamp, cpu_usage, gpu_usage, ram_usage, disk_usage, \
                                load_average, network_load, top_cpu_processes, \
                                top_gpu_processes, top_ram_processes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                encode_timestamp(snapshot.timestamp),
                snapshot.cpu_usage,
                snapshot.gpu_usage,
                snapshot.ram_usage,
                snapshot.disk_usage,
                snapshot.load_average,
                snapshot.network_load as i64,
                top_cpu,
                top_gpu,
                top_ram,
            ],
        )?;
        Ok(())
    }

    /// All snapshots with `start <= timestamp <= end`, ascending by
    /// timestamp. An empty window or `start > end` yields an empty vec.
    pub fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        struct RawRow {
            timestamp: String,
            cpu_usage: f64,
            gpu_usage: f64,
            ram_usage: f64,
            disk_usage: f64,
            load_average: f64,
            network_load: i64,
            top_cpu: String,
            top_gpu: String,
            top_ram: String,
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, cpu_usage, gpu_usage, ram_usage, disk_usage, load_average, \
                    network_load, top_cpu_processes, top_gpu_processes, top_ram_processes \
             FROM stats \
             WHERE timestamp >= ?1 AND timestamp <= ?2 \
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(
            rusqlite::params![encode_timestamp(start), encode_timestamp(end)],
            |row| {
                Ok(RawRow {
                    timestamp: row.get(0)?,
                    cpu_usage: row.get(1)?,
                    gpu_usage: row.get(2)?,
                    ram_usage: row.get(3)?,
                    disk_usage: row.get(4)?,
                    load_average: row.get(5)?,
                    network_load: row.get(6)?,
                    top_cpu: row.get(7)?,
                    top_gpu: row.get(8)?,
                    top_ram: row.get(9)?,
                })
            },
        )?;

        let mut snapshots = Vec::new();
        for row in rows {
            let raw = row?;
            let timestamp = DateTime::parse_from_rfc3339(&raw.timestamp)?.with_timezone(&Utc);
            let top_cpu_processes: Vec<ProcessUsage> = serde_json::from_str(&raw.top_cpu)?;
            let top_gpu_processes: serde_json::Value = serde_json::from_str(&raw.top_gpu)?;
            let top_ram_processes: Vec<ProcessUsage> = serde_json::from_str(&raw.top_ram)?;

            snapshots.push(Snapshot {
                timestamp,
                cpu_usage: raw.cpu_usage,
                gpu_usage: raw.gpu_usage,
                ram_usage: raw.ram_usage,
                disk_usage: raw.disk_usage,
                load_average: raw.load_average,
                network_load: raw.network_load.max(0) as u64,
                top_cpu_processes,
                top_gpu_processes,
                top_ram_processes,
            });
        }
        Ok(snapshots)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
