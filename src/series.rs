// src/series.rs
//
// =============================================================================
// CPUSETISO: REQUEST TIME-SERIES STORE
// =============================================================================
//
// Persistent log of historical CPU-count requests, bucketed by a configurable
// sample window. The oversubscription estimator replays the latest bucket to
// fit its Poisson model.
//
// Layout: a single kv(key, value) table with three key classes.
//   "startDtg"       -> first bucket timestamp
//   "latest"         -> most recent bucket timestamp
//   "<bucket-secs>"  -> JSON array of [timestamp-secs, cpu-count] pairs
//
// A bucket body and the "latest" pointer always move in one transaction, so
// a reader never sees a pointer to a missing bucket.

use crate::errors::{CpusetError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};

pub const DB_FILE_NAME: &str = "cpusetiso.db";

pub const KEY_START_DTG: &str = "startDtg";
pub const KEY_LATEST: &str = "latest";

pub struct SeriesStore {
    conn: Connection,
    path: PathBuf,
    window_minutes: f64,
}

impl SeriesStore {
    /// Opens (create-if-missing) `<dir>/cpusetiso.db`.
    /// `window_minutes` is the Poisson bucket width; it must be positive.
    pub fn open(dir: impl AsRef<Path>, window_minutes: f64) -> Result<Self> {
        if !window_minutes.is_finite() || window_minutes <= 0.0 {
            return Err(CpusetError::Parse(format!(
                "sample window must be a positive number of minutes, got {}",
                window_minutes
            )));
        }

        let path = dir.as_ref().join(DB_FILE_NAME);
        let conn = Connection::open(&path)?;

        // DELETE journal mode avoids stray WAL files next to the agent's
        // state directory; the busy timeout covers concurrent estimator reads.
        conn.execute_batch(
            "PRAGMA journal_mode=DELETE;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=10000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT
            );",
        )?;

        Ok(Self {
            conn,
            path,
            window_minutes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn window_minutes(&self) -> f64 {
        self.window_minutes
    }

    /// Bucket start (in seconds) owning a timestamp:
    /// floor(minutes / window) * window, expressed back in seconds.
    pub fn bucket_of(&self, secs: i64) -> i64 {
        let minutes = secs as f64 / 60.0;
        let bucket_minutes = (minutes / self.window_minutes).floor() * self.window_minutes;
        (bucket_minutes * 60.0).round() as i64
    }

    /// Appends one request sample at the current wall clock.
    pub fn append(&mut self, cpu_count: u32) -> Result<()> {
        self.append_at(Utc::now().timestamp(), cpu_count)
    }

    /// Appends one request sample at an explicit timestamp. The bucket body
    /// and the `latest` pointer commit together.
    pub fn append_at(&mut self, secs: i64, cpu_count: u32) -> Result<()> {
        let bucket_key = self.bucket_of(secs).to_string();
        let tx = self.conn.transaction()?;

        let mut samples: Vec<(i64, u32)> = match Self::get(&tx, &bucket_key)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        samples.push((secs, cpu_count));

        Self::put(&tx, &bucket_key, &serde_json::to_string(&samples)?)?;
        Self::put(&tx, KEY_LATEST, &bucket_key)?;
        tx.execute(
            "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
            params![KEY_START_DTG, bucket_key],
        )?;

        tx.commit()?;
        log::debug!(
            "series: recorded request of {} core(s) in bucket {}",
            cpu_count,
            bucket_key
        );
        Ok(())
    }

    /// Replays the bucket behind the `latest` pointer under one read
    /// snapshot. An empty store yields an empty series.
    pub fn load_latest(&mut self) -> Result<Vec<(i64, u32)>> {
        let tx = self.conn.transaction()?;

        let latest = match Self::get(&tx, KEY_LATEST)? {
            Some(key) => key,
            None => return Ok(Vec::new()),
        };

        let raw = Self::get(&tx, &latest)?.ok_or_else(|| {
            CpusetError::Parse(format!("latest pointer '{}' has no bucket", latest))
        })?;

        let samples: Vec<(i64, u32)> = serde_json::from_str(&raw)?;
        Ok(samples)
    }

    /// First bucket ever written, if any.
    pub fn start_bucket(&mut self) -> Result<Option<String>> {
        let tx = self.conn.transaction()?;
        Self::get(&tx, KEY_START_DTG)
    }

    fn get(tx: &Transaction, key: &str) -> Result<Option<String>> {
        let value = tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(tx: &Transaction, key: &str, value: &str) -> Result<()> {
        tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
