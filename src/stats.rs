//! Statistics Tracker (C11, §4.11).
//!
//! Tracks counters for the currently running operation plus a cumulative
//! total across the process's history, the latter persisted as JSON. Each
//! run gets a process-unique `run_id`; `end_run_by_id` is a no-op unless the
//! caller's id still matches the current run, guarding against a stale
//! finalization from a superseded run (§9 Design Notes).

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-run counters, live while a run is in progress.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub run_id: String,
    pub operation_type: String,
    pub started_at: chrono::DateTime<Utc>,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retries: u64,
    pub rate_limits: u64,
    pub bytes: u64,
}

impl RunStats {
    fn new(run_id: String, operation_type: String) -> Self {
        RunStats {
            run_id,
            operation_type,
            started_at: Utc::now(),
            downloaded: 0,
            failed: 0,
            skipped: 0,
            retries: 0,
            rate_limits: 0,
            bytes: 0,
        }
    }
}

/// The outcome of finalizing a run (§4.11): elapsed time, throughput, and
/// success rate derived from its final counters.
#[derive(Debug, Clone)]
pub struct FinalizedRun {
    pub run_id: String,
    pub operation_type: String,
    pub elapsed_secs: f64,
    pub tracks_per_hour: f64,
    pub success_rate: f64,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retries: u64,
    pub rate_limits: u64,
    pub bytes: u64,
}

/// Cumulative counters across all runs — the only struct persisted to disk
/// (§3, `<cacheDir>/stats.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumulativeStats {
    pub total_runs: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retries: u64,
    pub rate_limits: u64,
    pub bytes: u64,
}

struct Inner {
    cumulative: CumulativeStats,
    current: Option<RunStats>,
    next_seq: u64,
}

/// The Statistics Tracker (C11), owned by the Run Controller for the process
/// lifetime.
pub struct StatisticsTracker {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl StatisticsTracker {
    /// Best-effort load of `<cacheDir>/stats.json`; a missing or malformed
    /// file yields zeroed cumulative stats.
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join("stats.json");
        let cumulative = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        StatisticsTracker {
            path,
            inner: Mutex::new(Inner {
                cumulative,
                current: None,
                next_seq: 0,
            }),
        }
    }

    /// Open a new run, returning its `run_id`. If a previous run is still
    /// open, it is finalized first so its elapsed time is not lost (§4.11).
    pub fn start_run(&self, operation_type: impl Into<String>) -> String {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.current.take() {
            Self::fold_into_cumulative(&mut inner.cumulative, &previous);
        }
        let now = Utc::now();
        inner.next_seq += 1;
        let run_id = format!(
            "{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            now.timestamp_subsec_nanos() as u64 * 1000 + inner.next_seq
        );
        inner.current = Some(RunStats::new(run_id.clone(), operation_type.into()));
        run_id
    }

    pub fn record_downloaded(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        if let Some(run) = inner.current.as_mut() {
            run.downloaded += 1;
            run.bytes += bytes;
        }
    }

    pub fn record_failed(&self) {
        if let Some(run) = self.inner.lock().current.as_mut() {
            run.failed += 1;
        }
    }

    pub fn record_skipped(&self) {
        if let Some(run) = self.inner.lock().current.as_mut() {
            run.skipped += 1;
        }
    }

    pub fn record_retry(&self) {
        if let Some(run) = self.inner.lock().current.as_mut() {
            run.retries += 1;
        }
    }

    pub fn record_rate_limit(&self) {
        if let Some(run) = self.inner.lock().current.as_mut() {
            run.rate_limits += 1;
        }
    }

    /// Finalize the run named `run_id`. Returns `None` (a no-op) if it does
    /// not match the currently open run — the guard against stale
    /// finalization from a superseded run (§9).
    pub fn end_run_by_id(&self, run_id: &str) -> Option<FinalizedRun> {
        let mut inner = self.inner.lock();
        if inner.current.as_ref().map(|r| r.run_id.as_str()) != Some(run_id) {
            return None;
        }
        let run = inner.current.take().unwrap();
        let finalized = Self::finalize(&run);
        Self::fold_into_cumulative(&mut inner.cumulative, &run);
        let _ = self.save(&inner.cumulative);
        Some(finalized)
    }

    fn finalize(run: &RunStats) -> FinalizedRun {
        let elapsed_secs = (Utc::now() - run.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let tracks_per_hour = if elapsed_secs > 0.0 {
            run.downloaded as f64 * 3600.0 / elapsed_secs
        } else {
            0.0
        };
        let attempted = run.downloaded + run.failed;
        let success_rate = if attempted > 0 {
            run.downloaded as f64 / attempted as f64 * 100.0
        } else {
            0.0
        };
        FinalizedRun {
            run_id: run.run_id.clone(),
            operation_type: run.operation_type.clone(),
            elapsed_secs,
            tracks_per_hour,
            success_rate,
            downloaded: run.downloaded,
            failed: run.failed,
            skipped: run.skipped,
            retries: run.retries,
            rate_limits: run.rate_limits,
            bytes: run.bytes,
        }
    }

    fn fold_into_cumulative(cumulative: &mut CumulativeStats, run: &RunStats) {
        cumulative.total_runs += 1;
        cumulative.downloaded += run.downloaded;
        cumulative.failed += run.failed;
        cumulative.skipped += run.skipped;
        cumulative.retries += run.retries;
        cumulative.rate_limits += run.rate_limits;
        cumulative.bytes += run.bytes;
    }

    pub fn cumulative(&self) -> CumulativeStats {
        self.inner.lock().cumulative.clone()
    }

    /// Zero the cumulative struct; does not touch an in-flight run (§4.11).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.cumulative = CumulativeStats::default();
        let _ = self.save(&inner.cumulative);
    }

    fn save(&self, cumulative: &CumulativeStats) -> crate::error::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(cumulative)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}
