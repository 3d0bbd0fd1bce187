//! Resume State (C10, §4.10).
//!
//! Durable record of which track items have already completed or failed
//! across prior runs, so a subsequent `download` can skip what's already
//! done. Writes are batched — every 10 completions plus a final flush — so a
//! long run doesn't serialize its state on every single item.

use crate::error::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const FLUSH_EVERY: usize = 10;

/// Why a track item failed, recorded for later retry (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItemInfo {
    pub url: String,
    pub name: String,
    pub error: String,
    pub attempts: u32,
    pub last_attempt_unix: i64,
    pub retryable: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    #[serde(rename = "completedItems")]
    completed_items: HashSet<String>,
    #[serde(rename = "failedItems")]
    failed_items: HashMap<String, FailedItemInfo>,
    #[serde(rename = "totalItems")]
    total_items: usize,
}

struct Inner {
    data: Persisted,
    writes_since_flush: usize,
}

/// Durable resume state (§3, §4.10). One instance is owned by the Run
/// Controller for the process lifetime.
pub struct ResumeState {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl ResumeState {
    /// Best-effort load from `<cacheDir>/resume_state.json`: a missing or
    /// malformed file yields empty state rather than an error (§4.10).
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join("resume_state.json");
        let data = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        ResumeState {
            path,
            inner: Mutex::new(Inner {
                data,
                writes_since_flush: 0,
            }),
        }
    }

    pub fn set_total(&self, total: usize) {
        self.inner.lock().data.total_items = total;
    }

    pub fn is_completed(&self, item_id: &str) -> bool {
        self.inner.lock().data.completed_items.contains(item_id)
    }

    /// Moves `item_id` from the failed map to the completed set (§4.10) and
    /// flushes every [`FLUSH_EVERY`] completions.
    pub fn mark_completed(&self, item_id: &str) -> Result<()> {
        let mut should_flush = false;
        {
            let mut inner = self.inner.lock();
            inner.data.failed_items.remove(item_id);
            inner.data.completed_items.insert(item_id.to_string());
            inner.writes_since_flush += 1;
            if inner.writes_since_flush >= FLUSH_EVERY {
                inner.writes_since_flush = 0;
                should_flush = true;
            }
        }
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    pub fn mark_failed(&self, item_id: &str, url: &str, name: &str, error: &str, retryable: bool) {
        let mut inner = self.inner.lock();
        let attempts = inner
            .data
            .failed_items
            .get(item_id)
            .map(|info| info.attempts + 1)
            .unwrap_or(1);
        inner.data.failed_items.insert(
            item_id.to_string(),
            FailedItemInfo {
                url: url.to_string(),
                name: name.to_string(),
                error: error.to_string(),
                attempts,
                last_attempt_unix: Utc::now().timestamp(),
                retryable,
            },
        );
    }

    /// `(completed_count, failed_count, total_items)` (§4.10 `get_status`).
    pub fn get_status(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (
            inner.data.completed_items.len(),
            inner.data.failed_items.len(),
            inner.data.total_items,
        )
    }

    pub fn completed_ids(&self) -> HashSet<String> {
        self.inner.lock().data.completed_items.clone()
    }

    /// Failed items whose recorded error was classified as retryable.
    pub fn retryable_errors(&self) -> HashMap<String, FailedItemInfo> {
        self.inner
            .lock()
            .data
            .failed_items
            .iter()
            .filter(|(_, info)| info.retryable)
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect()
    }

    pub fn clear(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.data.completed_items.clear();
            inner.data.failed_items.clear();
            inner.writes_since_flush = 0;
        }
        self.flush()
    }

    /// Write current state to disk now, regardless of the batching counter.
    /// Persistence errors are logged by the caller (§7) and never fail a run.
    pub fn flush(&self) -> Result<()> {
        let bytes = {
            let inner = self.inner.lock();
            serde_json::to_vec_pretty(&inner.data)?
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}
