//! Plan Optimizer (C6, §4.6).
//!
//! Two deterministic passes over an already-built plan. Both run after the
//! generator and before the plan is persisted (§2 control flow: generate →
//! optimize → persist).

use crate::plan::model::{DownloadPlan, ItemType, Status};
use std::collections::HashMap;
use std::path::Path;

/// Pass 1: dedupe track items by non-empty `spotify_id`, keeping the first
/// occurrence in encounter order. Every non-track item's `child_ids` that
/// pointed at a removed duplicate is rewritten to point at the kept item
/// instead (never introducing a second reference, §4.6).
pub fn dedupe_tracks(plan: &mut DownloadPlan) {
    let mut first_seen: HashMap<String, String> = HashMap::new();
    let mut duplicates: Vec<(String, String)> = Vec::new();

    for item in plan.tracks() {
        let Some(spotify_id) = item.spotify_id.clone() else {
            continue;
        };
        match first_seen.get(&spotify_id) {
            Some(kept_id) => duplicates.push((item.item_id.clone(), kept_id.clone())),
            None => {
                first_seen.insert(spotify_id, item.item_id.clone());
            }
        }
    }

    if duplicates.is_empty() {
        return;
    }

    for container in plan.containers() {
        for (dup_id, kept_id) in &duplicates {
            if container.child_ids().iter().any(|c| c == dup_id) {
                container.replace_child(dup_id, kept_id);
            }
        }
    }

    for (dup_id, _) in &duplicates {
        plan.remove(dup_id);
    }
}

/// Pass 2 (optional, §4.6): for every pending track that already names a
/// `file_path`, mark it `skipped` with `progress = 1.0` if that path exists
/// on disk. Only pending items are considered.
pub fn mark_existing_files(plan: &DownloadPlan) {
    for item in plan.tracks() {
        if item.item_type != ItemType::Track || item.status() != Status::Pending {
            continue;
        }
        if let Some(path) = item.file_path() {
            if Path::new(&path).exists() {
                item.mark_skipped();
            }
        }
    }
}

/// Run both optimizer passes; `check_existing_files` gates pass 2 (§4.6, the
/// config's `Settings::check_existing_files`).
pub fn optimize(plan: &mut DownloadPlan, check_existing_files: bool) {
    dedupe_tracks(plan);
    if check_existing_files {
        mark_existing_files(plan);
    }
}
