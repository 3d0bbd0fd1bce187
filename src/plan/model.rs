//! Plan Model (C7, §3, §4.9).
//!
//! [`PlanItem`] is the only first-class entity of the plan DAG. All mutable
//! fields live behind a single per-item lock so that readers always observe
//! a consistent snapshot of (status, progress, error, file_path, timestamps,
//! metadata) — never a torn combination of an old status with a new error.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// The five lifecycle states of a [`PlanItem`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl Status {
    /// Terminal statuses are final for a given execution: once reached, an
    /// item never transitions again within the same run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Skipped)
    }
}

/// The type of a [`PlanItem`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Track,
    Album,
    Artist,
    Playlist,
    M3u,
}

impl ItemType {
    /// Non-track items are containers whose status rolls up from children (§4.9).
    pub fn is_container(self) -> bool {
        !matches!(self, ItemType::Track)
    }
}

/// A consistent point-in-time view of an item's mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub status: Status,
    pub progress: f32,
    pub error: Option<String>,
    pub file_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug)]
struct MutableState {
    status: Status,
    progress: f32,
    error: Option<String>,
    file_path: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    metadata: Map<String, Value>,
}

/// A node in the plan DAG (§3).
///
/// Identity, type, source provenance, display name, hierarchy, and creation
/// time are immutable once constructed; everything else lives behind
/// [`PlanItem`]'s internal lock.
#[derive(Debug)]
pub struct PlanItem {
    pub item_id: String,
    pub item_type: ItemType,
    pub spotify_id: Option<String>,
    pub spotify_url: Option<String>,
    pub youtube_url: Option<String>,
    pub name: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    child_ids: RwLock<Vec<String>>,
    state: RwLock<MutableState>,
}

impl PlanItem {
    /// Construct a new pending item with no children.
    pub fn new(item_id: impl Into<String>, item_type: ItemType, name: impl Into<String>) -> Self {
        PlanItem {
            item_id: item_id.into(),
            item_type,
            spotify_id: None,
            spotify_url: None,
            youtube_url: None,
            name: name.into(),
            parent_id: None,
            created_at: Utc::now(),
            child_ids: RwLock::new(Vec::new()),
            state: RwLock::new(MutableState {
                status: Status::Pending,
                progress: 0.0,
                error: None,
                file_path: None,
                started_at: None,
                completed_at: None,
                metadata: Map::new(),
            }),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_spotify_id(mut self, id: impl Into<String>) -> Self {
        self.spotify_id = Some(id.into());
        self
    }

    pub fn with_spotify_url(mut self, url: impl Into<String>) -> Self {
        self.spotify_url = Some(url.into());
        self
    }

    pub fn with_youtube_url(mut self, url: impl Into<String>) -> Self {
        self.youtube_url = Some(url.into());
        self
    }

    /// Construct an already-terminal synthetic `*:error:<name>` item (§4.5).
    pub fn new_error(item_id: impl Into<String>, item_type: ItemType, name: impl Into<String>, error: impl Into<String>) -> Self {
        let item = Self::new(item_id, item_type, name);
        item.mark_failed(error);
        item
    }

    // -- status transitions, strictly ordered by the item's own lock (§5) --

    pub fn mark_started(&self) {
        let mut s = self.state.write();
        if s.status.is_terminal() {
            return;
        }
        s.status = Status::InProgress;
        s.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&self, file_path: impl Into<String>) {
        let mut s = self.state.write();
        if s.status.is_terminal() {
            return;
        }
        s.status = Status::Completed;
        s.progress = 1.0;
        s.file_path = Some(file_path.into());
        s.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        let mut s = self.state.write();
        if s.status.is_terminal() {
            return;
        }
        s.status = Status::Failed;
        s.error = Some(error.into());
        s.completed_at = Some(Utc::now());
    }

    pub fn mark_skipped(&self) {
        let mut s = self.state.write();
        if s.status.is_terminal() {
            return;
        }
        s.status = Status::Skipped;
        s.progress = 1.0;
        s.completed_at = Some(Utc::now());
    }

    /// Used only by container roll-up (§4.9), which recomputes from children
    /// and is allowed to move a container between non-terminal-for-execution
    /// states (in_progress <-> completed/failed) as work proceeds.
    pub fn set_container_status(&self, status: Status) {
        let mut s = self.state.write();
        if s.status == status {
            return;
        }
        s.status = status;
        match status {
            Status::Completed | Status::Failed => {
                s.progress = 1.0;
                if s.completed_at.is_none() {
                    s.completed_at = Some(Utc::now());
                }
            }
            Status::InProgress => {
                s.progress = 0.0;
            }
            _ => {}
        }
    }

    pub fn set_progress(&self, progress: f32) {
        self.state.write().progress = progress.clamp(0.0, 1.0);
    }

    pub fn status(&self) -> Status {
        self.state.read().status
    }

    pub fn file_path(&self) -> Option<String> {
        self.state.read().file_path.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// A defensive, fully-owned copy of the mutable state (§3).
    pub fn snapshot(&self) -> ItemSnapshot {
        let s = self.state.read();
        ItemSnapshot {
            status: s.status,
            progress: s.progress,
            error: s.error.clone(),
            file_path: s.file_path.clone(),
            started_at: s.started_at,
            completed_at: s.completed_at,
            metadata: s.metadata.clone(),
        }
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.state.write().metadata.insert(key.into(), value);
    }

    pub fn metadata_get(&self, key: &str) -> Option<Value> {
        self.state.read().metadata.get(key).cloned()
    }

    pub fn metadata_snapshot(&self) -> Map<String, Value> {
        self.state.read().metadata.clone()
    }

    pub fn child_ids(&self) -> Vec<String> {
        self.child_ids.read().clone()
    }

    pub fn child_count(&self) -> usize {
        self.child_ids.read().len()
    }

    pub fn add_child(&self, child_id: impl Into<String>) {
        let child_id = child_id.into();
        let mut children = self.child_ids.write();
        if !children.contains(&child_id) {
            children.push(child_id);
        }
    }

    pub fn set_children(&self, children: Vec<String>) {
        *self.child_ids.write() = children;
    }

    /// Replace every occurrence of `old` in this item's children with `new`,
    /// without introducing a duplicate if `new` is already present (§4.6 pass 1).
    pub fn replace_child(&self, old: &str, new: &str) {
        let mut children = self.child_ids.write();
        let mut seen_new = children.iter().any(|c| c == new);
        let mut out = Vec::with_capacity(children.len());
        for c in children.drain(..) {
            if c == old {
                if !seen_new {
                    out.push(new.to_string());
                    seen_new = true;
                }
            } else {
                out.push(c);
            }
        }
        *children = out;
    }
}

/// Top-level metadata attached to a [`DownloadPlan`] (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub config_hash: String,
    pub config_file: String,
    pub generated_at: DateTime<Utc>,
    pub total_tracks: usize,
    pub estimated_size_mb: Option<f64>,
}

/// The plan DAG: an ordered collection of [`PlanItem`]s plus opaque metadata.
///
/// Order is preserved in encounter order because the executor dispatches
/// track items in plan order (§4.8). Items are reachable both by id (for
/// parent/child traversal) and via ordered iteration.
#[derive(Debug)]
pub struct DownloadPlan {
    pub metadata: PlanMetadata,
    items: Vec<Arc<PlanItem>>,
    index: HashMap<String, usize>,
}

impl DownloadPlan {
    pub fn new(metadata: PlanMetadata) -> Self {
        DownloadPlan {
            metadata,
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a new item. Returns `false` without modifying the plan if the
    /// id already exists.
    pub fn insert(&mut self, item: PlanItem) -> bool {
        if self.index.contains_key(&item.item_id) {
            return false;
        }
        let id = item.item_id.clone();
        self.index.insert(id, self.items.len());
        self.items.push(Arc::new(item));
        true
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.index.contains_key(item_id)
    }

    pub fn get(&self, item_id: &str) -> Option<&Arc<PlanItem>> {
        self.index.get(item_id).map(|&i| &self.items[i])
    }

    /// Remove an item entirely (used by the optimizer's track dedup pass).
    /// Does NOT repoint parents — callers must do that first.
    pub fn remove(&mut self, item_id: &str) -> Option<Arc<PlanItem>> {
        let idx = self.index.remove(item_id)?;
        let removed = self.items.remove(idx);
        for (_, i) in self.index.iter_mut() {
            if *i > idx {
                *i -= 1;
            }
        }
        Some(removed)
    }

    /// All items, in encounter order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PlanItem>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Track items only, in plan order — what the executor dispatches (§4.8).
    pub fn tracks(&self) -> impl Iterator<Item = &Arc<PlanItem>> {
        self.items.iter().filter(|i| i.item_type == ItemType::Track)
    }

    /// Container items (album / artist / playlist / m3u's playlist parent).
    pub fn containers(&self) -> impl Iterator<Item = &Arc<PlanItem>> {
        self.items.iter().filter(|i| i.item_type.is_container())
    }
}

/// Compute a container's status from its children's statuses (§4.9).
///
/// ```text
/// empty              -> failed
/// any pending/in_progress -> in_progress
/// all completed/skipped   -> completed
/// otherwise (a failure, none pending/in_progress) -> failed
/// ```
pub fn rollup_status(children: &[Status]) -> Status {
    if children.is_empty() {
        return Status::Failed;
    }
    if children
        .iter()
        .any(|s| matches!(s, Status::Pending | Status::InProgress))
    {
        return Status::InProgress;
    }
    if children
        .iter()
        .all(|s| matches!(s, Status::Completed | Status::Skipped))
    {
        return Status::Completed;
    }
    Status::Failed
}

/// Recompute and apply a container's status from its current children (§4.9).
///
/// Returns the new status so callers (the executor) can propagate the
/// recomputation up an ancestor chain.
pub fn recompute_container(plan: &DownloadPlan, container: &PlanItem) -> Status {
    let children: Vec<Status> = container
        .child_ids()
        .iter()
        .filter_map(|id| plan.get(id))
        .map(|item| item.status())
        .collect();
    let status = rollup_status(&children);
    container.set_container_status(status);
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> PlanMetadata {
        PlanMetadata {
            config_hash: "abc".into(),
            config_file: "config.toml".into(),
            generated_at: Utc::now(),
            total_tracks: 0,
            estimated_size_mb: None,
        }
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let mut plan = DownloadPlan::new(meta());
        assert!(plan.insert(PlanItem::new("track:1", ItemType::Track, "a")));
        assert!(!plan.insert(PlanItem::new("track:1", ItemType::Track, "b")));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn terminal_transitions_are_final_within_a_run() {
        let item = PlanItem::new("track:1", ItemType::Track, "a");
        item.mark_completed("/out/a.mp3");
        item.mark_failed("should not apply");
        assert_eq!(item.status(), Status::Completed);
        assert_eq!(item.file_path().as_deref(), Some("/out/a.mp3"));
    }

    #[test]
    fn rollup_empty_is_failed() {
        assert_eq!(rollup_status(&[]), Status::Failed);
    }

    #[test]
    fn rollup_in_progress_while_any_pending() {
        let got = rollup_status(&[Status::Completed, Status::Pending]);
        assert_eq!(got, Status::InProgress);
    }

    #[test]
    fn rollup_completed_when_all_completed_or_skipped() {
        let got = rollup_status(&[Status::Completed, Status::Skipped, Status::Completed]);
        assert_eq!(got, Status::Completed);
    }

    #[test]
    fn rollup_failed_when_a_failure_and_nothing_pending() {
        let got = rollup_status(&[Status::Completed, Status::Failed]);
        assert_eq!(got, Status::Failed);
    }

    #[test]
    fn replace_child_does_not_duplicate_existing_target() {
        let item = PlanItem::new("album:1", ItemType::Album, "a");
        item.set_children(vec!["track:dup".into(), "track:keep".into()]);
        item.replace_child("track:dup", "track:keep");
        assert_eq!(item.child_ids(), vec!["track:keep".to_string()]);
    }

    #[test]
    fn recompute_container_rolls_up_from_live_children() {
        let mut plan = DownloadPlan::new(meta());
        plan.insert(PlanItem::new("album:1", ItemType::Album, "Album").with_parent(""));
        plan.insert(PlanItem::new("track:1", ItemType::Track, "T1").with_parent("album:1"));
        plan.insert(PlanItem::new("track:2", ItemType::Track, "T2").with_parent("album:1"));
        plan.get("album:1").unwrap().set_children(vec!["track:1".into(), "track:2".into()]);

        plan.get("track:1").unwrap().mark_completed("/a");
        let status = recompute_container(&plan, plan.get("album:1").unwrap());
        assert_eq!(status, Status::InProgress);

        plan.get("track:2").unwrap().mark_completed("/b");
        let status = recompute_container(&plan, plan.get("album:1").unwrap());
        assert_eq!(status, Status::Completed);
    }
}
