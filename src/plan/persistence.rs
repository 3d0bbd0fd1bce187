//! Plan Persistence (C8, §4.7).
//!
//! Serializes a [`DownloadPlan`] to the canonical JSON shape and reloads it
//! by config hash, refusing to run a plan generated from a different
//! configuration. Tracks, playlists, albums, and their M3Us round-trip
//! (§9 Design Notes); artist containers are generator-time structure only —
//! their albums persist as standalone `albums` entries, re-parented to the
//! artist only for the duration of the generating run.

use crate::error::{Error, Result};
use crate::plan::model::{DownloadPlan, ItemType, PlanItem, PlanMetadata, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedDownload {
    id: String,
    youtube_url: Option<String>,
    spotify_uri: Option<String>,
    spotify_metadata: Option<Value>,
    youtube_metadata: Option<Value>,
    output_path: Option<String>,
    status: String,
    source_context: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedPlaylist {
    id: String,
    name: String,
    source_url: String,
    create_m3u: bool,
    track_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedAlbum {
    id: String,
    name: String,
    source_url: String,
    #[serde(default)]
    create_m3u: bool,
    track_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedM3u {
    id: String,
    name: String,
    parent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedPlan {
    config_hash: String,
    config_file: String,
    generated_at: DateTime<Utc>,
    total_tracks: usize,
    estimated_size_mb: Option<f64>,
    downloads: Vec<PersistedDownload>,
    playlists: Vec<PersistedPlaylist>,
    #[serde(default)]
    albums: Vec<PersistedAlbum>,
    m3us: Vec<PersistedM3u>,
}

/// `<cacheDir>/download_plan_<hash>.json` (§6).
pub fn plan_file_path(cache_dir: &Path, hash: &str) -> PathBuf {
    cache_dir.join(format!("download_plan_{hash}.json"))
}

/// Write `plan` to `<cacheDir>/download_plan_<hash>.json`, creating the
/// cache directory if missing (§4.7).
pub fn save_plan(cache_dir: &Path, plan: &DownloadPlan) -> Result<()> {
    std::fs::create_dir_all(cache_dir)?;
    set_mode(cache_dir, 0o755)?;
    let persisted = to_persisted(plan);
    let bytes = serde_json::to_vec_pretty(&persisted)?;
    let path = plan_file_path(cache_dir, &plan.metadata.config_hash);
    std::fs::write(&path, &bytes)?;
    set_mode(&path, 0o644)?;
    Ok(())
}

/// Load the plan file named by `expected_hash`, failing with
/// [`Error::PlanNotFound`] if absent and [`Error::PlanHashMismatch`] if its
/// embedded hash disagrees.
pub fn load_plan(cache_dir: &Path, expected_hash: &str) -> Result<DownloadPlan> {
    let path = plan_file_path(cache_dir, expected_hash);
    if !path.exists() {
        return Err(Error::PlanNotFound(expected_hash.to_string()));
    }
    let bytes = std::fs::read(&path)?;
    let persisted: PersistedPlan = serde_json::from_slice(&bytes)?;
    if persisted.config_hash != expected_hash {
        return Err(Error::PlanHashMismatch {
            expected: expected_hash.to_string(),
            found: persisted.config_hash,
        });
    }
    Ok(from_persisted(persisted))
}

fn to_persisted(plan: &DownloadPlan) -> PersistedPlan {
    let mut downloads = Vec::new();
    let mut playlists = Vec::new();
    let mut albums = Vec::new();
    let mut m3us = Vec::new();

    for item in plan.iter() {
        match item.item_type {
            ItemType::Track => downloads.push(track_to_persisted(item)),
            ItemType::Playlist => playlists.push(playlist_to_persisted(plan, item)),
            ItemType::Album => albums.push(album_to_persisted(plan, item)),
            ItemType::M3u => {
                if let Some(parent_id) = &item.parent_id {
                    if plan
                        .get(parent_id)
                        .map(|p| matches!(p.item_type, ItemType::Playlist | ItemType::Album))
                        .unwrap_or(false)
                    {
                        m3us.push(PersistedM3u {
                            id: item.item_id.clone(),
                            name: item.name.clone(),
                            parent_id: parent_id.clone(),
                        });
                    }
                }
            }
            ItemType::Artist => {}
        }
    }

    PersistedPlan {
        config_hash: plan.metadata.config_hash.clone(),
        config_file: plan.metadata.config_file.clone(),
        generated_at: plan.metadata.generated_at,
        total_tracks: plan.metadata.total_tracks,
        estimated_size_mb: plan.metadata.estimated_size_mb,
        downloads,
        playlists,
        albums,
        m3us,
    }
}

fn track_to_persisted(item: &PlanItem) -> PersistedDownload {
    let snapshot = item.snapshot();
    let spotify_uri = item.spotify_id.as_ref().map(|id| format!("spotify:track:{id}"));
    let spotify_metadata = item.spotify_id.as_ref().map(|_| {
        json!({
            "name": item.name,
            "artists": snapshot.metadata.get("artists"),
            "album": snapshot.metadata.get("album"),
        })
    });
    let youtube_metadata = item.youtube_url.as_ref().map(|_| {
        json!({
            "name": item.name,
            "uploader": snapshot.metadata.get("uploader"),
            "spotify_enhancement": snapshot.metadata.get("spotify_enhancement"),
        })
    });
    let source_context = snapshot.metadata.get("source_name").cloned().map(|name| {
        json!({
            "source_name": name,
            "source_url": snapshot.metadata.get("source_url"),
        })
    });

    PersistedDownload {
        id: item.item_id.clone(),
        youtube_url: item.youtube_url.clone(),
        spotify_uri,
        spotify_metadata,
        youtube_metadata,
        output_path: snapshot.file_path,
        status: status_str(snapshot.status),
        source_context,
    }
}

fn playlist_to_persisted(plan: &DownloadPlan, item: &PlanItem) -> PersistedPlaylist {
    let source_url = item
        .metadata_get("source_url")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let track_ids = item
        .child_ids()
        .into_iter()
        .filter(|id| {
            plan.get(id)
                .map(|c| c.item_type == ItemType::Track)
                .unwrap_or(false)
        })
        .collect();
    PersistedPlaylist {
        id: item.item_id.clone(),
        name: item.name.clone(),
        source_url,
        create_m3u: true,
        track_ids,
    }
}

fn album_to_persisted(plan: &DownloadPlan, item: &PlanItem) -> PersistedAlbum {
    let source_url = item
        .metadata_get("source_url")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let mut track_ids = Vec::new();
    let mut create_m3u = false;
    for child_id in item.child_ids() {
        match plan.get(&child_id).map(|c| c.item_type) {
            Some(ItemType::Track) => track_ids.push(child_id),
            Some(ItemType::M3u) => create_m3u = true,
            _ => {}
        }
    }
    PersistedAlbum {
        id: item.item_id.clone(),
        name: item.name.clone(),
        source_url,
        create_m3u,
        track_ids,
    }
}

fn status_str(status: Status) -> String {
    match status {
        Status::Pending => "pending",
        Status::InProgress => "in_progress",
        Status::Completed => "completed",
        Status::Failed => "failed",
        Status::Skipped => "skipped",
    }
    .to_string()
}

/// Parse a lifecycle status string, mapping the legacy `"metadata_only"`
/// value to `skipped` (§4.7, §9 open question: preserved as-is).
fn parse_status(raw: &str) -> Status {
    match raw {
        "pending" => Status::Pending,
        "in_progress" => Status::InProgress,
        "completed" => Status::Completed,
        "failed" => Status::Failed,
        "skipped" | "metadata_only" => Status::Skipped,
        _ => Status::Pending,
    }
}

fn apply_status(item: &PlanItem, status: Status, output_path: Option<String>) {
    match status {
        Status::Completed => item.mark_completed(output_path.unwrap_or_default()),
        Status::Failed => item.mark_failed("loaded as failed from plan file"),
        Status::Skipped => item.mark_skipped(),
        Status::InProgress | Status::Pending => {
            if let Some(path) = output_path {
                item.set_metadata("output_path", json!(path));
            }
        }
    }
}

fn metadata_name(meta: &Option<Value>) -> Option<String> {
    meta.as_ref()
        .and_then(|v| v.get("name"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn from_persisted(persisted: PersistedPlan) -> DownloadPlan {
    let metadata = PlanMetadata {
        config_hash: persisted.config_hash,
        config_file: persisted.config_file,
        generated_at: persisted.generated_at,
        total_tracks: persisted.total_tracks,
        estimated_size_mb: persisted.estimated_size_mb,
    };
    let mut plan = DownloadPlan::new(metadata);

    let mut track_parent: HashMap<String, String> = HashMap::new();
    for pl in &persisted.playlists {
        for tid in &pl.track_ids {
            track_parent.insert(tid.clone(), pl.id.clone());
        }
    }
    for al in &persisted.albums {
        for tid in &al.track_ids {
            track_parent.insert(tid.clone(), al.id.clone());
        }
    }

    for d in persisted.downloads {
        let status = parse_status(&d.status);
        let name = metadata_name(&d.spotify_metadata)
            .or_else(|| metadata_name(&d.youtube_metadata))
            .unwrap_or_else(|| d.id.clone());

        let mut item = PlanItem::new(d.id.clone(), ItemType::Track, name);
        if let Some(parent) = track_parent.get(&d.id) {
            item = item.with_parent(parent.clone());
        }
        if let Some(uri) = &d.spotify_uri {
            if let Some(id) = uri.rsplit(':').next() {
                item = item.with_spotify_id(id.to_string());
            }
        }
        if let Some(url) = &d.youtube_url {
            item = item.with_youtube_url(url.clone());
        }
        if let Some(meta) = &d.spotify_metadata {
            if let Some(obj) = meta.as_object() {
                for (k, v) in obj {
                    if k != "name" {
                        item.set_metadata(k.clone(), v.clone());
                    }
                }
            }
        }
        if let Some(meta) = &d.youtube_metadata {
            if let Some(obj) = meta.as_object() {
                for (k, v) in obj {
                    if k != "name" {
                        item.set_metadata(k.clone(), v.clone());
                    }
                }
            }
        }
        if let Some(ctx) = d.source_context {
            if let Some(obj) = ctx.as_object() {
                for (k, v) in obj {
                    item.set_metadata(k.clone(), v.clone());
                }
            }
        }
        apply_status(&item, status, d.output_path);
        plan.insert(item);
    }

    for pl in &persisted.playlists {
        let playlist_item = PlanItem::new(pl.id.clone(), ItemType::Playlist, pl.name.clone());
        playlist_item.set_metadata("source_url", json!(pl.source_url));
        playlist_item.set_children(pl.track_ids.clone());
        plan.insert(playlist_item);
    }

    for al in &persisted.albums {
        let album_item = PlanItem::new(al.id.clone(), ItemType::Album, al.name.clone());
        album_item.set_metadata("source_url", json!(al.source_url));
        album_item.set_children(al.track_ids.clone());
        plan.insert(album_item);
    }

    for m in &persisted.m3us {
        let m3u_item = PlanItem::new(m.id.clone(), ItemType::M3u, m.name.clone()).with_parent(m.parent_id.clone());
        plan.insert(m3u_item);
        if let Some(parent) = plan.get(&m.parent_id) {
            parent.add_child(m.id.clone());
        }
    }

    plan
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_config_bytes;

    fn sample_plan(hash: &str) -> DownloadPlan {
        let metadata = PlanMetadata {
            config_hash: hash.to_string(),
            config_file: "config.toml".into(),
            generated_at: Utc::now(),
            total_tracks: 1,
            estimated_size_mb: None,
        };
        let mut plan = DownloadPlan::new(metadata);
        plan.insert(PlanItem::new("playlist:p1", ItemType::Playlist, "My Playlist"));
        plan.get("playlist:p1").unwrap().set_metadata("source_url", json!("https://open.spotify.com/playlist/p1"));

        let track = PlanItem::new("track:t1", ItemType::Track, "Song")
            .with_parent("playlist:p1")
            .with_spotify_id("t1");
        track.set_metadata("artists", json!(["Artist"]));
        track.mark_completed("/out/song.mp3");
        plan.insert(track);
        plan.get("playlist:p1").unwrap().set_children(vec!["track:t1".into()]);

        let m3u = PlanItem::new("m3u:p1", ItemType::M3u, "My Playlist (M3U)").with_parent("playlist:p1");
        plan.insert(m3u);
        plan.get("playlist:p1").unwrap().add_child("m3u:p1");

        plan
    }

    #[test]
    fn save_then_load_round_trips_tracks_playlists_and_m3us() {
        let dir = tempfile::tempdir().unwrap();
        let hash = hash_config_bytes(b"some config bytes");
        let plan = sample_plan(&hash);
        save_plan(dir.path(), &plan).unwrap();

        let loaded = load_plan(dir.path(), &hash).unwrap();
        assert_eq!(loaded.metadata.config_hash, hash);
        assert!(loaded.contains("track:t1"));
        assert_eq!(loaded.get("track:t1").unwrap().status(), Status::Completed);
        assert_eq!(
            loaded.get("playlist:p1").unwrap().child_ids(),
            vec!["track:t1".to_string(), "m3u:p1".to_string()]
        );
        assert_eq!(loaded.get("m3u:p1").unwrap().parent_id.as_deref(), Some("playlist:p1"));
    }

    #[test]
    fn load_missing_plan_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_plan(dir.path(), "deadbeefdeadbeef").unwrap_err();
        assert!(matches!(err, Error::PlanNotFound(_)));
    }

    #[test]
    fn load_with_wrong_hash_is_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan("aaaaaaaaaaaaaaaa");
        save_plan(dir.path(), &plan).unwrap();
        // Rename so `load_plan` is asked for a hash that doesn't match the
        // file's embedded config_hash despite being found at that path.
        let wrong_path = plan_file_path(dir.path(), "bbbbbbbbbbbbbbbb");
        std::fs::rename(plan_file_path(dir.path(), "aaaaaaaaaaaaaaaa"), &wrong_path).unwrap();

        let err = load_plan(dir.path(), "bbbbbbbbbbbbbbbb").unwrap_err();
        assert!(matches!(err, Error::PlanHashMismatch { .. }));
    }

    #[test]
    fn legacy_metadata_only_status_maps_to_skipped() {
        assert_eq!(parse_status("metadata_only"), Status::Skipped);
    }

    #[test]
    fn save_then_load_round_trips_an_album_and_its_m3u() {
        let dir = tempfile::tempdir().unwrap();
        let hash = hash_config_bytes(b"album config bytes");
        let metadata = PlanMetadata {
            config_hash: hash.clone(),
            config_file: "config.toml".into(),
            generated_at: Utc::now(),
            total_tracks: 1,
            estimated_size_mb: None,
        };
        let mut plan = DownloadPlan::new(metadata);
        plan.insert(PlanItem::new("album:a1", ItemType::Album, "My Album"));
        plan.get("album:a1")
            .unwrap()
            .set_metadata("source_url", json!("https://open.spotify.com/album/a1"));

        let track = PlanItem::new("track:t1", ItemType::Track, "Song")
            .with_parent("album:a1")
            .with_spotify_id("t1");
        track.mark_completed("/out/song.mp3");
        plan.insert(track);
        plan.get("album:a1").unwrap().add_child("track:t1");

        let m3u = PlanItem::new("m3u:album:a1", ItemType::M3u, "My Album (M3U)").with_parent("album:a1");
        plan.insert(m3u);
        plan.get("album:a1").unwrap().add_child("m3u:album:a1");

        save_plan(dir.path(), &plan).unwrap();
        let loaded = load_plan(dir.path(), &hash).unwrap();

        let album = loaded.get("album:a1").unwrap();
        assert_eq!(album.child_ids(), vec!["track:t1".to_string(), "m3u:album:a1".to_string()]);
        assert_eq!(loaded.get("m3u:album:a1").unwrap().parent_id.as_deref(), Some("album:a1"));
        assert_eq!(loaded.get("track:t1").unwrap().parent_id.as_deref(), Some("album:a1"));
    }
}
