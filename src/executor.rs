//! Plan Executor (C9, §4.8) and container status roll-up (§4.9).
//!
//! Dispatches track items in plan order through a bounded worker pool, tags
//! each completed file (§4.16), then writes M3U files for completed
//! playlists/albums that asked for one and recomputes every container's
//! status bottom-up. Cancellation is cooperative: a worker finishes its
//! current download, then checks the token before picking up the next item.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::logbus::LogBus;
use crate::metadata;
use crate::plan::model::{recompute_container, DownloadPlan, ItemType, Status};
use crate::ports::audio::{AudioProviderPort, DownloadRequest, DownloadSource};
use crate::ports::spotify::SpotifyPort;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Aggregate counts over the track items dispatched by one [`execute`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionSummary {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
}

/// Per-item terminal-transition callback, invoked synchronously by whichever
/// worker produced the transition (§4.8).
pub type ItemCallback = Arc<dyn Fn(&str, Status, Option<u64>) + Send + Sync>;

/// The Plan Executor (C9). Owns the shutdown token for one `execute` call;
/// the Run Controller holds a clone to request cooperative cancellation.
pub struct Executor {
    audio: Arc<dyn AudioProviderPort>,
    spotify: Arc<dyn SpotifyPort>,
    log: LogBus,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(audio: Arc<dyn AudioProviderPort>, spotify: Arc<dyn SpotifyPort>, log: LogBus) -> Self {
        Executor {
            audio,
            spotify,
            log,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build an executor whose shutdown token is linked to an external one
    /// (typically the Run Controller's own cancellation token), so that
    /// cancelling the external token stops in-flight workers directly rather
    /// than only gating the next `execute` call.
    pub fn with_shutdown(
        audio: Arc<dyn AudioProviderPort>,
        spotify: Arc<dyn SpotifyPort>,
        log: LogBus,
        shutdown: CancellationToken,
    ) -> Self {
        Executor { audio, spotify, log, shutdown }
    }

    /// Ask in-flight and not-yet-started work to stop after its current item.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until either shutdown completes or `timeout` elapses.
    pub async fn wait_for_shutdown(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.shutdown.cancelled())
            .await
            .is_ok()
    }

    /// Run every pending track item in `plan` through the worker pool, then
    /// emit M3Us and roll up container statuses (§4.8, §4.9).
    pub async fn execute(
        &self,
        plan: &DownloadPlan,
        settings: &Settings,
        on_item: Option<ItemCallback>,
    ) -> Result<ExecutionSummary> {
        let workers = settings.max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let completed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        let skipped = Arc::new(AtomicU64::new(0));
        let total = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for item in plan.tracks() {
            if item.status().is_terminal() {
                if item.status() == Status::Skipped {
                    skipped.fetch_add(1, Ordering::Relaxed);
                }
                total.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            total.fetch_add(1, Ordering::Relaxed);

            let item = Arc::clone(item);
            let audio = Arc::clone(&self.audio);
            let spotify = Arc::clone(&self.spotify);
            let log = self.log.clone();
            let shutdown = self.shutdown.clone();
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let failed = Arc::clone(&failed);
            let output_dir = settings.output_dir.clone();
            let format = settings.format.clone();
            let bitrate = settings.bitrate.clone();
            let timeout_secs = settings.timeout_secs;
            let no_tag = settings.no_tag;
            let on_item = on_item.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };

                if shutdown.is_cancelled() {
                    item.mark_failed("cancelled before start");
                    failed.fetch_add(1, Ordering::Relaxed);
                    if let Some(cb) = &on_item {
                        cb(&item.item_id, item.status(), None);
                    }
                    return;
                }

                item.mark_started();
                log.info("executor", format!("downloading '{}'", item.name));

                let request = build_request(&item, &output_dir, &format, &bitrate);
                let outcome = tokio::time::timeout(
                    std::time::Duration::from_secs(timeout_secs),
                    audio.download(request),
                )
                .await;

                match outcome {
                    Ok(Ok(result)) if result.success => {
                        let path = result.final_file_path.unwrap_or_default();
                        item.mark_completed(path);
                        completed.fetch_add(1, Ordering::Relaxed);
                        log.info("executor", format!("completed '{}'", item.name));
                        if !no_tag {
                            if let Err(e) = metadata::embed_tags(&item, &*spotify).await {
                                log.warn("executor", format!("tagging '{}' failed: {e}", item.name));
                            }
                        }
                    }
                    Ok(Ok(result)) => {
                        let message = result.error.unwrap_or_else(|| "download failed".to_string());
                        item.mark_failed(message.clone());
                        failed.fetch_add(1, Ordering::Relaxed);
                        log.warn("executor", format!("failed '{}': {message}", item.name));
                    }
                    Ok(Err(e)) => {
                        item.mark_failed(e.to_string());
                        failed.fetch_add(1, Ordering::Relaxed);
                        log.warn("executor", format!("failed '{}': {e}", item.name));
                    }
                    Err(_) => {
                        item.mark_failed("download timed out");
                        failed.fetch_add(1, Ordering::Relaxed);
                        log.warn("executor", format!("timed out '{}'", item.name));
                    }
                }

                let bytes = match std::fs::metadata(item.file_path().unwrap_or_default()) {
                    Ok(meta) => Some(meta.len()),
                    Err(_) => None,
                };
                if let Some(cb) = &on_item {
                    cb(&item.item_id, item.status(), bytes);
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }

        write_m3us(plan, &settings.output_dir)?;
        rollup_all_containers(plan);

        Ok(ExecutionSummary {
            completed: completed.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
            total: total.load(Ordering::Relaxed),
        })
    }
}

fn build_request(
    item: &crate::plan::model::PlanItem,
    output_dir: &str,
    format: &str,
    bitrate: &str,
) -> DownloadRequest {
    let source = if let Some(url) = &item.youtube_url {
        match crate::url::classify(url, crate::url::UrlSlot::Song) {
            Some(crate::url::Classified::YoutubeVideo(id)) => DownloadSource::VideoId(id),
            _ => DownloadSource::SearchQuery(item.name.clone()),
        }
    } else {
        let artist = item
            .metadata_get("spotify_enhancement")
            .and_then(|v| v.get("album_artist").cloned())
            .or_else(|| {
                item.metadata_get("artists")
                    .and_then(|v| v.as_array().and_then(|a| a.first().cloned()))
            })
            .and_then(|v| v.as_str().map(String::from));
        let query = match artist {
            Some(a) => format!("track:{} artist:{}", item.name, a),
            None => format!("track:{}", item.name),
        };
        DownloadSource::SearchQuery(query)
    };

    let stem = sanitize_filename(&item.name);
    DownloadRequest {
        source,
        output_stem: PathBuf::from(output_dir).join(stem),
        format: format.to_string(),
        bitrate: bitrate.to_string(),
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if "/\\:*?\"<>|".contains(c) { '_' } else { c })
        .collect()
}

/// Write `#EXTM3U` files for every playlist/album whose M3U item has at
/// least one completed or skipped track child (§4.8). Containers without a
/// matching M3U child are left untouched. An M3U item is not a rollup
/// container: it has no children of its own, so its status is set directly
/// here rather than through [`recompute_container`] — `completed` if the
/// file was written, `skipped` otherwise.
fn write_m3us(plan: &DownloadPlan, output_dir: &str) -> Result<()> {
    for item in plan.iter() {
        if item.item_type != ItemType::M3u {
            continue;
        }
        let Some(parent_id) = &item.parent_id else { continue };
        let Some(parent) = plan.get(parent_id) else { continue };

        let mut lines = vec!["#EXTM3U".to_string()];
        for child_id in parent.child_ids() {
            let Some(child) = plan.get(&child_id) else { continue };
            if child.item_type != ItemType::Track {
                continue;
            }
            if matches!(child.status(), Status::Completed | Status::Skipped) {
                if let Some(path) = child.file_path() {
                    lines.push(format!("#EXTINF:-1,{}", child.name));
                    lines.push(path);
                }
            }
        }
        if lines.len() == 1 {
            item.mark_skipped();
            continue;
        }

        let path = Path::new(output_dir).join(sanitize_filename(&item.name)).with_extension("m3u");
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, lines.join("\n") + "\n")?;
        item.set_metadata("output_path", serde_json::json!(path.to_string_lossy()));
        item.mark_completed(path.to_string_lossy().to_string());
    }
    Ok(())
}

/// Recompute every playlist/album/artist container's status bottom-up (§4.9).
/// M3U items are not rollup containers — [`write_m3us`] sets their status
/// directly — so they're excluded here and never contribute an empty
/// children slice that would otherwise force their parent to `failed`.
fn rollup_all_containers(plan: &DownloadPlan) {
    for item in plan.iter() {
        if matches!(item.item_type, ItemType::Album | ItemType::Playlist) {
            recompute_container(plan, item);
        }
    }
    for item in plan.iter() {
        if item.item_type == ItemType::Artist {
            recompute_container(plan, item);
        }
    }
}

/// Whether any track in the plan ended in [`Status::Failed`] — used by the
/// Run Controller to surface [`Error::PartialFailure`] (§4.13).
pub fn has_partial_failure(plan: &DownloadPlan) -> bool {
    plan.tracks().any(|t| t.status() == Status::Failed)
}

pub fn partial_failure_error(plan: &DownloadPlan) -> Option<Error> {
    let total = plan.tracks().count();
    let failed = plan.tracks().filter(|t| t.status() == Status::Failed).count();
    if failed > 0 {
        Some(Error::PartialFailure { failed, total })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::model::{PlanItem, PlanMetadata};
    use crate::ports::audio::{DownloadOutcome, PlaylistInfo, VideoMetadata};
    use crate::ports::spotify::{
        Album, Artist, Page, Playlist, PlaylistTrackEntry, RateLimitInfo, SearchType, SimplifiedAlbum,
        SimplifiedTrack, Track,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct UnusedSpotify;
    #[async_trait]
    impl SpotifyPort for UnusedSpotify {
        async fn get_track(&self, _id: &str) -> Result<Track> {
            unreachable!()
        }
        async fn get_album(&self, _id: &str) -> Result<Album> {
            unreachable!()
        }
        async fn get_artist(&self, _id: &str) -> Result<Artist> {
            unreachable!()
        }
        async fn get_playlist(&self, _id: &str) -> Result<Playlist> {
            unreachable!()
        }
        async fn get_artist_albums(&self, _id: &str, _cursor: Option<String>) -> Result<Page<SimplifiedAlbum>> {
            unreachable!()
        }
        async fn get_album_tracks(&self, _id: &str, _cursor: Option<String>) -> Result<Page<SimplifiedTrack>> {
            unreachable!()
        }
        async fn get_playlist_tracks(&self, _id: &str, _cursor: Option<String>) -> Result<Page<PlaylistTrackEntry>> {
            unreachable!()
        }
        async fn search(&self, _query: &str, _kind: SearchType, _limit: usize) -> Result<Vec<Track>> {
            unreachable!()
        }
        async fn get_rate_limit_info(&self) -> Result<RateLimitInfo> {
            unreachable!()
        }
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl AudioProviderPort for AlwaysSucceeds {
        async fn get_video_metadata(&self, _url: &str) -> Result<VideoMetadata> {
            unimplemented!()
        }
        async fn get_playlist_info(&self, _url: &str) -> Result<PlaylistInfo> {
            unimplemented!()
        }
        async fn download(&self, request: DownloadRequest) -> Result<DownloadOutcome> {
            let path = request.output_stem.with_extension(&request.format);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"fake audio").unwrap();
            Ok(DownloadOutcome {
                success: true,
                final_file_path: Some(path.to_string_lossy().to_string()),
                error: None,
            })
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl AudioProviderPort for AlwaysFails {
        async fn get_video_metadata(&self, _url: &str) -> Result<VideoMetadata> {
            unimplemented!()
        }
        async fn get_playlist_info(&self, _url: &str) -> Result<PlaylistInfo> {
            unimplemented!()
        }
        async fn download(&self, _request: DownloadRequest) -> Result<DownloadOutcome> {
            Ok(DownloadOutcome {
                success: false,
                final_file_path: None,
                error: Some("no match".to_string()),
            })
        }
    }

    fn meta() -> PlanMetadata {
        PlanMetadata {
            config_hash: "abc".into(),
            config_file: "config.toml".into(),
            generated_at: Utc::now(),
            total_tracks: 0,
            estimated_size_mb: None,
        }
    }

    #[tokio::test]
    async fn completed_tracks_populate_playlist_m3u_and_rollup() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = DownloadPlan::new(meta());
        plan.insert(PlanItem::new("playlist:p1", ItemType::Playlist, "My Playlist"));
        plan.insert(PlanItem::new("track:t1", ItemType::Track, "Song One").with_parent("playlist:p1"));
        plan.insert(PlanItem::new("m3u:p1", ItemType::M3u, "My Playlist (M3U)").with_parent("playlist:p1"));
        plan.get("playlist:p1")
            .unwrap()
            .set_children(vec!["track:t1".into(), "m3u:p1".into()]);

        let mut settings = Settings::default();
        settings.output_dir = dir.path().to_string_lossy().to_string();
        settings.max_workers = 2;
        settings.no_tag = true;

        let executor = Executor::new(Arc::new(AlwaysSucceeds), Arc::new(UnusedSpotify), LogBus::new());
        let summary = executor.execute(&plan, &settings, None).await.unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.total, 1);
        assert_eq!(plan.get("playlist:p1").unwrap().status(), Status::Completed);
        assert!(dir.path().join("My Playlist (M3U).m3u").exists());
    }

    #[tokio::test]
    async fn failed_track_rolls_container_up_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = DownloadPlan::new(meta());
        plan.insert(PlanItem::new("album:a1", ItemType::Album, "Album"));
        plan.insert(PlanItem::new("track:t1", ItemType::Track, "Song").with_parent("album:a1"));
        plan.get("album:a1").unwrap().set_children(vec!["track:t1".into()]);

        let mut settings = Settings::default();
        settings.output_dir = dir.path().to_string_lossy().to_string();

        let executor = Executor::new(Arc::new(AlwaysFails), Arc::new(UnusedSpotify), LogBus::new());
        let summary = executor.execute(&plan, &settings, None).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(plan.get("album:a1").unwrap().status(), Status::Failed);
        assert!(has_partial_failure(&plan));
        assert!(partial_failure_error(&plan).is_some());
    }

    #[tokio::test]
    async fn terminal_items_are_skipped_by_the_worker_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = DownloadPlan::new(meta());
        let item = PlanItem::new("track:t1", ItemType::Track, "Song");
        item.mark_skipped();
        plan.insert(item);

        let mut settings = Settings::default();
        settings.output_dir = dir.path().to_string_lossy().to_string();

        let executor = Executor::new(Arc::new(AlwaysFails), Arc::new(UnusedSpotify), LogBus::new());
        let summary = executor.execute(&plan, &settings, None).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn item_callback_fires_once_per_terminal_transition() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = DownloadPlan::new(meta());
        plan.insert(PlanItem::new("track:t1", ItemType::Track, "Song"));

        let mut settings = Settings::default();
        settings.output_dir = dir.path().to_string_lossy().to_string();
        settings.no_tag = true;

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback: ItemCallback = Arc::new(move |id, status, _bytes| {
            seen_clone.lock().unwrap().push((id.to_string(), status));
        });

        let executor = Executor::new(Arc::new(AlwaysSucceeds), Arc::new(UnusedSpotify), LogBus::new());
        executor.execute(&plan, &settings, Some(callback)).await.unwrap();

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("track:t1".to_string(), Status::Completed));
    }
}
