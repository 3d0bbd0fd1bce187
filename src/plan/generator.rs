//! Plan Generator (C5, §4.5).
//!
//! Expands a [`Config`]'s four source lists into a [`DownloadPlan`] DAG,
//! deduplicating tracks/albums/artists/playlists as they're encountered and
//! best-effort enriching YouTube-sourced tracks with Spotify metadata
//! (§4.5.1). Construction-time failures never abort the whole run: a bad
//! source becomes a synthetic `*:error:<name>` item (§3, §7) and generation
//! continues with the next source.

use crate::config::{Config, SourceEntry};
use crate::error::{Error, Result};
use crate::logbus::LogBus;
use crate::plan::model::{DownloadPlan, ItemType, PlanItem, PlanMetadata};
use crate::ports::audio::AudioProviderPort;
use crate::ports::spotify::{
    Artist, PlaylistTrackItem, SearchType, SimplifiedTrack, SpotifyPort, Track,
};
use crate::url::{self, Classified, UrlSlot};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything the generator needs from the outside world: the two ports and
/// a cancellation token checked between pages (§4.5, §5).
pub struct GenerationContext {
    pub spotify: Arc<dyn SpotifyPort>,
    pub audio: Arc<dyn AudioProviderPort>,
    pub cancel: CancellationToken,
    pub log: LogBus,
}

/// Build a plan from `config` (§4.5). `config_hash`/`config_file` are carried
/// through unchanged into [`PlanMetadata`] for later persistence (§4.7).
pub async fn generate(
    config: &Config,
    config_hash: &str,
    config_file: &str,
    ctx: &GenerationContext,
) -> Result<DownloadPlan> {
    let metadata = PlanMetadata {
        config_hash: config_hash.to_string(),
        config_file: config_file.to_string(),
        generated_at: Utc::now(),
        total_tracks: 0,
        estimated_size_mb: None,
    };
    let mut generator = Generator {
        plan: DownloadPlan::new(metadata),
        seen_track_ids: HashSet::new(),
        seen_album_ids: HashSet::new(),
        seen_playlist_ids: HashSet::new(),
        seen_artist_ids: HashSet::new(),
        seen_youtube_video_ids: HashSet::new(),
        seen_youtube_playlist_ids: HashSet::new(),
        ctx,
    };

    for entry in &config.songs {
        if ctx.cancel.is_cancelled() {
            break;
        }
        generator.process_song(entry).await;
    }
    for entry in &config.artists {
        if ctx.cancel.is_cancelled() {
            break;
        }
        generator.process_artist(entry).await;
    }
    for entry in &config.playlists {
        if ctx.cancel.is_cancelled() {
            break;
        }
        generator.process_playlist(entry).await;
    }
    for entry in &config.albums {
        if ctx.cancel.is_cancelled() {
            break;
        }
        generator.process_album(entry).await;
    }

    let mut plan = generator.plan;
    plan.metadata.total_tracks = plan.tracks().count();
    Ok(plan)
}

struct Generator<'a> {
    plan: DownloadPlan,
    seen_track_ids: HashSet<String>,
    seen_album_ids: HashSet<String>,
    seen_playlist_ids: HashSet<String>,
    seen_artist_ids: HashSet<String>,
    seen_youtube_video_ids: HashSet<String>,
    seen_youtube_playlist_ids: HashSet<String>,
    ctx: &'a GenerationContext,
}

impl Generator<'_> {
    // ---- songs ----

    async fn process_song(&mut self, entry: &SourceEntry) {
        match url::classify(&entry.url, UrlSlot::Song) {
            Some(Classified::SpotifyTrack(id)) => self.process_song_spotify(entry, id).await,
            Some(Classified::YoutubeVideo(video_id)) => {
                self.process_song_youtube(entry, video_id).await
            }
            _ => self.insert_error_item(
                ItemType::Track,
                &entry.name,
                format!("unrecognized or unsupported song URL: {}", entry.url),
            ),
        }
    }

    async fn process_song_spotify(&mut self, entry: &SourceEntry, id: String) {
        if self.seen_track_ids.contains(&id) {
            self.ctx
                .log
                .debug("generator", format!("duplicate track source '{}'", entry.name));
            return;
        }
        let track = match self.ctx.spotify.get_track(&id).await {
            Ok(t) => t,
            Err(e) => {
                self.insert_error_item(ItemType::Track, &entry.name, e.to_string());
                return;
            }
        };
        self.seen_track_ids.insert(id.clone());
        let item_id = format!("track:{id}");
        let item = PlanItem::new(item_id.clone(), ItemType::Track, track.name.clone())
            .with_spotify_id(id)
            .with_spotify_url(entry.url.clone());
        item.set_metadata("source_name", json!(entry.name));
        item.set_metadata("source_url", json!(entry.url));
        item.set_metadata(
            "artists",
            json!(track.artists.iter().map(|a| a.name.clone()).collect::<Vec<_>>()),
        );
        item.set_metadata("album", json!(track.album.name));
        self.plan.insert(item);
    }

    async fn process_song_youtube(&mut self, entry: &SourceEntry, video_id: String) {
        if self.seen_youtube_video_ids.contains(&video_id) {
            self.ctx.log.debug(
                "generator",
                format!("duplicate YouTube track source '{}'", entry.name),
            );
            return;
        }
        let meta = match self.ctx.audio.get_video_metadata(&entry.url).await {
            Ok(m) => m,
            Err(e) => {
                self.insert_error_item(ItemType::Track, &entry.name, e.to_string());
                return;
            }
        };
        self.seen_youtube_video_ids.insert(video_id.clone());
        let item_id = format!("track:youtube:{video_id}");
        let item = PlanItem::new(item_id.clone(), ItemType::Track, meta.title.clone())
            .with_youtube_url(entry.url.clone());
        item.set_metadata("source_name", json!(entry.name));
        item.set_metadata("source_url", json!(entry.url));
        item.set_metadata("uploader", json!(meta.uploader));
        self.plan.insert(item);
        if let Some(inserted) = self.plan.get(&item_id) {
            self.enrich_youtube_track(inserted, &meta.title, &meta.uploader).await;
        }
    }

    // ---- artists ----

    async fn process_artist(&mut self, entry: &SourceEntry) {
        match url::classify(&entry.url, UrlSlot::Artist) {
            Some(Classified::SpotifyArtist(id)) => self.process_spotify_artist(entry, id).await,
            Some(Classified::YoutubeVideo(_)) | Some(Classified::YoutubePlaylist(_)) => {
                self.insert_error_item(
                    ItemType::Artist,
                    &entry.name,
                    "YouTube URLs are not supported for artists".to_string(),
                );
            }
            _ => self.insert_error_item(
                ItemType::Artist,
                &entry.name,
                format!("unrecognized artist URL: {}", entry.url),
            ),
        }
    }

    async fn process_spotify_artist(&mut self, entry: &SourceEntry, id: String) {
        let artist_item_id = format!("artist:{id}");
        if self.plan.contains(&artist_item_id) {
            self.ctx
                .log
                .debug("generator", format!("duplicate artist source '{}'", entry.name));
            return;
        }
        let artist: Artist = match self.ctx.spotify.get_artist(&id).await {
            Ok(a) => a,
            Err(e) => {
                self.insert_error_item(ItemType::Artist, &entry.name, e.to_string());
                return;
            }
        };
        self.seen_artist_ids.insert(id.clone());
        let artist_item = PlanItem::new(artist_item_id.clone(), ItemType::Artist, artist.name.clone());
        artist_item.set_metadata("source_name", json!(entry.name));
        artist_item.set_metadata("source_url", json!(entry.url));
        self.plan.insert(artist_item);

        let mut cursor = None;
        loop {
            if self.ctx.cancel.is_cancelled() {
                if let Some(item) = self.plan.get(&artist_item_id) {
                    item.mark_failed("cancelled");
                }
                return;
            }
            let page = match self.ctx.spotify.get_artist_albums(&id, cursor.clone()).await {
                Ok(p) => p,
                Err(e) => {
                    if let Some(item) = self.plan.get(&artist_item_id) {
                        item.mark_failed(e.to_string());
                    }
                    return;
                }
            };
            for album in page.items {
                if let Err(e) = self
                    .emit_album(&album.id, Some(&artist_item_id), false, None, None)
                    .await
                {
                    self.ctx.log.warn(
                        "generator",
                        format!("album '{}' under artist '{}' failed: {e}", album.name, artist.name),
                    );
                }
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
    }

    // ---- playlists ----

    async fn process_playlist(&mut self, entry: &SourceEntry) {
        match url::classify(&entry.url, UrlSlot::Playlist) {
            Some(Classified::SpotifyPlaylist(id)) => self.process_spotify_playlist(entry, id).await,
            Some(Classified::YoutubePlaylist(id)) => self.process_youtube_playlist(entry, id).await,
            _ => self.insert_error_item(
                ItemType::Playlist,
                &entry.name,
                format!("unrecognized playlist URL: {}", entry.url),
            ),
        }
    }

    async fn process_spotify_playlist(&mut self, entry: &SourceEntry, id: String) {
        if self.seen_playlist_ids.contains(&id) {
            self.ctx
                .log
                .debug("generator", format!("duplicate playlist source '{}'", entry.name));
            return;
        }
        let playlist_item_id = format!("playlist:{id}");
        let playlist = match self.ctx.spotify.get_playlist(&id).await {
            Ok(p) => p,
            Err(e) => {
                self.insert_error_item(ItemType::Playlist, &entry.name, e.to_string());
                return;
            }
        };
        self.seen_playlist_ids.insert(id.clone());
        let playlist_item =
            PlanItem::new(playlist_item_id.clone(), ItemType::Playlist, playlist.name.clone());
        playlist_item.set_metadata("source_name", json!(entry.name));
        playlist_item.set_metadata("source_url", json!(entry.url));
        self.plan.insert(playlist_item);

        let mut cursor = None;
        loop {
            if self.ctx.cancel.is_cancelled() {
                if let Some(item) = self.plan.get(&playlist_item_id) {
                    item.mark_failed("cancelled");
                }
                return;
            }
            let page = match self.ctx.spotify.get_playlist_tracks(&id, cursor.clone()).await {
                Ok(p) => p,
                Err(e) => {
                    if let Some(item) = self.plan.get(&playlist_item_id) {
                        item.mark_failed(e.to_string());
                    }
                    return;
                }
            };
            for entry_track in page.items {
                match entry_track.item {
                    PlaylistTrackItem::Unsupported => continue,
                    PlaylistTrackItem::Full(t) => {
                        self.emit_playlist_track_full(*t, &playlist_item_id, entry_track.added_at)
                    }
                    PlaylistTrackItem::Simplified(t) => self.emit_playlist_track_simplified(
                        t,
                        &playlist_item_id,
                        entry_track.added_at,
                    ),
                }
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        let m3u_id = format!("m3u:{id}");
        if !self.plan.contains(&m3u_id) {
            let m3u_item = PlanItem::new(m3u_id.clone(), ItemType::M3u, format!("{} (M3U)", playlist.name))
                .with_parent(playlist_item_id.clone());
            self.plan.insert(m3u_item);
            if let Some(item) = self.plan.get(&playlist_item_id) {
                item.add_child(m3u_id);
            }
        }
    }

    async fn process_youtube_playlist(&mut self, entry: &SourceEntry, playlist_id: String) {
        if self.seen_youtube_playlist_ids.contains(&playlist_id) {
            self.ctx.log.debug(
                "generator",
                format!("duplicate YouTube playlist source '{}'", entry.name),
            );
            return;
        }
        let info = match self.ctx.audio.get_playlist_info(&entry.url).await {
            Ok(i) => i,
            Err(e) => {
                self.insert_error_item(ItemType::Playlist, &entry.name, e.to_string());
                return;
            }
        };
        self.seen_youtube_playlist_ids.insert(playlist_id.clone());
        let playlist_item_id = format!("playlist:youtube:{playlist_id}");
        let playlist_item =
            PlanItem::new(playlist_item_id.clone(), ItemType::Playlist, info.title.clone());
        playlist_item.set_metadata("source_name", json!(entry.name));
        playlist_item.set_metadata("source_url", json!(entry.url));
        self.plan.insert(playlist_item);

        for video in info.entries {
            if self.ctx.cancel.is_cancelled() {
                if let Some(item) = self.plan.get(&playlist_item_id) {
                    item.mark_failed("cancelled");
                }
                return;
            }
            let item_id = format!("track:youtube:{}", video.video_id);
            if self.seen_youtube_video_ids.contains(&video.video_id) {
                if let Some(p) = self.plan.get(&playlist_item_id) {
                    p.add_child(item_id);
                }
                continue;
            }
            self.seen_youtube_video_ids.insert(video.video_id.clone());
            let item = PlanItem::new(item_id.clone(), ItemType::Track, video.title.clone())
                .with_parent(playlist_item_id.clone())
                .with_youtube_url(video.webpage_url.clone());
            item.set_metadata("uploader", json!(video.uploader));
            self.plan.insert(item);
            if let Some(p) = self.plan.get(&playlist_item_id) {
                p.add_child(item_id.clone());
            }
            if let Some(inserted) = self.plan.get(&item_id) {
                self.enrich_youtube_track(inserted, &video.title, &video.uploader).await;
            }
        }

        let m3u_id = format!("m3u:youtube:{playlist_id}");
        if !self.plan.contains(&m3u_id) {
            let m3u_item = PlanItem::new(m3u_id.clone(), ItemType::M3u, format!("{} (M3U)", info.title))
                .with_parent(playlist_item_id.clone());
            self.plan.insert(m3u_item);
            if let Some(item) = self.plan.get(&playlist_item_id) {
                item.add_child(m3u_id);
            }
        }
    }

    // ---- albums ----

    async fn process_album(&mut self, entry: &SourceEntry) {
        match url::classify(&entry.url, UrlSlot::Album) {
            Some(Classified::SpotifyAlbum(id)) => {
                if let Err(e) = self
                    .emit_album(&id, None, entry.create_m3u, Some(&entry.name), Some(&entry.url))
                    .await
                {
                    self.insert_error_item(ItemType::Album, &entry.name, e.to_string());
                }
            }
            Some(Classified::YoutubeVideo(_)) | Some(Classified::YoutubePlaylist(_)) => {
                self.insert_error_item(
                    ItemType::Album,
                    &entry.name,
                    "YouTube URLs are not supported for albums".to_string(),
                );
            }
            _ => self.insert_error_item(
                ItemType::Album,
                &entry.name,
                format!("unrecognized album URL: {}", entry.url),
            ),
        }
    }

    /// Fetch and emit an album plus its tracks, or — if already seen this
    /// run — just re-parent and idempotently upgrade its M3U (§4.6 pass 1
    /// describes the general dedup shape; here it's the generator's own
    /// avoid-reemitting rule from §4.5 "Album").
    async fn emit_album(
        &mut self,
        album_id: &str,
        parent_id: Option<&str>,
        create_m3u: bool,
        source_name: Option<&str>,
        source_url: Option<&str>,
    ) -> Result<String> {
        let album_item_id = format!("album:{album_id}");

        if self.seen_album_ids.contains(album_id) {
            if let Some(parent) = parent_id {
                if let Some(p) = self.plan.get(parent) {
                    p.add_child(album_item_id.clone());
                }
            }
            if create_m3u {
                self.ensure_album_m3u(album_id, &album_item_id);
            }
            return Ok(album_item_id);
        }

        let album = self.ctx.spotify.get_album(album_id).await?;
        self.seen_album_ids.insert(album_id.to_string());

        let mut album_item = PlanItem::new(album_item_id.clone(), ItemType::Album, album.name.clone());
        if let Some(parent) = parent_id {
            album_item = album_item.with_parent(parent);
        }
        if let Some(name) = source_name {
            album_item.set_metadata("source_name", json!(name));
        }
        if let Some(u) = source_url {
            album_item.set_metadata("source_url", json!(u));
        }
        album_item.set_metadata("release_date", json!(album.release_date));
        album_item.set_metadata("genres", json!(album.genres));
        self.plan.insert(album_item);
        if let Some(parent) = parent_id {
            if let Some(p) = self.plan.get(parent) {
                p.add_child(album_item_id.clone());
            }
        }

        let mut cursor = None;
        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let page = self.ctx.spotify.get_album_tracks(album_id, cursor.clone()).await?;
            for t in page.items {
                self.emit_album_track(t, &album_item_id);
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        if create_m3u {
            self.ensure_album_m3u(album_id, &album_item_id);
        }

        Ok(album_item_id)
    }

    fn ensure_album_m3u(&mut self, album_id: &str, album_item_id: &str) {
        let m3u_id = format!("m3u:album:{album_id}");
        if self.plan.contains(&m3u_id) {
            return;
        }
        let name = self
            .plan
            .get(album_item_id)
            .map(|a| a.name.clone())
            .unwrap_or_default();
        let m3u_item = PlanItem::new(m3u_id.clone(), ItemType::M3u, format!("{name} (M3U)"))
            .with_parent(album_item_id);
        self.plan.insert(m3u_item);
        if let Some(item) = self.plan.get(album_item_id) {
            item.add_child(m3u_id);
        }
    }

    fn emit_album_track(&mut self, t: SimplifiedTrack, parent_id: &str) {
        if t.is_local {
            return;
        }
        let item_id = format!("track:{}", t.id);
        if self.seen_track_ids.contains(&t.id) {
            if let Some(p) = self.plan.get(parent_id) {
                p.add_child(item_id);
            }
            return;
        }
        self.seen_track_ids.insert(t.id.clone());
        let item = PlanItem::new(item_id.clone(), ItemType::Track, t.name.clone())
            .with_parent(parent_id)
            .with_spotify_id(t.id.clone());
        item.set_metadata(
            "artists",
            json!(t.artists.iter().map(|a| a.name.clone()).collect::<Vec<_>>()),
        );
        self.plan.insert(item);
        if let Some(p) = self.plan.get(parent_id) {
            p.add_child(item_id);
        }
    }

    fn emit_playlist_track_full(&mut self, t: Track, parent_id: &str, added_at: Option<String>) {
        if t.is_local {
            return;
        }
        let item_id = format!("track:{}", t.id);
        if self.seen_track_ids.contains(&t.id) {
            if let Some(p) = self.plan.get(parent_id) {
                p.add_child(item_id);
            }
            return;
        }
        self.seen_track_ids.insert(t.id.clone());
        let item = PlanItem::new(item_id.clone(), ItemType::Track, t.name.clone())
            .with_parent(parent_id)
            .with_spotify_id(t.id.clone());
        item.set_metadata(
            "artists",
            json!(t.artists.iter().map(|a| a.name.clone()).collect::<Vec<_>>()),
        );
        item.set_metadata("album", json!(t.album.name));
        if let Some(at) = added_at {
            item.set_metadata("added_at", json!(at));
        }
        self.plan.insert(item);
        if let Some(p) = self.plan.get(parent_id) {
            p.add_child(item_id);
        }
    }

    fn emit_playlist_track_simplified(
        &mut self,
        t: SimplifiedTrack,
        parent_id: &str,
        added_at: Option<String>,
    ) {
        if t.is_local {
            return;
        }
        let item_id = format!("track:{}", t.id);
        if self.seen_track_ids.contains(&t.id) {
            if let Some(p) = self.plan.get(parent_id) {
                p.add_child(item_id);
            }
            return;
        }
        self.seen_track_ids.insert(t.id.clone());
        let item = PlanItem::new(item_id.clone(), ItemType::Track, t.name.clone())
            .with_parent(parent_id)
            .with_spotify_id(t.id.clone());
        item.set_metadata(
            "artists",
            json!(t.artists.iter().map(|a| a.name.clone()).collect::<Vec<_>>()),
        );
        if let Some(at) = added_at {
            item.set_metadata("added_at", json!(at));
        }
        self.plan.insert(item);
        if let Some(p) = self.plan.get(parent_id) {
            p.add_child(item_id);
        }
    }

    /// Best-effort Spotify enrichment of a YouTube-sourced track (§4.5.1).
    async fn enrich_youtube_track(&self, item: &PlanItem, title: &str, uploader: &str) {
        let mut query = format!("track:{title}");
        if !uploader.is_empty() {
            query.push_str(&format!(" artist:{uploader}"));
        }
        let candidates = match self.ctx.spotify.search(&query, SearchType::Track, 10).await {
            Ok(c) => c,
            Err(e) => {
                self.ctx
                    .log
                    .warn("generator", format!("enrichment search failed for '{title}': {e}"));
                return;
            }
        };
        let chosen = candidates
            .iter()
            .find(|t| t.artists.iter().any(|a| a.name.eq_ignore_ascii_case(uploader)))
            .or_else(|| candidates.first());
        let Some(track) = chosen else {
            return;
        };

        let mut enhancement = json!({
            "spotify_id": track.id,
            "album": track.album.name,
        });

        match self.ctx.spotify.get_album(&track.album.id).await {
            Ok(album) => {
                enhancement["album_artist"] = json!(album.artists.first().map(|a| a.name.clone()));
                enhancement["release_date"] = json!(album.release_date);
                enhancement["year"] = json!(album.release_date.get(0..4));
                enhancement["total_tracks"] = json!(album.total_tracks);
                enhancement["cover_url"] = json!(album.images.first().map(|i| i.url.clone()));
            }
            Err(e) => {
                self.ctx
                    .log
                    .warn("generator", format!("enrichment album fetch failed for '{title}': {e}"));
            }
        }

        item.set_metadata("spotify_enhancement", enhancement);
    }

    fn insert_error_item(&mut self, item_type: ItemType, name: &str, error: String) {
        let prefix = match item_type {
            ItemType::Track => "track",
            ItemType::Album => "album",
            ItemType::Artist => "artist",
            ItemType::Playlist => "playlist",
            ItemType::M3u => "m3u",
        };
        let item_id = format!("{prefix}:error:{name}");
        if self.plan.contains(&item_id) {
            return;
        }
        self.ctx.log.warn("generator", format!("{name}: {error}"));
        self.plan.insert(PlanItem::new_error(item_id, item_type, name, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::audio::{DownloadOutcome, DownloadRequest, PlaylistInfo, VideoMetadata};
    use crate::ports::spotify::{Album, AlbumRef, ArtistRef, Page, Playlist, PlaylistTrackEntry, RateLimitInfo, SimplifiedAlbum};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeSpotify {
        tracks: std::collections::HashMap<String, Track>,
        albums: std::collections::HashMap<String, (Album, Vec<SimplifiedTrack>)>,
        search_results: StdMutex<Vec<Track>>,
    }

    #[async_trait]
    impl SpotifyPort for FakeSpotify {
        async fn get_track(&self, id: &str) -> Result<Track> {
            self.tracks.get(id).cloned().ok_or_else(|| Error::Other("404 not found".into()))
        }
        async fn get_album(&self, id: &str) -> Result<Album> {
            self.albums.get(id).map(|(a, _)| a.clone()).ok_or_else(|| Error::Other("404 not found".into()))
        }
        async fn get_artist(&self, id: &str) -> Result<Artist> {
            Ok(Artist { id: id.to_string(), name: "Test Artist".into() })
        }
        async fn get_playlist(&self, id: &str) -> Result<Playlist> {
            Ok(Playlist { id: id.to_string(), name: "Test Playlist".into() })
        }
        async fn get_artist_albums(&self, _id: &str, _cursor: Option<String>) -> Result<Page<SimplifiedAlbum>> {
            Ok(Page { items: vec![], next_cursor: None })
        }
        async fn get_album_tracks(&self, id: &str, _cursor: Option<String>) -> Result<Page<SimplifiedTrack>> {
            let tracks = self.albums.get(id).map(|(_, t)| t.clone()).unwrap_or_default();
            Ok(Page { items: tracks, next_cursor: None })
        }
        async fn get_playlist_tracks(&self, _id: &str, _cursor: Option<String>) -> Result<Page<PlaylistTrackEntry>> {
            Ok(Page { items: vec![], next_cursor: None })
        }
        async fn search(&self, _query: &str, _kind: SearchType, _limit: usize) -> Result<Vec<Track>> {
            Ok(self.search_results.lock().unwrap().clone())
        }
        async fn get_rate_limit_info(&self) -> Result<RateLimitInfo> {
            Ok(RateLimitInfo { limit: None, remaining: None, reset_at: None })
        }
    }

    struct FakeAudio {
        videos: std::collections::HashMap<String, VideoMetadata>,
    }

    #[async_trait]
    impl AudioProviderPort for FakeAudio {
        async fn get_video_metadata(&self, url: &str) -> Result<VideoMetadata> {
            self.videos
                .values()
                .find(|v| v.webpage_url == url || url.contains(&v.video_id))
                .cloned()
                .ok_or_else(|| Error::Other("404 not found".into()))
        }
        async fn get_playlist_info(&self, _url: &str) -> Result<PlaylistInfo> {
            Err(Error::Other("not used in these tests".into()))
        }
        async fn download(&self, _request: DownloadRequest) -> Result<DownloadOutcome> {
            Ok(DownloadOutcome { success: true, final_file_path: Some("/tmp/out.mp3".into()), error: None })
        }
    }

    fn track(id: &str, name: &str, artist: &str, album_id: &str, album_name: &str) -> Track {
        Track {
            id: id.into(),
            name: name.into(),
            artists: vec![ArtistRef { id: "a1".into(), name: artist.into() }],
            album: AlbumRef { id: album_id.into(), name: album_name.into() },
            disc_number: 1,
            track_number: 1,
            is_local: false,
        }
    }

    fn ctx(spotify: FakeSpotify, audio: FakeAudio) -> GenerationContext {
        GenerationContext {
            spotify: Arc::new(spotify),
            audio: Arc::new(audio),
            cancel: CancellationToken::new(),
            log: LogBus::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_song_urls_produce_one_item() {
        let mut tracks = std::collections::HashMap::new();
        tracks.insert("dup".to_string(), track("dup", "Dup Song", "Artist", "alb1", "Album"));
        let spotify = FakeSpotify { tracks, albums: Default::default(), search_results: StdMutex::new(vec![]) };
        let audio = FakeAudio { videos: Default::default() };
        let c = ctx(spotify, audio);

        let config = Config {
            settings: Default::default(),
            songs: vec![
                SourceEntry { name: "one".into(), url: "https://open.spotify.com/track/dup".into(), create_m3u: false },
                SourceEntry { name: "two".into(), url: "https://open.spotify.com/track/dup".into(), create_m3u: false },
            ],
            albums: vec![],
            artists: vec![],
            playlists: vec![],
        };

        let plan = generate(&config, "hash", "config.toml", &c).await.unwrap();
        assert_eq!(plan.tracks().count(), 1);
        assert!(plan.contains("track:dup"));
    }

    #[tokio::test]
    async fn duplicate_youtube_video_urls_produce_one_item() {
        let mut videos = std::collections::HashMap::new();
        videos.insert(
            "vid1".to_string(),
            VideoMetadata {
                video_id: "vid1".into(),
                title: "Repeated Song".into(),
                uploader: "Some Uploader".into(),
                duration_secs: Some(180),
                upload_date: None,
                webpage_url: "https://www.youtube.com/watch?v=vid1".into(),
            },
        );
        let spotify = FakeSpotify { tracks: Default::default(), albums: Default::default(), search_results: StdMutex::new(vec![]) };
        let audio = FakeAudio { videos };
        let c = ctx(spotify, audio);

        let config = Config {
            settings: Default::default(),
            songs: vec![
                SourceEntry {
                    name: "one".into(),
                    url: "https://www.youtube.com/watch?v=vid1".into(),
                    create_m3u: false,
                },
                SourceEntry {
                    name: "two".into(),
                    url: "https://www.youtube.com/watch?v=vid1".into(),
                    create_m3u: false,
                },
            ],
            albums: vec![],
            artists: vec![],
            playlists: vec![],
        };

        let plan = generate(&config, "hash", "config.toml", &c).await.unwrap();
        assert_eq!(plan.tracks().count(), 1);
        assert!(plan.contains("track:youtube:vid1"));
    }

    #[tokio::test]
    async fn malformed_song_url_yields_error_item() {
        let spotify = FakeSpotify { tracks: Default::default(), albums: Default::default(), search_results: StdMutex::new(vec![]) };
        let audio = FakeAudio { videos: Default::default() };
        let c = ctx(spotify, audio);

        let config = Config {
            settings: Default::default(),
            songs: vec![SourceEntry { name: "bad".into(), url: "not a url".into(), create_m3u: false }],
            albums: vec![],
            artists: vec![],
            playlists: vec![],
        };

        let plan = generate(&config, "hash", "config.toml", &c).await.unwrap();
        assert!(plan.contains("track:error:bad"));
        assert_eq!(plan.get("track:error:bad").unwrap().status(), crate::plan::model::Status::Failed);
    }

    #[tokio::test]
    async fn youtube_song_enriched_with_spotify_album() {
        let mut videos = std::collections::HashMap::new();
        videos.insert(
            "vid1".to_string(),
            VideoMetadata {
                video_id: "vid1".into(),
                title: "Great Song".into(),
                uploader: "Great Artist".into(),
                duration_secs: Some(200),
                upload_date: None,
                webpage_url: "https://www.youtube.com/watch?v=vid1".into(),
            },
        );
        let spotify = FakeSpotify {
            tracks: Default::default(),
            albums: {
                let mut m = std::collections::HashMap::new();
                m.insert(
                    "albX".to_string(),
                    (
                        Album {
                            id: "albX".into(),
                            name: "X".into(),
                            artists: vec![ArtistRef { id: "a1".into(), name: "Great Artist".into() }],
                            images: vec![],
                            genres: vec![],
                            release_date: "2020-01-01".into(),
                            total_tracks: 10,
                        },
                        vec![],
                    ),
                );
                m
            },
            search_results: StdMutex::new(vec![track("matched", "Great Song", "Great Artist", "albX", "X")]),
        };
        let audio = FakeAudio { videos };
        let c = ctx(spotify, audio);

        let config = Config {
            settings: Default::default(),
            songs: vec![SourceEntry {
                name: "yt".into(),
                url: "https://www.youtube.com/watch?v=vid1".into(),
                create_m3u: false,
            }],
            albums: vec![],
            artists: vec![],
            playlists: vec![],
        };

        let plan = generate(&config, "hash", "config.toml", &c).await.unwrap();
        let item = plan.get("track:youtube:vid1").unwrap();
        let enhancement = item.metadata_get("spotify_enhancement").unwrap();
        assert_eq!(enhancement["album"], "X");
    }

    #[tokio::test]
    async fn artist_url_in_album_slot_is_rejected() {
        let spotify = FakeSpotify { tracks: Default::default(), albums: Default::default(), search_results: StdMutex::new(vec![]) };
        let audio = FakeAudio { videos: Default::default() };
        let c = ctx(spotify, audio);

        let config = Config {
            settings: Default::default(),
            songs: vec![],
            albums: vec![SourceEntry {
                name: "bad-album".into(),
                url: "https://www.youtube.com/watch?v=vid1".into(),
                create_m3u: false,
            }],
            artists: vec![],
            playlists: vec![],
        };

        let plan = generate(&config, "hash", "config.toml", &c).await.unwrap();
        assert!(plan.contains("album:error:bad-album"));
    }
}
