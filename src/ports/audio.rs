//! Audio Provider Port (C4, §4.4).
//!
//! Two responsibilities: resolve YouTube video/playlist metadata, and
//! download+transcode a track item to a file. The real implementation wraps
//! `rustypipe` for metadata/search and `rustypipe-downloader` for the
//! network transfer, then shells out to `ffmpeg` for the final transcode:
//! search, download, transcode, reached through a typed port instead of
//! being inlined into the download loop.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Metadata for a single YouTube video (§4.4).
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub uploader: String,
    pub duration_secs: Option<u64>,
    pub upload_date: Option<DateTime<Utc>>,
    pub webpage_url: String,
}

/// Metadata for a YouTube playlist, with its resolved entries (§4.4).
#[derive(Debug, Clone)]
pub struct PlaylistInfo {
    pub playlist_id: String,
    pub title: String,
    pub description: String,
    pub entries: Vec<VideoMetadata>,
}

/// What to download: either a concrete video id or a free-text search query
/// (used for Spotify-sourced tracks that need a YouTube match).
#[derive(Debug, Clone)]
pub enum DownloadSource {
    VideoId(String),
    SearchQuery(String),
}

/// A single download request (§4.4 `download(item)`).
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source: DownloadSource,
    /// Destination file stem (without extension); the port appends the
    /// configured output format's extension.
    pub output_stem: PathBuf,
    pub format: String,
    pub bitrate: String,
}

/// The outcome of a download attempt (§4.4).
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub success: bool,
    pub final_file_path: Option<String>,
    pub error: Option<String>,
}

/// The Audio Provider Port (C4).
#[async_trait]
pub trait AudioProviderPort: Send + Sync {
    async fn get_video_metadata(&self, url: &str) -> Result<VideoMetadata>;
    async fn get_playlist_info(&self, url: &str) -> Result<PlaylistInfo>;
    async fn download(&self, request: DownloadRequest) -> Result<DownloadOutcome>;
}

/// The real Audio Provider Port backed by `rustypipe` + `rustypipe-downloader` + `ffmpeg`.
pub struct YoutubeAudioPort {
    client: Arc<rustypipe::client::RustyPipe>,
    downloader: Arc<rustypipe_downloader::RustyPipeDownloader>,
}

impl YoutubeAudioPort {
    pub fn new() -> Self {
        YoutubeAudioPort {
            client: Arc::new(rustypipe::client::RustyPipe::new()),
            downloader: Arc::new(rustypipe_downloader::RustyPipeDownloader::new()),
        }
    }
}

impl Default for YoutubeAudioPort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioProviderPort for YoutubeAudioPort {
    async fn get_video_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let details = self
            .client
            .query()
            .video_details(url, false)
            .await
            .map_err(|e| Error::Audio(e.to_string()))?;
        Ok(VideoMetadata {
            video_id: details.id,
            title: details.name,
            uploader: details.channel.name,
            duration_secs: details.duration,
            upload_date: None,
            webpage_url: url.to_string(),
        })
    }

    async fn get_playlist_info(&self, url: &str) -> Result<PlaylistInfo> {
        let playlist = self
            .client
            .query()
            .playlist(url)
            .await
            .map_err(|e| Error::Audio(e.to_string()))?;
        let entries = playlist
            .videos
            .items
            .into_iter()
            .map(|v| VideoMetadata {
                video_id: v.id.clone(),
                title: v.name.clone(),
                uploader: playlist.channel.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
                duration_secs: v.duration,
                upload_date: None,
                webpage_url: format!("https://www.youtube.com/watch?v={}", v.id),
            })
            .collect();
        Ok(PlaylistInfo {
            playlist_id: playlist.id,
            title: playlist.name,
            description: playlist.description.unwrap_or_default(),
            entries,
        })
    }

    async fn download(&self, request: DownloadRequest) -> Result<DownloadOutcome> {
        let video_id = match &request.source {
            DownloadSource::VideoId(id) => id.clone(),
            DownloadSource::SearchQuery(query) => {
                let results = self
                    .client
                    .query()
                    .music_search_tracks(query)
                    .await
                    .map_err(|e| Error::Audio(e.to_string()))?;
                match results.items.items.first() {
                    Some(first) => first.id.clone(),
                    None => {
                        return Ok(DownloadOutcome {
                            success: false,
                            final_file_path: None,
                            error: Some(format!("no YouTube match for query: {query}")),
                        });
                    }
                }
            }
        };

        if let Some(parent) = request.output_stem.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = request.output_stem.with_extension("tmp.opus");
        if let Err(e) = self
            .downloader
            .download_audio(&video_id, &temp_path)
            .await
        {
            return Ok(DownloadOutcome {
                success: false,
                final_file_path: None,
                error: Some(format!("rustypipe download failed: {e}")),
            });
        }

        let final_path = request.output_stem.with_extension(&request.format);
        match transcode(&temp_path, &final_path, &request.bitrate) {
            Ok(()) => {
                let _ = std::fs::remove_file(&temp_path);
                Ok(DownloadOutcome {
                    success: true,
                    final_file_path: Some(final_path.to_string_lossy().to_string()),
                    error: None,
                })
            }
            Err(e) => Ok(DownloadOutcome {
                success: false,
                final_file_path: None,
                error: Some(e.to_string()),
            }),
        }
    }
}

/// Transcode the raw downloaded stream to the configured output format using
/// ffmpeg, at the configured bitrate, using all available cores.
fn transcode(input: &Path, output: &Path, bitrate: &str) -> Result<()> {
    let result = Command::new("ffmpeg")
        .args([
            "-i",
            &input.to_string_lossy(),
            "-b:a",
            bitrate,
            "-threads",
            "0",
            "-y",
            &output.to_string_lossy(),
        ])
        .output()?;

    if !result.status.success() {
        return Err(Error::Audio(format!(
            "ffmpeg failed: {}",
            String::from_utf8_lossy(&result.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_request_output_path_uses_configured_format() {
        let request = DownloadRequest {
            source: DownloadSource::VideoId("abc".into()),
            output_stem: PathBuf::from("/tmp/output/My Song"),
            format: "mp3".into(),
            bitrate: "192k".into(),
        };
        let expected = request.output_stem.with_extension(&request.format);
        assert_eq!(expected, PathBuf::from("/tmp/output/My Song.mp3"));
    }
}
