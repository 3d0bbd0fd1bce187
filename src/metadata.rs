//! Tag embedding, applied to completed track items after download.
//!
//! Writes title/artist/album/genre/year and cover art into the audio file
//! named by a completed [`PlanItem`]'s `file_path`, the same `lofty`-based
//! approach the original crate used, adapted to read from the plan's
//! metadata map instead of a raw `spotify_rs::Track`.

use crate::error::{Error, Result};
use crate::plan::model::PlanItem;
use crate::ports::spotify::SpotifyPort;
use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::read_from_path;
use lofty::tag::{Accessor, Tag, TagExt};

/// Embed tags into a single completed track item's audio file.
///
/// Best-effort: genre and cover art require an extra Spotify album lookup
/// (skipped for tracks with no `spotify_id`, e.g. unenriched YouTube-only
/// tracks) and failures there don't abort tagging the fields already known.
pub async fn embed_tags(item: &PlanItem, spotify: &dyn SpotifyPort) -> Result<()> {
    let Some(path) = item.file_path() else {
        return Err(Error::Other(format!("{}: no file_path to tag", item.item_id)));
    };

    let mut tagged_file = read_from_path(&path).map_err(|e| Error::Other(format!("{}: {e}", item.item_id)))?;
    let tag = match tagged_file.primary_tag_mut() {
        Some(tag) => tag,
        None => {
            if let Some(tag) = tagged_file.first_tag_mut() {
                tag
            } else {
                let tag_type = tagged_file.primary_tag_type();
                tagged_file.insert_tag(Tag::new(tag_type));
                tagged_file.primary_tag_mut().unwrap()
            }
        }
    };

    tag.set_title(item.name.clone());

    let snapshot = item.metadata_snapshot();
    if let Some(artists) = snapshot.get("artists").and_then(|v| v.as_array()) {
        let joined = artists
            .iter()
            .filter_map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if !joined.is_empty() {
            tag.set_artist(joined);
        }
    }

    let album_name = snapshot
        .get("album")
        .and_then(|v| v.as_str())
        .or_else(|| {
            snapshot
                .get("spotify_enhancement")
                .and_then(|e| e.get("album"))
                .and_then(|v| v.as_str())
        });
    if let Some(album_name) = album_name {
        tag.set_album(album_name.to_string());
    }

    let mut cover_url: Option<String> = None;
    let mut release_date: Option<String> = None;

    if let Some(spotify_id) = &item.spotify_id {
        if let Some(album_id) = snapshot
            .get("album_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| snapshot.get("album").map(|_| spotify_id.clone()))
        {
            match spotify.get_album(&album_id).await {
                Ok(album) => {
                    let genre = album.genres.join(", ");
                    if !genre.is_empty() {
                        tag.set_genre(genre);
                    }
                    tag.set_track_total(album.total_tracks);
                    release_date = Some(album.release_date.clone());
                    cover_url = album.images.first().map(|i| i.url.clone());
                }
                Err(_) => {
                    // Best-effort: tag with what we already have.
                }
            }
        }
    } else if let Some(enhancement) = snapshot.get("spotify_enhancement") {
        release_date = enhancement.get("release_date").and_then(|v| v.as_str()).map(String::from);
        cover_url = enhancement.get("cover_url").and_then(|v| v.as_str()).map(String::from);
    }

    if let Some(release_date) = release_date {
        if release_date.len() >= 4 {
            if let Ok(year) = release_date[..4].parse::<u32>() {
                tag.set_year(year);
            }
        }
    }

    if let Some(url) = cover_url {
        if let Ok(response) = reqwest::get(&url).await {
            if let Ok(bytes) = response.bytes().await {
                let picture = Picture::new_unchecked(PictureType::CoverFront, Some(MimeType::Jpeg), None, bytes.to_vec());
                tag.push_picture(picture);
            }
        }
    }

    tag.save_to_path(&path, WriteOptions::default())
        .map_err(|e| Error::Other(format!("{}: failed to write tag: {e}", item.item_id)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_path_is_an_error() {
        let item = PlanItem::new("track:1", crate::plan::model::ItemType::Track, "Untagged");
        let result = embed_tags(&item, &NeverCalled).await;
        assert!(result.is_err());
    }

    struct NeverCalled;
    #[async_trait::async_trait]
    impl SpotifyPort for NeverCalled {
        async fn get_track(&self, _id: &str) -> Result<crate::ports::spotify::Track> {
            unreachable!()
        }
        async fn get_album(&self, _id: &str) -> Result<crate::ports::spotify::Album> {
            unreachable!()
        }
        async fn get_artist(&self, _id: &str) -> Result<crate::ports::spotify::Artist> {
            unreachable!()
        }
        async fn get_playlist(&self, _id: &str) -> Result<crate::ports::spotify::Playlist> {
            unreachable!()
        }
        async fn get_artist_albums(
            &self,
            _id: &str,
            _cursor: Option<String>,
        ) -> Result<crate::ports::spotify::Page<crate::ports::spotify::SimplifiedAlbum>> {
            unreachable!()
        }
        async fn get_album_tracks(
            &self,
            _id: &str,
            _cursor: Option<String>,
        ) -> Result<crate::ports::spotify::Page<crate::ports::spotify::SimplifiedTrack>> {
            unreachable!()
        }
        async fn get_playlist_tracks(
            &self,
            _id: &str,
            _cursor: Option<String>,
        ) -> Result<crate::ports::spotify::Page<crate::ports::spotify::PlaylistTrackEntry>> {
            unreachable!()
        }
        async fn search(
            &self,
            _query: &str,
            _kind: crate::ports::spotify::SearchType,
            _limit: usize,
        ) -> Result<Vec<crate::ports::spotify::Track>> {
            unreachable!()
        }
        async fn get_rate_limit_info(&self) -> Result<crate::ports::spotify::RateLimitInfo> {
            unreachable!()
        }
    }
}
