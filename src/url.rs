//! URL Classifier (§4.2).
//!
//! Given a URL, decides whether it names a Spotify resource (track / album /
//! artist / playlist) or a YouTube resource (video / playlist), and extracts
//! the resource id. Matching is case-insensitive pattern extraction, not a
//! full URL-correctness check.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// The slot a URL was configured in, which disambiguates a YouTube URL that
/// is simultaneously a video link and carries a `list=` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlSlot {
    /// Configured under `songs`.
    Song,
    /// Configured under `albums`.
    Album,
    /// Configured under `artists`.
    Artist,
    /// Configured under `playlists`.
    Playlist,
}

/// The classification result for a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    SpotifyTrack(String),
    SpotifyAlbum(String),
    SpotifyArtist(String),
    SpotifyPlaylist(String),
    YoutubeVideo(String),
    YoutubePlaylist(String),
}

static SPOTIFY_RESOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/(track|album|artist|playlist)/([A-Za-z0-9]+)").unwrap());

static YOUTUBE_WATCH_V: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[?&]v=([A-Za-z0-9_-]{11})").unwrap());
static YOUTUBE_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)youtu\.be/([A-Za-z0-9_-]{11})").unwrap());
static YOUTUBE_EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/embed/([A-Za-z0-9_-]{11})").unwrap());
static YOUTUBE_V_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/v/([A-Za-z0-9_-]{11})").unwrap());
static YOUTUBE_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[?&]list=([A-Za-z0-9_-]+)").unwrap());

/// True if `url` parses as an absolute URL whose host is a YouTube domain.
/// Falls back to a substring check for non-absolute input, since config
/// entries are not required to be fully-qualified (§4.2, "not a full
/// URL-correctness check").
fn is_youtube_host(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        return match parsed.host_str() {
            Some(host) => {
                let host = host.to_lowercase();
                host == "youtube.com"
                    || host.ends_with(".youtube.com")
                    || host == "youtu.be"
                    || host.ends_with(".youtu.be")
                    || host == "youtube-nocookie.com"
                    || host.ends_with(".youtube-nocookie.com")
            }
            None => false,
        };
    }
    let lower = url.to_lowercase();
    lower.contains("youtube.com") || lower.contains("youtu.be") || lower.contains("youtube-nocookie.com")
}

fn youtube_video_id(url: &str) -> Option<String> {
    YOUTUBE_WATCH_V
        .captures(url)
        .or_else(|| YOUTUBE_SHORT.captures(url))
        .or_else(|| YOUTUBE_EMBED.captures(url))
        .or_else(|| YOUTUBE_V_PATH.captures(url))
        .map(|c| c[1].to_string())
}

fn youtube_playlist_id(url: &str) -> Option<String> {
    YOUTUBE_LIST.captures(url).map(|c| c[1].to_string())
}

/// Classify `url` according to the slot it was configured under (§4.2).
///
/// A YouTube URL that is both a watchable video and carries `list=` resolves
/// to [`Classified::YoutubeVideo`] in a [`UrlSlot::Song`] slot and to
/// [`Classified::YoutubePlaylist`] in a [`UrlSlot::Playlist`] slot.
pub fn classify(url: &str, slot: UrlSlot) -> Option<Classified> {
    if is_youtube_host(url) {
        return match slot {
            UrlSlot::Playlist => youtube_playlist_id(url).map(Classified::YoutubePlaylist),
            _ => youtube_video_id(url)
                .map(Classified::YoutubeVideo)
                .or_else(|| youtube_playlist_id(url).map(Classified::YoutubePlaylist)),
        };
    }

    let caps = SPOTIFY_RESOURCE.captures(url)?;
    let kind = caps[1].to_lowercase();
    let id = caps[2].to_string();
    match kind.as_str() {
        "track" => Some(Classified::SpotifyTrack(id)),
        "album" => Some(Classified::SpotifyAlbum(id)),
        "artist" => Some(Classified::SpotifyArtist(id)),
        "playlist" => Some(Classified::SpotifyPlaylist(id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_spotify_track() {
        let got = classify(
            "https://open.spotify.com/track/3n3Ppam7vgaVa1iaRUc9Lp",
            UrlSlot::Song,
        );
        assert_eq!(
            got,
            Some(Classified::SpotifyTrack("3n3Ppam7vgaVa1iaRUc9Lp".into()))
        );
    }

    #[test]
    fn classifies_spotify_artist_case_insensitively() {
        let got = classify(
            "https://open.spotify.com/ARTIST/abcXYZ123",
            UrlSlot::Artist,
        );
        assert_eq!(got, Some(Classified::SpotifyArtist("abcXYZ123".into())));
    }

    #[test]
    fn classifies_youtube_watch_url() {
        let got = classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ", UrlSlot::Song);
        assert_eq!(got, Some(Classified::YoutubeVideo("dQw4w9WgXcQ".into())));
    }

    #[test]
    fn classifies_youtube_short_url() {
        let got = classify("https://youtu.be/dQw4w9WgXcQ", UrlSlot::Song);
        assert_eq!(got, Some(Classified::YoutubeVideo("dQw4w9WgXcQ".into())));
    }

    #[test]
    fn classifies_youtube_nocookie_embed() {
        let got = classify(
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
            UrlSlot::Song,
        );
        assert_eq!(got, Some(Classified::YoutubeVideo("dQw4w9WgXcQ".into())));
    }

    #[test]
    fn classifies_youtube_playlist_by_slot() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL12345";
        assert_eq!(
            classify(url, UrlSlot::Song),
            Some(Classified::YoutubeVideo("dQw4w9WgXcQ".into()))
        );
        assert_eq!(
            classify(url, UrlSlot::Playlist),
            Some(Classified::YoutubePlaylist("PL12345".into()))
        );
    }

    #[test]
    fn classifies_bare_playlist_path() {
        let got = classify(
            "https://www.youtube.com/playlist?list=PL12345",
            UrlSlot::Playlist,
        );
        assert_eq!(got, Some(Classified::YoutubePlaylist("PL12345".into())));
    }

    #[test]
    fn rejects_malformed_url() {
        assert_eq!(classify("not a url at all", UrlSlot::Song), None);
    }
}
