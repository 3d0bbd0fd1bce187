//! Declarative acquisition configuration (§1, §4.5) and its loading.
//!
//! A [`Config`] is the input to the Plan Generator: four lists of sources
//! (songs, albums, artists, playlists), each an arbitrary mix of Spotify and
//! YouTube URLs, plus the runtime settings that parameterize generation and
//! execution. The configuration's *identity* is the exact bytes of the file
//! it was loaded from (§4.1) — `Config` itself is only the parsed view used
//! to drive the generator.

use crate::error::{Error, Result};
use crate::hash::hash_config_bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One entry in a `songs`, `albums`, `artists`, or `playlists` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Human-friendly label used in logs and for `*:error:<name>` items.
    pub name: String,
    /// A Spotify or YouTube URL.
    pub url: String,
    /// Whether an M3U playlist file should be emitted for this source.
    #[serde(default)]
    pub create_m3u: bool,
}

/// Runtime settings that parameterize plan generation and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Spotify application client id.
    #[serde(default)]
    pub client_id: String,
    /// Spotify application client secret.
    #[serde(default)]
    pub client_secret: String,
    /// Destination folder for downloaded audio files.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Maximum number of concurrent track downloads (C9 `max_workers`).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Target audio bitrate, e.g. "192k".
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    /// Output container/codec, e.g. "mp3".
    #[serde(default = "default_format")]
    pub format: String,
    /// Per-track download timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Skip embedding tags/artwork after download.
    #[serde(default)]
    pub no_tag: bool,
    /// Run the optimizer's existence check (§4.6 pass 2) after generation.
    #[serde(default = "default_true")]
    pub check_existing_files: bool,
    /// Resume from durable state before executing a download run.
    #[serde(default = "default_true")]
    pub resume: bool,
}

fn default_output_dir() -> String {
    "./output".to_string()
}
fn default_max_workers() -> usize {
    4
}
fn default_bitrate() -> String {
    "192k".to_string()
}
fn default_format() -> String {
    "mp3".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            client_id: String::new(),
            client_secret: String::new(),
            output_dir: default_output_dir(),
            max_workers: default_max_workers(),
            bitrate: default_bitrate(),
            format: default_format(),
            timeout_secs: default_timeout(),
            no_tag: false,
            check_existing_files: true,
            resume: true,
        }
    }
}

/// The declarative configuration: four heterogeneous source lists plus
/// runtime settings (§1, §2).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub songs: Vec<SourceEntry>,
    #[serde(default)]
    pub albums: Vec<SourceEntry>,
    #[serde(default)]
    pub artists: Vec<SourceEntry>,
    #[serde(default)]
    pub playlists: Vec<SourceEntry>,
}

/// A configuration together with the raw bytes it was parsed from and their
/// hash — the hash is always computed from `raw`, never re-derived from
/// `config`, so re-serialization can never silently change plan identity.
pub struct LoadedConfig {
    pub config: Config,
    pub raw: Vec<u8>,
    pub hash: String,
    pub file_name: String,
}

/// Load and parse a configuration file, computing its hash from the exact
/// bytes on disk (§4.1).
pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    let raw = std::fs::read(path)?;
    let hash = hash_config_bytes(&raw);
    let text = String::from_utf8_lossy(&raw);
    let config: Config = toml::from_str(&text)
        .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "config.toml".to_string());
    Ok(LoadedConfig {
        config,
        raw,
        hash,
        file_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [[songs]]
            name = "one"
            url = "https://open.spotify.com/track/abc"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.songs.len(), 1);
        assert_eq!(config.songs[0].name, "one");
        assert_eq!(config.settings.max_workers, 4);
    }

    #[test]
    fn hash_tracks_exact_bytes_on_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[songs]]\nname = \"a\"\nurl = \"u\"\n").unwrap();
        let loaded = load_config(file.path()).unwrap();
        assert_eq!(loaded.hash, hash_config_bytes(&loaded.raw));
        assert_eq!(loaded.config.songs.len(), 1);
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "this is not valid toml [[[").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
