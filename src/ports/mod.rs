//! External collaborator interfaces (§1, §4.3, §4.4).
//!
//! The core treats Spotify metadata and audio extraction/download as ports:
//! traits whose real implementations wrap `spotify-rs` and `rustypipe`
//! respectively. Only the capabilities the core actually consumes are
//! exposed — transport-level concerns (HTTP retries, rate-limit pacing,
//! subprocess plumbing) are the implementation's responsibility, not the
//! core's.

pub mod audio;
pub mod spotify;
