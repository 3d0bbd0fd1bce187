//!
//! musicdl library API
//!
//! A concurrent, resumable pipeline that turns a declarative TOML
//! configuration of Spotify and YouTube sources into a content-addressed
//! download plan, then executes that plan against a bounded worker pool.
//!
//! Key items:
//! - [`config::Config`] / [`config::load_config`] — the input configuration
//! - [`controller::RunController`] — the single entry point wiring
//!   generation, optimization, persistence, execution, resume, stats, and
//!   the circuit breaker together
//! - [`plan::DownloadPlan`] — the DAG produced by generation and consumed by
//!   execution
//!
//! Examples
//! ```no_run
//! use musicdl::controller::RunController;
//! use musicdl::ports::spotify::SpotifyApiPort;
//! use musicdl::ports::audio::YoutubeAudioPort;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let spotify = Arc::new(SpotifyApiPort::new("client_id", "client_secret"));
//!     let audio = Arc::new(YoutubeAudioPort::new());
//!     let controller = RunController::new(spotify, audio, "./cache".into());
//!     let outcome = controller.plan("config.toml".as_ref()).await?;
//!     println!("generated {} tracks", outcome.plan.metadata.total_tracks);
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod hash;
pub mod logbus;
pub mod metadata;
pub mod plan;
pub mod ports;
pub mod resume;
pub mod stats;
pub mod url;

pub use config::{Config, LoadedConfig, Settings};
pub use controller::RunController;
pub use error::{Error, Result};
pub use plan::DownloadPlan;
