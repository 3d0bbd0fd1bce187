use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::{error, info};
use musicdl::controller::RunController;
use musicdl::error::Error;
use musicdl::ports::audio::YoutubeAudioPort;
use musicdl::ports::spotify::SpotifyApiPort;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "musicdl", about = "A concurrent, resumable music acquisition pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for plan files, resume state, and stats (overridden by MUSICDL_CACHE_DIR).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a download plan from a configuration file and persist it.
    Plan { config: PathBuf },
    /// Load a previously generated plan and execute it.
    Download { config: PathBuf },
}

#[tokio::main]
async fn main() {
    let logger = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .build();
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger).try_init().unwrap();

    let cli = Cli::parse();
    let cache_dir = resolve_cache_dir(cli.cache_dir);
    let config_path = resolve_config_path(match &cli.command {
        Command::Plan { config } => config.clone(),
        Command::Download { config } => config.clone(),
    });

    let spotify_id = std::env::var("SPOTIFY_CLIENT_ID").unwrap_or_default();
    let spotify_secret = std::env::var("SPOTIFY_CLIENT_SECRET").unwrap_or_default();
    let spotify = Arc::new(SpotifyApiPort::new(spotify_id, spotify_secret));
    let audio = Arc::new(YoutubeAudioPort::new());
    let controller = Arc::new(RunController::new(spotify, audio, cache_dir));

    let ctrl_for_signal = Arc::clone(&controller);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received interrupt, requesting cancellation");
            ctrl_for_signal.request_cancel();
        }
    });

    let code = match cli.command {
        Command::Plan { .. } => run_plan(&controller, &config_path, &multi).await,
        Command::Download { .. } => run_download(&controller, &config_path, &multi).await,
    };
    std::process::exit(code);
}

async fn run_plan(controller: &RunController, config_path: &std::path::Path, multi: &MultiProgress) -> i32 {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message("generating plan");

    match controller.plan(config_path).await {
        Ok(outcome) => {
            bar.finish_with_message(format!(
                "plan generated: {} tracks (hash {})",
                outcome.plan.metadata.total_tracks, outcome.config_hash
            ));
            0
        }
        Err(e) => {
            bar.finish_with_message(format!("plan failed: {e}"));
            error!("{e}");
            plan_exit_code(&e)
        }
    }
}

async fn run_download(controller: &RunController, config_path: &std::path::Path, multi: &MultiProgress) -> i32 {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message("downloading");

    match controller.download(config_path).await {
        Ok(outcome) => {
            bar.finish_with_message(format!(
                "download finished: {} completed, {} failed, {} skipped",
                outcome.summary.completed, outcome.summary.failed, outcome.summary.skipped
            ));
            0
        }
        Err(e) => {
            bar.finish_with_message(format!("download failed: {e}"));
            error!("{e}");
            download_exit_code(&e)
        }
    }
}

/// Exit codes for `plan` (§6): 0 success, 1 config error, 2 network, 3 filesystem, 4 interrupted.
fn plan_exit_code(err: &Error) -> i32 {
    match err {
        Error::InvalidConfig(_) | Error::TomlParse(_) | Error::UnrecognizedUrl(_) => 1,
        Error::Spotify(_) | Error::Audio(_) => 2,
        Error::Io(_) | Error::Json(_) | Error::TomlSerialize(_) => 3,
        Error::Cancelled => 4,
        _ if err.is_cancellation() => 4,
        _ => 1,
    }
}

/// Exit codes for `download` (§6): 0 success, 1 config error, 2 plan missing/mismatch,
/// 3 network, 4 filesystem, 5 partial failure, 6 interrupted.
fn download_exit_code(err: &Error) -> i32 {
    match err {
        Error::InvalidConfig(_) | Error::TomlParse(_) => 1,
        Error::PlanNotFound(_) | Error::PlanHashMismatch { .. } => 2,
        Error::Spotify(_) | Error::Audio(_) => 3,
        Error::Io(_) | Error::Json(_) | Error::TomlSerialize(_) => 4,
        Error::PartialFailure { .. } => 5,
        Error::Cancelled => 6,
        _ if err.is_cancellation() => 6,
        _ => 1,
    }
}

fn resolve_cache_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("MUSICDL_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .map(|dir| dir.join("musicdl"))
        .unwrap_or_else(|| PathBuf::from(".cache"))
}

fn resolve_config_path(config: PathBuf) -> PathBuf {
    if config.is_absolute() || config.exists() {
        return config;
    }
    match std::env::var("MUSICDL_WORK_DIR") {
        Ok(work_dir) => PathBuf::from(work_dir).join(config),
        Err(_) => config,
    }
}
