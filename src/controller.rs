//! Run Controller (C13, §4.13).
//!
//! The single entry point that wires C5-C12 together: config loading, plan
//! generation/optimization/persistence, execution, resume state, statistics,
//! and the circuit breaker, behind a single-operation-at-a-time gate.

use crate::breaker::CircuitBreaker;
use crate::config::{load_config, Settings};
use crate::error::{classify_error, ClassifiedError, Error, Result};
use crate::executor::{partial_failure_error, Executor, ExecutionSummary, ItemCallback};
use crate::logbus::LogBus;
use crate::plan::generator::{self, GenerationContext};
use crate::plan::model::DownloadPlan;
use crate::plan::optimizer;
use crate::plan::persistence::{load_plan, save_plan};
use crate::ports::audio::AudioProviderPort;
use crate::ports::spotify::SpotifyPort;
use crate::resume::ResumeState;
use crate::stats::{FinalizedRun, StatisticsTracker};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What operation is currently in flight, if any (§4.13). Each run gets its
/// own cancellation token so that a cancel requested during one run never
/// leaks into the next.
#[derive(Clone)]
struct RunInfo {
    operation_type: String,
    started_at: DateTime<Utc>,
    run_id: String,
    cancel: CancellationToken,
}

/// Outcome of a `plan` invocation.
pub struct PlanOutcome {
    pub plan: DownloadPlan,
    pub config_hash: String,
}

/// Outcome of a `download` invocation.
pub struct DownloadOutcome {
    pub summary: ExecutionSummary,
    pub finalized: Option<FinalizedRun>,
}

/// The Run Controller (C13): one instance lives for the process lifetime,
/// owning every other component.
pub struct RunController {
    spotify: Arc<dyn SpotifyPort>,
    audio: Arc<dyn AudioProviderPort>,
    cache_dir: PathBuf,
    breaker: CircuitBreaker,
    stats: StatisticsTracker,
    resume: ResumeState,
    log: LogBus,
    running: Mutex<Option<RunInfo>>,
}

impl RunController {
    pub fn new(spotify: Arc<dyn SpotifyPort>, audio: Arc<dyn AudioProviderPort>, cache_dir: PathBuf) -> Self {
        RunController {
            stats: StatisticsTracker::load(&cache_dir),
            resume: ResumeState::load(&cache_dir),
            spotify,
            audio,
            cache_dir,
            breaker: CircuitBreaker::with_defaults(),
            log: LogBus::new(),
            running: Mutex::new(None),
        }
    }

    pub fn log_bus(&self) -> LogBus {
        self.log.clone()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Request cooperative cancellation of the in-flight operation, if any
    /// (§4.13). A no-op when nothing is running.
    pub fn request_cancel(&self) {
        if let Some(info) = self.running.lock().as_ref() {
            info.cancel.cancel();
        }
    }

    fn begin_run(&self, operation_type: &str) -> Result<(String, CancellationToken)> {
        if !self.breaker.allow_request() {
            let retry_after = self.breaker.retry_after();
            return Err(Error::BreakerOpen { retry_after });
        }
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let run_id = self.stats.start_run(operation_type);
        let cancel = CancellationToken::new();
        *running = Some(RunInfo {
            operation_type: operation_type.to_string(),
            started_at: Utc::now(),
            run_id: run_id.clone(),
            cancel: cancel.clone(),
        });
        self.log.info("controller", format!("starting {operation_type} run {run_id}"));
        Ok((run_id, cancel))
    }

    /// Finalize the currently running operation exactly once, regardless of
    /// success or failure (§4.13).
    fn complete_run(&self, run_id: &str, outcome: &std::result::Result<(), ClassifiedError>) -> Option<FinalizedRun> {
        *self.running.lock() = None;
        match outcome {
            Ok(()) => {
                self.breaker.record_success();
                self.log.info("controller", format!("run {run_id} finished successfully"));
            }
            Err(classified) => {
                self.breaker.record_failure();
                self.log.error("controller", format!("run {run_id} failed: {}", classified.message));
            }
        }
        self.stats.end_run_by_id(run_id)
    }

    /// Generate, optimize, and persist a plan for `config_path` without
    /// downloading anything (§4.13, `plan` subcommand).
    pub async fn plan(&self, config_path: &std::path::Path) -> Result<PlanOutcome> {
        let (run_id, cancel) = self.begin_run("plan")?;

        let result = self.run_plan(config_path, cancel).await;
        let outcome = result.as_ref().map(|_| ()).map_err(classify_error);
        self.complete_run(&run_id, &outcome);
        result
    }

    async fn run_plan(&self, config_path: &std::path::Path, cancel: CancellationToken) -> Result<PlanOutcome> {
        let loaded = load_config(config_path)?;
        let ctx = GenerationContext {
            spotify: Arc::clone(&self.spotify),
            audio: Arc::clone(&self.audio),
            cancel,
            log: self.log.clone(),
        };
        let mut plan = generator::generate(&loaded.config, &loaded.hash, &loaded.file_name, &ctx).await?;
        optimizer::optimize(&mut plan, loaded.config.settings.check_existing_files);
        save_plan(&self.cache_dir, &plan)?;
        Ok(PlanOutcome {
            plan,
            config_hash: loaded.hash,
        })
    }

    /// Load a previously saved plan for `config_path` and execute it
    /// (§4.13, `download` subcommand). Items already marked completed in
    /// resume state are pre-skipped before dispatch when `settings.resume`.
    pub async fn download(&self, config_path: &std::path::Path) -> Result<DownloadOutcome> {
        let (run_id, cancel) = self.begin_run("download")?;

        let result = self.run_download(config_path, cancel).await;
        let outcome = result.as_ref().map(|_| ()).map_err(classify_error);
        self.complete_run(&run_id, &outcome);
        result
    }

    async fn run_download(&self, config_path: &std::path::Path, cancel: CancellationToken) -> Result<DownloadOutcome> {
        let loaded = load_config(config_path)?;
        let plan = load_plan(&self.cache_dir, &loaded.hash)?;
        let settings: Settings = loaded.config.settings;

        self.resume.set_total(plan.tracks().count());
        if settings.resume {
            for item in plan.tracks() {
                if self.resume.is_completed(&item.item_id) && item.status() == crate::plan::model::Status::Pending {
                    item.mark_skipped();
                }
            }
        }

        let resume = &self.resume;
        let stats = &self.stats;
        let breaker = &self.breaker;
        let callback: ItemCallback = Arc::new(move |item_id, status, bytes| {
            match status {
                crate::plan::model::Status::Completed => {
                    stats.record_downloaded(bytes.unwrap_or(0));
                    let _ = resume.mark_completed(item_id);
                }
                crate::plan::model::Status::Failed => {
                    stats.record_failed();
                    breaker.record_failure();
                    resume.mark_failed(item_id, "", "", "download failed", true);
                }
                crate::plan::model::Status::Skipped => {
                    stats.record_skipped();
                }
                _ => {}
            }
        });

        let executor = Executor::with_shutdown(
            Arc::clone(&self.audio),
            Arc::clone(&self.spotify),
            self.log.clone(),
            cancel.clone(),
        );
        let summary = executor.execute(&plan, &settings, Some(callback)).await?;
        if let Err(e) = self.resume.flush() {
            self.log.warn("controller", format!("failed to flush resume state: {e}"));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(err) = partial_failure_error(&plan) {
            return Err(err);
        }

        Ok(DownloadOutcome {
            summary,
            finalized: None,
        })
    }

    pub fn resume_status(&self) -> (usize, usize, usize) {
        self.resume.get_status()
    }

    pub fn cumulative_stats(&self) -> crate::stats::CumulativeStats {
        self.stats.cumulative()
    }
}
