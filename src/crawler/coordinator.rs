//! Batch orchestrator - drains the target queue with a bounded worker pool
//!
//! Per target: gated conditional fetch, differential check against the
//! scrape log, hand-off to the content sink, then the scrape-log append and
//! cache commit. A failing target is recorded and the batch moves on; only
//! a state-store failure stops the run.

use crate::config::Config;
use crate::crawler::gate::RequestGate;
use crate::crawler::sink::{ContentSink, DirectorySink, SinkOutcome};
use crate::crawler::summary::RunSummary;
use crate::discovery::Discovery;
use crate::fetch::{ConditionalCache, FetchError, ReqwestTransport};
use crate::refresh::{resolve_ids, IdSetOptions, IdSource, RefreshPolicy};
use crate::state::{FailureClass, FetchTarget, TargetKind, TargetOutcome};
use crate::storage::{RunStatus, StateStore};
use crate::{HarvestError, Result};
use chrono::Utc;
use futures::future::join_all;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

/// Progress is logged every this many finished targets
const PROGRESS_INTERVAL: u64 = 10;

/// Asks a running orchestrator to stop dequeuing
///
/// In-flight requests finish (or time out) normally.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Main orchestrator structure
pub struct Orchestrator {
    store: StateStore,
    gate: Arc<RequestGate>,
    cache: ConditionalCache,
    sink: Arc<dyn ContentSink>,
    discovery: Discovery,
    config_hash: String,
    workers: usize,
    only_new: bool,
    refresh_key: String,
    refresh_policy: RefreshPolicy,
    id_options: IdSetOptions,
    stop: StopHandle,
}

/// Shared by the workers of one pass
struct RunContext {
    queue: Mutex<VecDeque<FetchTarget>>,
    summary: Mutex<RunSummary>,
    abort: Mutex<Option<HarvestError>>,
    total: usize,
    started: std::time::Instant,
}

impl Orchestrator {
    /// Wires an orchestrator from its collaborators
    pub fn new(
        config: &Config,
        config_hash: impl Into<String>,
        store: StateStore,
        gate: RequestGate,
        sink: Arc<dyn ContentSink>,
    ) -> Result<Self> {
        let engine = &config.engine;
        let cache = ConditionalCache::new(store.clone(), engine.cache_days, engine.only_new);

        Ok(Self {
            discovery: Discovery::from_config(&config.discovery)?,
            cache,
            store,
            gate: Arc::new(gate),
            sink,
            config_hash: config_hash.into(),
            workers: engine.workers.max(1) as usize,
            only_new: engine.only_new,
            refresh_key: config.discovery.key.clone(),
            refresh_policy: engine.leaders_refresh,
            id_options: IdSetOptions {
                reuse_ids: engine.reuse_ids.as_ref().map(PathBuf::from),
                export_ids: engine.export_ids.as_ref().map(PathBuf::from),
            },
            stop: StopHandle::default(),
        })
    }

    /// Production wiring: SQLite store, reqwest transport, directory sink
    pub fn from_config(config: &Config, config_hash: impl Into<String>) -> Result<Self> {
        let store = StateStore::open(Path::new(&config.output.database_path))?;
        let transport = ReqwestTransport::new(Duration::from_secs(
            config.engine.request_timeout_secs,
        ))?;
        let gate = RequestGate::from_config(config, Arc::new(transport))?;
        let sink = Arc::new(DirectorySink::new(&config.output.content_dir));

        Self::new(config, config_hash, store, gate, sink)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    /// Produces this run's targets
    ///
    /// Discovery only runs when the refresh policy says it is due and no
    /// identifier file is being reused.
    pub async fn resolve_targets(&self) -> Result<Vec<FetchTarget>> {
        let discovered_kind = OnceLock::new();
        let discovery = &self.discovery;
        let gate = self.gate.as_ref();
        let kind_slot = &discovered_kind;

        let resolved = resolve_ids(
            &self.store,
            &self.refresh_key,
            self.refresh_policy,
            &self.id_options,
            Utc::now(),
            move || async move {
                let found = discovery.discover(gate).await?;
                let _ = kind_slot.set(found.kind);
                Ok(found.ids)
            },
        )
        .await?;

        let kind = match resolved.source {
            IdSource::Refreshed => discovered_kind
                .get()
                .copied()
                .unwrap_or(TargetKind::Listed),
            IdSource::Reused(_) | IdSource::Stored { .. } => TargetKind::Supplied,
        };

        let targets = self.discovery.targets(&resolved.ids, kind);
        tracing::info!(
            "Resolved {} identifiers into {} targets ({})",
            resolved.ids.len(),
            targets.len(),
            kind
        );
        Ok(targets)
    }

    /// Resolves targets and processes them as one recorded run
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Per-class counts for the run; individual target
    ///   failures are counted here rather than returned
    /// * `Err(HarvestError)` - Target resolution failed or the state store
    ///   became unusable. The run row is marked failed first.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use delta_harvest::config::load_config_with_hash;
    /// use delta_harvest::crawler::Orchestrator;
    /// use std::path::Path;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let (config, hash) = load_config_with_hash(Path::new("harvest.toml"))?;
    /// let orchestrator = Orchestrator::from_config(&config, &hash)?;
    /// let summary = orchestrator.run().await?;
    /// println!("{} processed", summary.processed);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = self.store.create_run(&self.config_hash)?;
        tracing::info!("Starting run {}", run_id);

        match self.resolve_targets().await {
            Ok(targets) => self.execute(run_id, targets).await,
            Err(e) => {
                tracing::error!("Run {} could not resolve its targets: {}", run_id, e);
                if let Err(finish_err) =
                    self.store
                        .finish_run(run_id, RunStatus::Failed, &Default::default())
                {
                    tracing::error!("Could not mark run {} failed: {}", run_id, finish_err);
                }
                Err(e)
            }
        }
    }

    /// Processes an explicit target list as one recorded run
    pub async fn run_targets(&self, targets: Vec<FetchTarget>) -> Result<RunSummary> {
        let run_id = self.store.create_run(&self.config_hash)?;
        tracing::info!("Starting run {} over {} supplied targets", run_id, targets.len());
        self.execute(run_id, targets).await
    }

    async fn execute(&self, run_id: i64, targets: Vec<FetchTarget>) -> Result<RunSummary> {
        let context = RunContext {
            total: targets.len(),
            queue: Mutex::new(VecDeque::from(targets)),
            summary: Mutex::new(RunSummary::new(run_id)),
            abort: Mutex::new(None),
            started: std::time::Instant::now(),
        };

        let workers = self.workers.min(context.total).max(1);
        tracing::debug!("Draining {} targets with {} workers", context.total, workers);
        join_all((0..workers).map(|worker| self.worker(worker, &context))).await;

        let RunContext {
            queue,
            summary,
            abort,
            started,
            ..
        } = context;
        let mut summary = summary.into_inner().unwrap_or_else(PoisonError::into_inner);
        let abort = abort.into_inner().unwrap_or_else(PoisonError::into_inner);
        let remaining = queue.into_inner().unwrap_or_else(PoisonError::into_inner).len();
        summary.interrupted = remaining > 0;

        if let Some(e) = abort {
            let counts = summary.counts();
            if let Err(finish_err) = self.store.finish_run(run_id, RunStatus::Failed, &counts) {
                tracing::error!("Could not mark run {} failed: {}", run_id, finish_err);
            }
            tracing::error!("Run {} aborted: {}", run_id, e);
            return Err(e);
        }

        let status = if summary.interrupted {
            tracing::warn!("Run {} stopped with {} targets left in the queue", run_id, remaining);
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        self.store.finish_run(run_id, status, &summary.counts())?;

        tracing::info!(
            "Run {} finished in {:?}: {} processed, {} skipped (unchanged), {} failed",
            run_id,
            started.elapsed(),
            summary.processed,
            summary.skipped_unchanged,
            summary.failed()
        );
        Ok(summary)
    }

    async fn worker(&self, worker: usize, context: &RunContext) {
        loop {
            if self.stop.is_stopped() || lock(&context.abort).is_some() {
                break;
            }
            let Some(target) = lock(&context.queue).pop_front() else {
                break;
            };

            let outcome = match self.process(&target).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("State store failure on {}, stopping: {}", target, e);
                    lock(&context.abort).get_or_insert(e);
                    break;
                }
            };

            match &outcome {
                TargetOutcome::Failed { .. } | TargetOutcome::SkippedParseMiss { .. } => {
                    tracing::warn!("[worker {}] {}: {}", worker, target, outcome)
                }
                _ => tracing::debug!("[worker {}] {}: {}", worker, target, outcome),
            }

            let (done, processed) = {
                let mut summary = lock(&context.summary);
                summary.record(&target, &outcome);
                (summary.total(), summary.processed)
            };

            if done % PROGRESS_INTERVAL == 0 {
                let elapsed = context.started.elapsed();
                tracing::info!(
                    "Progress: {}/{} targets, {} processed, {:.2} targets/sec",
                    done,
                    context.total,
                    processed,
                    done as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
                );
            }
        }
    }

    /// Runs one target; `Err` only for failures that must stop the run
    pub async fn process(&self, target: &FetchTarget) -> Result<TargetOutcome> {
        match self.try_process(target).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal_for_run() => Err(e),
            Err(e) => Ok(TargetOutcome::failed(classify_failure(&e), e.to_string())),
        }
    }

    async fn try_process(&self, target: &FetchTarget) -> Result<TargetOutcome> {
        let gate = self.gate.as_ref();
        let url = target.url.as_str();
        let fetched = self
            .cache
            .fetch(url, move |validators| async move { gate.get(url, &validators).await })
            .await?;

        if !fetched.changed {
            return Ok(TargetOutcome::SkippedUnchanged);
        }

        let content = fetched.text().unwrap_or_default();
        let decision = self.store.should_process(target, &content, self.only_new)?;
        if !decision.process {
            tracing::debug!("{} changed bytes but not content", target);
            self.cache.commit(&fetched)?;
            return Ok(TargetOutcome::SkippedUnchanged);
        }

        match self.sink.accept(target, &content).await? {
            SinkOutcome::Stored => {
                let appended =
                    self.store
                        .commit_processed(target, &decision.normalized_hash, self.only_new)?;
                self.cache.commit(&fetched)?;
                Ok(match appended {
                    Some(_) => TargetOutcome::Processed,
                    None => TargetOutcome::SkippedUnchanged,
                })
            }
            SinkOutcome::ParseMiss(reason) => Ok(TargetOutcome::SkippedParseMiss { reason }),
        }
    }
}

/// Maps a per-target error onto the failure taxonomy
pub fn classify_failure(error: &HarvestError) -> FailureClass {
    match error {
        HarvestError::Fetch(FetchError::Retryable { .. }) | HarvestError::Reqwest(_) => {
            FailureClass::Transient
        }
        HarvestError::Fetch(FetchError::Hostile { .. }) | HarvestError::RobotsDenied { .. } => {
            FailureClass::Hostile
        }
        HarvestError::BreakerOpen { .. } => FailureClass::BreakerOpen,
        HarvestError::AuthExpired { .. } | HarvestError::Login(_) => FailureClass::AuthExpired,
        HarvestError::Sink { .. } | HarvestError::Io(_) => FailureClass::Sink,
        HarvestError::Fetch(FetchError::Missing { .. }) => FailureClass::Missing,
        _ => FailureClass::Fatal,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
