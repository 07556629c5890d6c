//! Run coordination: one exclusive run at a time, sources crawled with
//! bounded concurrency, then archival and primary-occurrence maintenance.

use crate::config::{Config, NormalizeConfig};
use crate::error::{DetailError, IngestError, Result};
use crate::infra::{AssetStore, FsAssetStore};
use crate::metrics::{EventOutcome, RunMetrics};
use crate::pipeline::ingestion::Fetcher;
use crate::pipeline::processing::catalog::UpsertEngine;
use crate::pipeline::processing::dedup::find_duplicate;
use crate::pipeline::processing::normalize::normalize;
use crate::pipeline::processing::quality_gate::validate;
use crate::pipeline::storage::{LockOutcome, SqliteStorage, Storage};
use crate::sources::{SourceAdapter, SourceContext};
use crate::types::{IngestResult, IngestRun, RawEventStub, SourceResult};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub concurrency: usize,
    pub lock_stale_after: Duration,
    pub source_timeout: std::time::Duration,
    pub archive_after: Duration,
    pub primary_grace: Duration,
    pub high_res_min_kb: u32,
    pub normalize: NormalizeConfig,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.ingest.concurrency.max(1),
            lock_stale_after: Duration::minutes(config.ingest.lock_stale_after_mins),
            source_timeout: config.ingest.source_timeout(),
            archive_after: Duration::hours(config.ingest.archive_after_hours),
            primary_grace: Duration::hours(config.ingest.primary_grace_hours),
            high_res_min_kb: config.images.high_res_min_kb,
            normalize: config.normalize.clone(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum StubOutcome {
    Created,
    Updated,
    Skipped,
}

enum StubFailure {
    /// Normalization or validation turned the event away
    Rejected(String),
    /// Persistence failed
    Failed(String),
}

/// Drives ingestion runs. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RunCoordinator {
    storage: Arc<dyn Storage>,
    upsert: Arc<UpsertEngine>,
    ctx: SourceContext,
    settings: Arc<RunSettings>,
}

impl RunCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        fetcher: Arc<Fetcher>,
        assets: Option<Arc<dyn AssetStore>>,
        settings: RunSettings,
    ) -> Self {
        let upsert = Arc::new(UpsertEngine::new(storage.clone(), assets, settings.high_res_min_kb));
        Self {
            storage,
            upsert,
            ctx: SourceContext::new(fetcher),
            settings: Arc::new(settings),
        }
    }

    /// Wire the production stack: SQLite catalog, shared fetcher, optional image store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&config.database.path)?);
        let fetcher = Arc::new(
            Fetcher::from_config(&config.fetch)
                .map_err(|e| IngestError::Fatal(format!("failed to build HTTP client: {e}")))?,
        );
        let assets: Option<Arc<dyn AssetStore>> = if config.images.enabled {
            Some(Arc::new(FsAssetStore::new(fetcher.clone(), config.images.dir.clone())))
        } else {
            None
        };
        Ok(Self::new(storage, fetcher, assets, RunSettings::from_config(config)))
    }

    /// Run every adapter once and fold the results into the catalog.
    ///
    /// Fails fast with `LockContention` when another run holds the lock. Once
    /// the lock is taken the run row is always finalized, even if the run
    /// body panics.
    #[instrument(skip(self, adapters), fields(sources = adapters.len()))]
    pub async fn run_ingestion(&self, adapters: Vec<Arc<dyn SourceAdapter>>) -> Result<IngestResult> {
        let mut run = IngestRun::start(Utc::now());
        self.acquire_lock(&run).await?;
        info!(run_id = %run.id, "Starting ingestion run");

        let this = self.clone();
        let run_id = run.id;
        let body = tokio::spawn(async move { this.execute(run_id, adapters).await });
        let outcome = match body.await {
            Ok(outcome) => outcome,
            Err(e) => Err(IngestError::Fatal(format!("run task aborted: {e}"))),
        };
        self.finalize(&mut run, outcome).await
    }

    /// Archival and primary recompute only, under the same lock as a full run.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<IngestResult> {
        let mut run = IngestRun::start(Utc::now());
        self.acquire_lock(&run).await?;
        info!(run_id = %run.id, "Starting maintenance sweep");

        let outcome = async {
            let (archived, primaries) = self.maintain(Utc::now()).await?;
            Ok::<_, IngestError>(IngestResult { run_id: run.id, archived, primaries, ..Default::default() })
        }
        .await;
        self.finalize(&mut run, outcome).await
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestRun>> {
        Ok(self.storage.recent_runs(limit).await?)
    }

    async fn acquire_lock(&self, run: &IngestRun) -> Result<()> {
        match self.storage.acquire_run_lock(run, self.settings.lock_stale_after).await? {
            LockOutcome::Acquired { released_stale } => {
                if released_stale > 0 {
                    warn!(released_stale, "Took over from stale run(s)");
                }
                Ok(())
            }
            LockOutcome::Held { run_id, started_at } => {
                RunMetrics::lock_contention();
                warn!(%run_id, %started_at, "Ingestion already running");
                Err(IngestError::LockContention { run_id: run_id.to_string(), started_at })
            }
        }
    }

    async fn finalize(&self, run: &mut IngestRun, outcome: Result<IngestResult>) -> Result<IngestResult> {
        match &outcome {
            Ok(result) => {
                run.complete(result, Utc::now());
                RunMetrics::run_finished("completed");
                info!(
                    run_id = %run.id,
                    total = result.total,
                    created = result.created,
                    updated = result.updated,
                    skipped = result.skipped,
                    errors = result.errors.len(),
                    archived = result.archived,
                    "Ingestion run completed"
                );
            }
            Err(e) => {
                run.fail(e.to_string(), Utc::now());
                RunMetrics::run_finished("failed");
                error!(run_id = %run.id, error = %e, "Ingestion run failed");
            }
        }

        if let Err(e) = self.storage.finish_run(run).await {
            error!(run_id = %run.id, error = %e, "Failed to finalize run row");
            if outcome.is_ok() {
                return Err(e.into());
            }
        }
        outcome
    }

    async fn execute(&self, run_id: Uuid, adapters: Vec<Arc<dyn SourceAdapter>>) -> Result<IngestResult> {
        let mut result = IngestResult { run_id, ..Default::default() };
        let mut queue = adapters.into_iter();
        let mut tasks: JoinSet<SourceResult> = JoinSet::new();

        for adapter in queue.by_ref().take(self.settings.concurrency) {
            self.spawn_source(&mut tasks, adapter);
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(source) => result.absorb(source),
                Err(e) => result.errors.push(format!("source task failed: {e}")),
            }
            if let Some(next) = queue.next() {
                self.spawn_source(&mut tasks, next);
            }
        }

        let (archived, primaries) = self.maintain(Utc::now()).await?;
        result.archived = archived;
        result.primaries = primaries;
        Ok(result)
    }

    fn spawn_source(&self, tasks: &mut JoinSet<SourceResult>, adapter: Arc<dyn SourceAdapter>) {
        let this = self.clone();
        tasks.spawn(async move { this.run_source_guarded(adapter).await });
    }

    /// Run one source under its time budget. Timeouts and panics become the
    /// source's fatal error; progress made before that is kept.
    async fn run_source_guarded(&self, adapter: Arc<dyn SourceAdapter>) -> SourceResult {
        let name = adapter.name().to_string();
        let started = Instant::now();
        let progress = Arc::new(Mutex::new(SourceResult { source_name: name.clone(), ..Default::default() }));

        let this = self.clone();
        let task_progress = progress.clone();
        let inner = tokio::spawn(async move { this.run_source(adapter, task_progress).await });
        let abort = inner.abort_handle();

        let fatal = match tokio::time::timeout(self.settings.source_timeout, inner).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("source task panicked: {e}")),
            Err(_) => {
                abort.abort();
                Some(format!("timed out after {}s", self.settings.source_timeout.as_secs()))
            }
        };

        let mut source = update(&progress, |r| r.clone());
        if let Some(fatal) = fatal {
            error!(source = %name, error = %fatal, "Source aborted");
            source.fatal_error = Some(fatal);
        }
        source.duration_ms = started.elapsed().as_millis() as u64;
        RunMetrics::source_finished(&name, started.elapsed().as_secs_f64(), source.fatal_error.is_some());
        info!(
            source = %name,
            total = source.total,
            created = source.created,
            updated = source.updated,
            skipped = source.skipped,
            errors = source.errors.len(),
            duration_ms = source.duration_ms,
            "Source finished"
        );
        source
    }

    async fn run_source(&self, adapter: Arc<dyn SourceAdapter>, progress: Arc<Mutex<SourceResult>>) {
        let name = adapter.name().to_string();
        let stubs = match adapter.list(&self.ctx).await {
            Ok(stubs) => stubs,
            Err(e) => {
                error!(source = %name, error = %e, "Listing failed");
                update(&progress, |r| r.fatal_error = Some(format!("listing failed: {e}")));
                return;
            }
        };
        info!(source = %name, stubs = stubs.len(), "Listing fetched");

        for stub in &stubs {
            update(&progress, |r| r.total += 1);
            let outcome = self.process_stub(adapter.as_ref(), stub).await;
            let metric = match outcome {
                Ok(StubOutcome::Created) => {
                    update(&progress, |r| r.created += 1);
                    EventOutcome::Created
                }
                Ok(StubOutcome::Updated) => {
                    update(&progress, |r| r.updated += 1);
                    EventOutcome::Updated
                }
                Ok(StubOutcome::Skipped) => {
                    update(&progress, |r| r.skipped += 1);
                    EventOutcome::Skipped
                }
                Err(StubFailure::Rejected(reason)) => {
                    debug!(source = %name, title = %stub.title, %reason, "Event rejected");
                    update(&progress, |r| {
                        r.skipped += 1;
                        r.errors.push(format!("{}: {}: {}", name, stub.title, reason));
                    });
                    EventOutcome::Rejected
                }
                Err(StubFailure::Failed(reason)) => {
                    error!(source = %name, title = %stub.title, %reason, "Failed to store event");
                    update(&progress, |r| {
                        r.skipped += 1;
                        r.errors.push(format!("{}: {}: {}", name, stub.title, reason));
                    });
                    EventOutcome::Failed
                }
            };
            RunMetrics::event(&name, metric);
        }
    }

    async fn process_stub(
        &self,
        adapter: &dyn SourceAdapter,
        stub: &RawEventStub,
    ) -> std::result::Result<StubOutcome, StubFailure> {
        let detail = match adapter.detail(&self.ctx, stub).await {
            Ok(detail) => detail,
            Err(DetailError::NotFound) => {
                debug!(source = adapter.name(), url = %stub.url, "Detail page gone; skipping");
                return Ok(StubOutcome::Skipped);
            }
            Err(e) => {
                warn!(source = adapter.name(), url = %stub.url, error = %e, "Detail failed; using listing data");
                None
            }
        };

        let now = Utc::now();
        let event = normalize(
            stub,
            adapter.name(),
            adapter.source_url(),
            detail.as_ref(),
            now,
            &self.settings.normalize,
        )
        .map_err(|e| StubFailure::Rejected(e.to_string()))?;

        let report = validate(&event, now);
        for warning in &report.warnings {
            debug!(source = adapter.name(), title = %event.title, %warning, "Quality warning");
        }
        if !report.valid {
            return Err(StubFailure::Rejected(report.error_summary()));
        }

        let existing = find_duplicate(&event, self.storage.as_ref())
            .await
            .map_err(|e| StubFailure::Failed(e.to_string()))?;
        let outcome = self
            .upsert
            .upsert(&event, existing, now)
            .await
            .map_err(|e| StubFailure::Failed(e.to_string()))?;
        Ok(if outcome.created { StubOutcome::Created } else { StubOutcome::Updated })
    }

    /// Archive stale records, then recompute primary occurrences.
    async fn maintain(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let archived = self.storage.archive_stale(now - self.settings.archive_after, now).await?;
        RunMetrics::archived(archived);
        let primaries = self
            .storage
            .recompute_primary_occurrences(now - self.settings.primary_grace)
            .await?;
        info!(archived, primaries, "Catalog maintenance done");
        Ok((archived, primaries))
    }
}

fn update<T>(progress: &Mutex<SourceResult>, f: impl FnOnce(&mut SourceResult) -> T) -> T {
    match progress.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}
