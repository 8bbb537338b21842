//! Ingestion Worker Pool: bounded-concurrency bulk fetch into staging.
//!
//! A semaphore bounds how many identifiers are in flight; the shared rate
//! limiter inside the client bounds how fast requests leave. Workers never
//! wait on each other, only on those two. Every candidate ends in exactly one
//! [`RunOutcome`] recorded on the run row.

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use regis_client::{FetchError, FetchOutcome, RateLimiter, RegistryClient};
use regis_core::{
  ExternalId,
  extract::{NewExtract, SourceTag},
  run::{DiscoveryStrategy, IngestionRun, NewRun, RunOutcome, RunStatus},
  store::RegistryStore,
};
use serde::{Deserialize, Serialize};
use tokio::{
  sync::{Semaphore, watch},
  task::JoinSet,
  time::Instant,
};
use uuid::Uuid;

use crate::{
  config::IngestConfig,
  discovery::{Discovered, Discovery},
  error::IngestError,
};

/// Parameters of one bulk run. Unset fields fall back to [`IngestConfig`]
/// and the limiter's ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
  pub strategy:        DiscoveryStrategy,
  #[serde(default)]
  pub max_identifiers: Option<u64>,
  #[serde(default)]
  pub concurrency:     Option<usize>,
  #[serde(default, alias = "rate")]
  pub rate_per_sec:    Option<f64>,
}

impl BulkRequest {
  pub fn new(strategy: DiscoveryStrategy) -> Self {
    Self { strategy, max_identifiers: None, concurrency: None, rate_per_sec: None }
  }
}

pub struct IngestionPool<S, C> {
  store:   Arc<S>,
  client:  Arc<C>,
  limiter: Arc<RateLimiter>,
  config:  IngestConfig,
}

impl<S, C> Clone for IngestionPool<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:   self.store.clone(),
      client:  self.client.clone(),
      limiter: self.limiter.clone(),
      config:  self.config.clone(),
    }
  }
}

fn store_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> IngestError {
  IngestError::Store(Box::new(e))
}

impl<S, C> IngestionPool<S, C>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  /// `limiter` must be the one `client` draws its tokens from.
  pub fn new(
    store: Arc<S>,
    client: Arc<C>,
    limiter: Arc<RateLimiter>,
    config: IngestConfig,
  ) -> Self {
    Self { store, client, limiter, config }
  }

  /// Record a new run in `running` state without starting it.
  pub async fn create_run(&self, request: &BulkRequest) -> Result<IngestionRun, IngestError> {
    if let Some(rate) = request.rate_per_sec
      && !(rate.is_finite() && rate > 0.0)
    {
      return Err(IngestError::InvalidRequest(format!(
        "rate_per_sec must be a positive number, got {rate}"
      )));
    }
    let concurrency = request.concurrency.unwrap_or(self.config.concurrency).max(1);
    let rate = request
      .rate_per_sec
      .unwrap_or(self.limiter.ceiling())
      .min(self.limiter.ceiling());

    let run = self
      .store
      .create_run(NewRun {
        strategy:        request.strategy.label(),
        max_identifiers: request.max_identifiers.unwrap_or(self.config.max_identifiers),
        concurrency:     concurrency as u32,
        rate_per_sec:    rate,
      })
      .await
      .map_err(store_err)?;

    tracing::info!(
      run_id = %run.run_id,
      strategy = %run.strategy,
      max = run.max_identifiers,
      concurrency = run.concurrency,
      rate = run.rate_per_sec,
      "bulk run created"
    );
    Ok(run)
  }

  /// Create and execute a run in one go.
  pub async fn run(
    &self,
    request: BulkRequest,
    shutdown: watch::Receiver<bool>,
  ) -> Result<IngestionRun, IngestError> {
    let run = self.create_run(&request).await?;
    self.execute(run, request.strategy, shutdown).await
  }

  /// Drive a created run to completion, or until `shutdown` turns `true`.
  ///
  /// On shutdown no further identifiers are dispatched, in-flight ones
  /// finish, and the run is finalized as `cancelled` with its partial
  /// counts.
  pub async fn execute(
    &self,
    run: IngestionRun,
    strategy: DiscoveryStrategy,
    mut shutdown: watch::Receiver<bool>,
  ) -> Result<IngestionRun, IngestError> {
    let previous_rate = self.limiter.rate();
    self.limiter.set_rate(run.rate_per_sec);

    let semaphore = Arc::new(Semaphore::new(run.concurrency.max(1) as usize));
    let progress = Arc::new(Progress::new(run.max_identifiers, self.config.progress_every));
    let mut discovery = Discovery::new(
      &strategy,
      &self.config,
      run.max_identifiers,
      self.store.clone(),
      self.client.clone(),
    );
    let mut tasks = JoinSet::new();
    let mut cancelled = false;

    loop {
      let permit = tokio::select! {
        biased;
        _ = stop_requested(&mut shutdown) => { cancelled = true; break; }
        permit = semaphore.clone().acquire_owned() => permit,
      };
      let Ok(permit) = permit else { break };

      let candidate = tokio::select! {
        biased;
        _ = stop_requested(&mut shutdown) => { cancelled = true; break; }
        next = discovery.next() => next,
      };
      let Some(candidate) = candidate else { break };

      let worker = Worker {
        store:    self.store.clone(),
        client:   self.client.clone(),
        run_id:   run.run_id,
        progress: progress.clone(),
      };
      tasks.spawn(async move {
        let _permit = permit;
        worker.process(candidate).await;
      });

      while let Some(joined) = tasks.try_join_next() {
        report_join(joined);
      }
    }

    if cancelled {
      tracing::warn!(run_id = %run.run_id, in_flight = tasks.len(), "shutdown requested");
    }
    while let Some(joined) = tasks.join_next().await {
      report_join(joined);
    }
    self.limiter.set_rate(previous_rate);

    let status = if cancelled { RunStatus::Cancelled } else { RunStatus::Completed };
    let run = self
      .store
      .finish_run(run.run_id, status)
      .await
      .map_err(store_err)?;

    tracing::info!(
      run_id = %run.run_id,
      status = %run.status,
      attempted = run.attempted,
      succeeded = run.succeeded,
      failed = run.failed,
      skipped = run.skipped,
      "bulk run finished"
    );
    Ok(run)
  }
}

/// Resolves once the flag is `true`. Never resolves if the sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
  if shutdown.wait_for(|stop| *stop).await.is_err() {
    std::future::pending::<()>().await;
  }
}

fn report_join(joined: Result<(), tokio::task::JoinError>) {
  if let Err(e) = joined {
    tracing::error!(error = %e, "ingest task aborted");
  }
}

// ─── Worker ──────────────────────────────────────────────────────────────────

struct Worker<S, C> {
  store:    Arc<S>,
  client:   Arc<C>,
  run_id:   Uuid,
  progress: Arc<Progress>,
}

impl<S: RegistryStore, C: RegistryClient> Worker<S, C> {
  async fn process(&self, candidate: Discovered) {
    let outcome = match candidate {
      Discovered::Fresh(id) => {
        tracing::debug!(external_id = %id, "recently ingested, skipping");
        RunOutcome::Skipped
      }
      Discovered::Fetch(id) => self.ingest(&id).await,
    };

    if let Err(e) = self.store.record_outcome(self.run_id, outcome).await {
      tracing::error!(run_id = %self.run_id, error = %e, "could not record outcome");
    }
    self.progress.tick();
  }

  async fn ingest(&self, id: &ExternalId) -> RunOutcome {
    match self.client.fetch(id).await {
      Ok(FetchOutcome::Found(raw)) => {
        let extracts = NewExtract::from_raw(&raw, SourceTag::BulkDiscovery);
        match self.store.append_fetch(extracts).await {
          Ok(_) => RunOutcome::Succeeded,
          Err(e) => {
            tracing::error!(external_id = %id, error = %e, "staging failed");
            RunOutcome::Failed
          }
        }
      }
      Ok(FetchOutcome::NotFound) => {
        tracing::debug!(external_id = %id, "not found upstream");
        RunOutcome::Skipped
      }
      Err(e) => {
        self.record_failure(id, &e).await;
        RunOutcome::Failed
      }
    }
  }

  async fn record_failure(&self, id: &ExternalId, error: &FetchError) {
    let row = NewExtract::failed(id.clone(), SourceTag::BulkDiscovery, error.to_string());
    if let Err(e) = self.store.append_extract(row).await {
      tracing::error!(external_id = %id, error = %e, "could not stage failure");
    }
  }
}

// ─── Progress ────────────────────────────────────────────────────────────────

struct Progress {
  done:    AtomicU64,
  total:   u64,
  every:   u64,
  started: Instant,
}

impl Progress {
  fn new(total: u64, every: u64) -> Self {
    Self { done: AtomicU64::new(0), total, every: every.max(1), started: Instant::now() }
  }

  fn tick(&self) {
    let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
    if done % self.every != 0 {
      return;
    }
    let elapsed = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
    let rate = done as f64 / elapsed;
    let eta_secs = (self.total.saturating_sub(done) as f64 / rate).round() as u64;
    tracing::info!(
      processed = done,
      max = self.total,
      rate_per_sec = (rate * 100.0).round() / 100.0,
      eta_secs,
      "bulk progress"
    );
  }
}
