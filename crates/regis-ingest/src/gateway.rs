//! Fetch-on-Miss Gateway: local lookups that fall back to one coalesced
//! upstream fetch.
//!
//! Concurrent misses for the same identifier (or the same normalized name)
//! share a single in-flight task. The task runs detached on the runtime, so a
//! caller that gives up after `resolve_timeout` does not cancel the fetch for
//! everyone else, and the flight entry is removed when the task ends however
//! it ends, panics included.
//!
//! Free-text search never leaves the canonical store.

use std::{collections::HashMap, future::Future, sync::Arc};

use chrono::Utc;
use futures::{
  FutureExt,
  future::{BoxFuture, Shared},
};
use fuzzy_matcher::{FuzzyMatcher, skim::SkimMatcherV2};
use parking_lot::Mutex;
use regis_client::{FetchError, FetchOutcome, RegistryClient, SearchParams};
use regis_core::{
  ExternalId,
  canonical::{CanonicalCompany, CompanyProfile, CompanyQuery},
  clean::{clean_text, match_key},
  extract::{NewExtract, SourceTag},
  store::RegistryStore,
};
use serde::Serialize;
use tokio::time::Instant;

use crate::{config::GatewayConfig, error::GatewayError, normalize::Normalizer};

type Result<T, E = GatewayError> = std::result::Result<T, E>;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
  Identifier(ExternalId),
  /// Case-insensitive exact company name.
  ExactName(String),
  /// Fuzzy search over canonical names. Never fetches.
  Text { q: String, limit: Option<usize> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedProfile {
  #[serde(flatten)]
  pub profile: CompanyProfile,
  /// Served from the local copy because upstream could not refresh it.
  pub stale:   bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  Company(Box<ResolvedProfile>),
  Companies(Vec<CanonicalCompany>),
  NotFound,
}

impl Resolution {
  fn profile(profile: CompanyProfile, stale: bool) -> Self {
    Self::Company(Box::new(ResolvedProfile { profile, stale }))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FlightKey {
  Id(ExternalId),
  Name(String),
}

type Flight = Shared<BoxFuture<'static, Result<Resolution>>>;

const PREFILTER_FACTOR: usize = 20;
const PREFILTER_MIN: usize = 500;

// ─── Gateway ─────────────────────────────────────────────────────────────────

pub struct Gateway<S, C> {
  inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for Gateway<S, C> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

struct Inner<S, C> {
  store:      Arc<S>,
  client:     Arc<C>,
  normalizer: Normalizer<S>,
  config:     GatewayConfig,
  flights:    Mutex<HashMap<FlightKey, Flight>>,
  /// Identifiers upstream reported missing, and when.
  misses:     Mutex<HashMap<ExternalId, Instant>>,
}

impl<S, C> Gateway<S, C>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  pub fn new(store: Arc<S>, client: Arc<C>, config: GatewayConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        normalizer: Normalizer::new(store.clone()),
        store,
        client,
        config,
        flights: Mutex::new(HashMap::new()),
        misses: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub async fn resolve(&self, query: Query) -> Result<Resolution> {
    match query {
      Query::Identifier(id) => self.inner.by_id(id).await,
      Query::ExactName(name) => self.inner.by_name(name).await,
      Query::Text { q, limit } => self.inner.search(&q, limit).await.map(Resolution::Companies),
    }
  }

  /// Number of fetches currently in flight.
  pub fn in_flight(&self) -> usize { self.inner.flights.lock().len() }
}

// ─── Lookup paths ────────────────────────────────────────────────────────────

impl<S, C> Inner<S, C>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  async fn by_id(self: &Arc<Self>, id: ExternalId) -> Result<Resolution> {
    let local = self.store.load_profile(&id).await.map_err(GatewayError::store)?;
    if let Some(profile) = &local {
      if profile.company.is_fresh(Utc::now(), self.config.staleness()) {
        return Ok(Resolution::profile(profile.clone(), false));
      }
    } else if self.recently_missing(&id) {
      return Ok(Resolution::NotFound);
    }

    let key = FlightKey::Id(id.clone());
    let flight = self.join(key, move |inner| async move { inner.fetch_by_id(id).await });
    self.await_flight(flight, local).await
  }

  async fn by_name(self: &Arc<Self>, name: String) -> Result<Resolution> {
    let Some(name) = clean_text(&name) else { return Ok(Resolution::NotFound) };
    let mut hits = self.store.find_by_name(&name).await.map_err(GatewayError::store)?;

    match hits.len() {
      0 => {
        let key = FlightKey::Name(match_key(&name));
        let flight = self.join(key, move |inner| async move { inner.fetch_by_name(name).await });
        self.await_flight(flight, None).await
      }
      1 => {
        let company = hits.remove(0);
        self.by_id(company.external_id).await
      }
      _ => Ok(Resolution::Companies(hits)),
    }
  }

  async fn search(&self, q: &str, limit: Option<usize>) -> Result<Vec<CanonicalCompany>> {
    let Some(q) = clean_text(q) else { return Ok(vec![]) };
    let limit = limit.unwrap_or(self.config.search_limit).max(1);

    // The store ranks by matched tokens; fuzzy scoring reorders a wide
    // window of its best rows.
    let query = CompanyQuery {
      text: Some(q.clone()),
      limit: Some(limit.saturating_mul(PREFILTER_FACTOR).max(PREFILTER_MIN)),
      ..CompanyQuery::default()
    };
    let prefiltered = self
      .store
      .search_companies(&query)
      .await
      .map_err(GatewayError::store)?;

    let matcher = SkimMatcherV2::default().ignore_case();
    let tokens: Vec<&str> = q.split_whitespace().collect();
    let mut ranked: Vec<(i64, CanonicalCompany)> = prefiltered
      .into_iter()
      .filter_map(|company| {
        let whole = matcher.fuzzy_match(&company.name, &q);
        let parts: i64 = tokens
          .iter()
          .filter_map(|t| matcher.fuzzy_match(&company.name, t))
          .sum();
        (whole.is_some() || parts > 0).then(|| (whole.unwrap_or(0) * 2 + parts, company))
      })
      .collect();

    ranked.sort_by(|(a, x), (b, y)| b.cmp(a).then_with(|| x.name.cmp(&y.name)));
    ranked.truncate(limit);
    Ok(ranked.into_iter().map(|(_, company)| company).collect())
  }

  /// Wait for a flight, bounded by `resolve_timeout`. Upstream trouble is
  /// masked by `local` when there is one.
  async fn await_flight(
    &self,
    flight: Flight,
    local: Option<CompanyProfile>,
  ) -> Result<Resolution> {
    let waited = tokio::time::timeout(self.config.resolve_timeout(), flight).await;
    let error = match waited {
      Ok(Ok(resolution)) => return Ok(resolution),
      Ok(Err(e @ GatewayError::Store(_))) => return Err(e),
      Ok(Err(e)) => e,
      Err(_) => GatewayError::Unavailable(format!(
        "no upstream answer within {}s",
        self.config.resolve_timeout().as_secs()
      )),
    };

    match local {
      Some(profile) => {
        tracing::warn!(
          external_id = %profile.company.external_id,
          error = %error,
          "serving stale copy"
        );
        Ok(Resolution::profile(profile, true))
      }
      None => Err(error),
    }
  }

  // ── Flights ───────────────────────────────────────────────────────────

  /// Join the flight for `key`, starting `work` if none is running.
  fn join<F, Fut>(self: &Arc<Self>, key: FlightKey, work: F) -> Flight
  where
    F: FnOnce(Arc<Self>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Resolution>> + Send + 'static,
  {
    let mut flights = self.flights.lock();
    if let Some(flight) = flights.get(&key) {
      tracing::debug!(?key, "joining in-flight lookup");
      return flight.clone();
    }

    let landing = Landing { inner: self.clone(), key: key.clone() };
    let task = tokio::spawn(async move {
      let landing = landing;
      work(landing.inner.clone()).await
    });
    let flight = async move {
      task.await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "lookup task died");
        Err(GatewayError::Unavailable(format!("lookup failed: {e}")))
      })
    }
    .boxed()
    .shared();

    flights.insert(key, flight.clone());
    flight
  }

  async fn fetch_by_id(self: Arc<Self>, id: ExternalId) -> Result<Resolution> {
    match self.client.fetch(&id).await {
      Ok(FetchOutcome::Found(raw)) => {
        let extracts = NewExtract::from_raw(&raw, SourceTag::OnDemand);
        self.store.append_fetch(extracts).await.map_err(GatewayError::store)?;
        self.normalizer.normalize(&id).await?;
        self.misses.lock().remove(&id);

        let profile = self.store.load_profile(&id).await.map_err(GatewayError::store)?;
        Ok(profile.map_or(Resolution::NotFound, |p| Resolution::profile(p, false)))
      }
      Ok(FetchOutcome::NotFound) => {
        tracing::debug!(external_id = %id, "not found upstream");
        self.remember_miss(id);
        Ok(Resolution::NotFound)
      }
      Err(e) => {
        let row = NewExtract::failed(id.clone(), SourceTag::OnDemand, e.to_string());
        if let Err(store) = self.store.append_extract(row).await {
          tracing::error!(external_id = %id, error = %store, "could not stage failure");
        }
        Err(match e {
          FetchError::Transient(detail) => GatewayError::Unavailable(detail),
          FetchError::Fatal(detail) | FetchError::Config(detail) => GatewayError::Fatal(detail),
        })
      }
    }
  }

  async fn fetch_by_name(self: Arc<Self>, name: String) -> Result<Resolution> {
    let params = SearchParams {
      name: Some(name.clone()),
      limit: self.config.name_candidates,
      ..SearchParams::default()
    };
    let mut candidates = self.client.search(&params).await.map_err(|e| match e {
      FetchError::Transient(detail) => GatewayError::Unavailable(detail),
      other => GatewayError::Fatal(other.to_string()),
    })?;

    // Exact matches first; the sort is stable so upstream order is kept
    // within each group.
    let wanted = match_key(&name);
    candidates.sort_by_key(|c| c.name.as_deref().map(match_key).as_ref() != Some(&wanted));
    candidates.truncate(self.config.name_candidates.max(1));

    let mut last_error = None;
    for candidate in candidates {
      let id = candidate.external_id;
      let flight = self.join(FlightKey::Id(id.clone()), move |inner| async move {
        inner.fetch_by_id(id).await
      });
      match flight.await {
        Ok(found @ Resolution::Company(_)) => return Ok(found),
        Ok(_) => continue,
        Err(e) => {
          tracing::warn!(name = %name, error = %e, "candidate fetch failed");
          last_error = Some(e);
        }
      }
    }
    last_error.map_or(Ok(Resolution::NotFound), Err)
  }

  /// Record a miss, dropping entries that have outlived the TTL.
  fn remember_miss(&self, id: ExternalId) {
    let ttl = self.config.negative_ttl();
    let mut misses = self.misses.lock();
    misses.retain(|_, at| at.elapsed() < ttl);
    misses.insert(id, Instant::now());
  }

  /// Number of identifiers currently negatively cached.
  #[cfg(test)]
  fn cached_misses(&self) -> usize { self.misses.lock().len() }

  fn recently_missing(&self, id: &ExternalId) -> bool {
    let mut misses = self.misses.lock();
    match misses.get(id).copied() {
      Some(at) if at.elapsed() < self.config.negative_ttl() => true,
      Some(_) => {
        misses.remove(id);
        false
      }
      None => false,
    }
  }
}

/// Removes its flight entry when the owning task ends or unwinds.
struct Landing<S, C> {
  inner: Arc<Inner<S, C>>,
  key:   FlightKey,
}

impl<S, C> Drop for Landing<S, C> {
  fn drop(&mut self) { self.inner.flights.lock().remove(&self.key); }
}
