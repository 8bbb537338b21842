//! Discovery Engine: a lazy, deduplicated stream of candidate identifiers.
//!
//! Upstream searches are issued only when the buffer of pending identifiers
//! runs dry, so a run bounded by `max_count` never searches further than it
//! needs. Identifiers ingested within the freshness window are still yielded,
//! tagged [`Discovered::Fresh`], so the run can count them as skipped.

use std::{
  collections::{HashSet, VecDeque},
  sync::Arc,
};

use chrono::Utc;
use regis_client::{RegistryClient, SearchParams};
use regis_core::{ExternalId, run::DiscoveryStrategy, store::RegistryStore};

use crate::config::IngestConfig;

/// Range probes are materialised this many at a time.
const RANGE_CHUNK: usize = 64;
const MAX_REGISTER_NUMBER: u32 = 99_999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
  /// Needs fetching.
  Fetch(ExternalId),
  /// Ingested recently; nothing to do.
  Fresh(ExternalId),
}

impl Discovered {
  pub fn id(&self) -> &ExternalId {
    match self {
      Self::Fetch(id) | Self::Fresh(id) => id,
    }
  }
}

enum Source {
  Search(SearchParams),
  Range { next: Option<u32>, end: u32, step: u32 },
  Ids(Vec<ExternalId>),
}

pub struct Discovery<S, C> {
  store:     Arc<S>,
  client:    Arc<C>,
  sources:   VecDeque<Source>,
  buffer:    VecDeque<ExternalId>,
  seen:      HashSet<ExternalId>,
  yielded:   u64,
  max_count: u64,
  freshness: chrono::Duration,
}

impl<S, C> Discovery<S, C>
where
  S: RegistryStore,
  C: RegistryClient,
{
  pub fn new(
    strategy: &DiscoveryStrategy,
    config: &IngestConfig,
    max_count: u64,
    store: Arc<S>,
    client: Arc<C>,
  ) -> Self {
    let mut sources = VecDeque::new();
    plan(strategy, config, &mut sources);
    Self {
      store,
      client,
      sources,
      buffer: VecDeque::new(),
      seen: HashSet::new(),
      yielded: 0,
      max_count,
      freshness: config.freshness(),
    }
  }

  /// The next candidate, or `None` once `max_count` candidates were yielded
  /// or every source is exhausted.
  pub async fn next(&mut self) -> Option<Discovered> {
    while self.yielded < self.max_count {
      let Some(id) = self.buffer.pop_front() else {
        if self.refill().await {
          continue;
        }
        return None;
      };
      if !self.seen.insert(id.clone()) {
        continue;
      }
      self.yielded += 1;
      return Some(if self.is_fresh(&id).await {
        Discovered::Fresh(id)
      } else {
        Discovered::Fetch(id)
      });
    }
    None
  }

  /// Pull more identifiers from the next source. `false` when none remain.
  async fn refill(&mut self) -> bool {
    let Some(source) = self.sources.pop_front() else { return false };
    match source {
      Source::Ids(ids) => self.buffer.extend(ids),
      Source::Range { mut next, end, step } => {
        for _ in 0..RANGE_CHUNK {
          let Some(n) = next.filter(|n| *n <= end) else { break };
          if let Ok(id) = ExternalId::parse(&n.to_string()) {
            self.buffer.push_back(id);
          }
          next = n.checked_add(step);
        }
        if next.is_some_and(|n| n <= end) {
          self.sources.push_front(Source::Range { next, end, step });
        }
      }
      Source::Search(params) => match self.client.search(&params).await {
        Ok(hits) => {
          tracing::debug!(?params, hits = hits.len(), "discovery search");
          self.buffer.extend(hits.into_iter().map(|c| c.external_id));
        }
        // One failed query only narrows the run.
        Err(e) => tracing::warn!(?params, error = %e, "discovery search failed"),
      },
    }
    true
  }

  async fn is_fresh(&self, id: &ExternalId) -> bool {
    match self.store.last_ingested_at(id).await {
      Ok(Some(at)) => Utc::now() - at <= self.freshness,
      Ok(None) => false,
      Err(e) => {
        tracing::warn!(external_id = %id, error = %e, "freshness lookup failed");
        false
      }
    }
  }
}

fn plan(strategy: &DiscoveryStrategy, config: &IngestConfig, out: &mut VecDeque<Source>) {
  let search = |legal_form: Option<&String>, locality: &String| {
    Source::Search(SearchParams {
      name:       None,
      legal_form: legal_form.cloned(),
      locality:   Some(locality.clone()),
      limit:      config.search_limit,
    })
  };

  match strategy {
    DiscoveryStrategy::Localities => {
      out.extend(config.localities.iter().map(|l| search(None, l)));
    }
    DiscoveryStrategy::LegalForms => {
      for form in &config.legal_forms {
        out.extend(config.localities.iter().map(|l| search(Some(form), l)));
      }
    }
    // Register numbers have at most eight digits; anything above can never
    // parse, so the range is clamped rather than walked.
    DiscoveryStrategy::IdRange { start, end, step } => {
      let end = (*end).min(MAX_REGISTER_NUMBER);
      if *start <= end {
        out.push_back(Source::Range { next: Some(*start), end, step: (*step).max(1) });
      } else {
        tracing::warn!(start = *start, end, "identifier range lies outside register numbers");
      }
    }
    DiscoveryStrategy::Explicit { ids } => out.push_back(Source::Ids(ids.clone())),
    DiscoveryStrategy::Chain { strategies } => {
      for s in strategies {
        plan(s, config, out);
      }
    }
  }
}
