//! Scripted in-memory registry for the pipeline tests.

use std::{
  collections::HashMap,
  sync::atomic::{AtomicU32, Ordering},
  time::Duration,
};

use parking_lot::Mutex;
use regis_client::{Candidate, FetchError, FetchOutcome, RegistryClient, SearchParams};
use regis_core::{ExternalId, extract::RawRecord};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub enum Script {
  Found(Value),
  NotFound,
  Transient,
  Fatal,
  Panic,
}

#[derive(Default)]
pub struct FakeRegistry {
  scripts:  Mutex<HashMap<ExternalId, Script>>,
  searches: Mutex<HashMap<String, Vec<Candidate>>>,
  fetches:  Mutex<HashMap<ExternalId, u32>>,
  calls:    AtomicU32,
  delay:    Duration,
}

pub fn id(raw: &str) -> ExternalId { ExternalId::parse(raw).unwrap() }

/// A nested upstream record with one officer and one address.
pub fn record(name: &str, officer: &str, city: &str) -> Value {
  json!({
    "company": {
      "name": name,
      "legalForm": { "text": "GmbH" },
      "status": "aktiv",
      "officers": [{ "fullName": officer, "role": "Geschäftsführer" }],
      "addresses": [{ "street": "Hauptstraße", "houseNumber": "1",
                      "postalCode": "1010", "city": city }]
    }
  })
}

fn search_key(params: &SearchParams) -> String {
  [&params.legal_form, &params.locality, &params.name]
    .into_iter()
    .flatten()
    .map(String::as_str)
    .collect::<Vec<_>>()
    .join("/")
    .to_lowercase()
}

impl FakeRegistry {
  pub fn new() -> Self { Self::default() }

  /// Every fetch sleeps for `delay` before answering.
  pub fn with_delay(delay: Duration) -> Self { Self { delay, ..Self::default() } }

  pub fn script(&self, raw: &str, script: Script) {
    self.scripts.lock().insert(id(raw), script);
  }

  pub fn company(&self, raw: &str, name: &str) {
    self.script(raw, Script::Found(record(name, "Jane Doe", "wien")));
  }

  /// Hits for a search whose filters join to `key`, e.g. `"GES/90001"`.
  /// Matched case-insensitively.
  pub fn search_result(&self, key: &str, hits: &[(&str, &str)]) {
    let hits = hits
      .iter()
      .map(|(raw, name)| Candidate { external_id: id(raw), name: Some(name.to_string()) })
      .collect();
    self.searches.lock().insert(key.to_lowercase(), hits);
  }

  pub fn fetch_calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }

  pub fn calls_for(&self, raw: &str) -> u32 {
    self.fetches.lock().get(&id(raw)).copied().unwrap_or(0)
  }
}

impl RegistryClient for FakeRegistry {
  async fn fetch(&self, external_id: &ExternalId) -> Result<FetchOutcome, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    *self.fetches.lock().entry(external_id.clone()).or_default() += 1;
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    let script = self.scripts.lock().get(external_id).cloned();
    match script.unwrap_or(Script::NotFound) {
      Script::Found(body) => Ok(FetchOutcome::Found(RawRecord {
        external_id: external_id.clone(),
        body,
      })),
      Script::NotFound => Ok(FetchOutcome::NotFound),
      Script::Transient => Err(FetchError::Transient("503 Service Unavailable".into())),
      Script::Fatal => Err(FetchError::Fatal("401 Unauthorized".into())),
      Script::Panic => panic!("scripted panic for {external_id}"),
    }
  }

  async fn search(&self, params: &SearchParams) -> Result<Vec<Candidate>, FetchError> {
    match self.searches.lock().get(&search_key(params)) {
      Some(hits) => Ok(hits.clone()),
      None => Err(FetchError::Transient("search backend down".into())),
    }
  }
}
