//! [`HttpRegistryClient`]: the registry's JSON REST API over reqwest.
//!
//! - `GET {base}/api/v1/company/{id}` returns one raw company record.
//! - `GET {base}/api/v1/search/company?q=&limit=` returns search hits, either
//!   as a bare list or under `results`/`data`.

use reqwest::{Client, StatusCode};
use serde_json::Value;

use regis_core::{ExternalId, extract::RawRecord};

use crate::{
  Candidate, FetchOutcome, RegistryClient, SearchParams,
  config::RegistryConfig,
  error::{FetchError, Result},
};

const ID_KEYS: &[&str] =
  &["fnr", "registerId", "register_id", "registerNumber", "register_number"];
const NAME_KEYS: &[&str] = &["name", "companyName", "company_name", "firmenwortlaut"];

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpRegistryClient {
  client:   Client,
  base_url: String,
  api_key:  Option<String>,
}

impl HttpRegistryClient {
  pub fn new(config: &RegistryConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| FetchError::Config(e.to_string()))?;
    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_owned(),
      api_key: config.api_key.clone().filter(|k| !k.is_empty()),
    })
  }

  fn url(&self, path: &str) -> String { format!("{}/api/v1{}", self.base_url, path) }

  fn get(&self, path: &str) -> reqwest::RequestBuilder {
    let req = self
      .client
      .get(self.url(path))
      .header(reqwest::header::ACCEPT, "application/json");
    match &self.api_key {
      Some(key) => req.bearer_auth(key),
      None => req,
    }
  }
}

// ─── Classification ──────────────────────────────────────────────────────────

/// Map a non-success, non-404 status to an error class.
pub fn classify_status(status: StatusCode) -> FetchError {
  let retryable = status.is_server_error()
    || matches!(status.as_u16(), 408 | 425 | 429);
  if retryable {
    FetchError::Transient(format!("upstream returned {status}"))
  } else {
    FetchError::Fatal(format!("upstream returned {status}"))
  }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
  if e.is_builder() || e.is_decode() {
    FetchError::Fatal(e.to_string())
  } else {
    FetchError::Transient(e.to_string())
  }
}

async fn json_body(resp: reqwest::Response) -> Result<Value> {
  let bytes = resp.bytes().await.map_err(classify_transport)?;
  serde_json::from_slice(&bytes)
    .map_err(|e| FetchError::Fatal(format!("undecodable response body: {e}")))
}

// ─── Search hit extraction ───────────────────────────────────────────────────

fn hit_list(body: Value) -> Vec<Value> {
  match body {
    Value::Array(items) => items,
    Value::Object(mut obj) => ["results", "data"]
      .iter()
      .find_map(|k| match obj.remove(*k) {
        Some(Value::Array(items)) => Some(items),
        _ => None,
      })
      .unwrap_or_default(),
    _ => vec![],
  }
}

fn string_at(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| match obj.get(*k)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  })
}

fn candidate(hit: &Value) -> Option<Candidate> {
  let obj = hit.as_object()?;
  let raw_id = string_at(obj, ID_KEYS)?;
  match ExternalId::parse(&raw_id) {
    Ok(external_id) => Some(Candidate { external_id, name: string_at(obj, NAME_KEYS) }),
    Err(_) => {
      tracing::debug!(raw_id, "search hit with unusable identifier");
      None
    }
  }
}

// ─── RegistryClient impl ─────────────────────────────────────────────────────

impl RegistryClient for HttpRegistryClient {
  async fn fetch(&self, id: &ExternalId) -> Result<FetchOutcome> {
    let resp = self
      .get(&format!("/company/{}", id.as_str()))
      .send()
      .await
      .map_err(classify_transport)?;

    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
      return Ok(FetchOutcome::NotFound);
    }
    if !status.is_success() {
      return Err(classify_status(status));
    }

    let body = json_body(resp).await?;
    Ok(FetchOutcome::Found(RawRecord { external_id: id.clone(), body }))
  }

  async fn search(&self, params: &SearchParams) -> Result<Vec<Candidate>> {
    let mut query: Vec<(&str, String)> = vec![("limit", params.limit.to_string())];
    if let Some(name) = &params.name {
      query.push(("q", name.clone()));
    }
    if let Some(form) = &params.legal_form {
      query.push(("legalForm", form.clone()));
    }
    if let Some(locality) = &params.locality {
      query.push(("locality", locality.clone()));
    }

    let resp = self
      .get("/search/company")
      .query(&query)
      .send()
      .await
      .map_err(classify_transport)?;

    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
      return Ok(vec![]);
    }
    if !status.is_success() {
      return Err(classify_status(status));
    }

    let hits = hit_list(json_body(resp).await?);
    Ok(hits.iter().filter_map(candidate).take(params.limit.max(1)).collect())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use axum::{
    Json, Router,
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
  };
  use serde_json::json;

  use super::*;

  async fn company(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer k3y") {
      return StatusCode::UNAUTHORIZED.into_response();
    }
    match id.as_str() {
      "1" => Json(json!({ "company": { "name": "Eins GmbH" } })).into_response(),
      "2" => StatusCode::NOT_FOUND.into_response(),
      "3" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
      "4" => StatusCode::TOO_MANY_REQUESTS.into_response(),
      "5" => (StatusCode::OK, "<html>maintenance</html>").into_response(),
      _ => StatusCode::BAD_REQUEST.into_response(),
    }
  }

  async fn search(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(q.get("locality").map(String::as_str), Some("90001"));
    Json(json!({
      "results": [
        { "fnr": "FN 11 a", "name": "Elf AG" },
        { "fnr": "not a number" },
        { "registerNumber": 12 }
      ]
    }))
  }

  async fn serve() -> HttpRegistryClient {
    let app = Router::new()
      .route("/api/v1/company/{id}", get(company))
      .route("/api/v1/search/company", get(search));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    HttpRegistryClient::new(&RegistryConfig {
      base_url: format!("http://{addr}/"),
      api_key: Some("k3y".into()),
      ..RegistryConfig::default()
    })
    .unwrap()
  }

  fn id(raw: &str) -> ExternalId { ExternalId::parse(raw).unwrap() }

  #[tokio::test]
  async fn fetch_classifies_responses() {
    let client = serve().await;

    let FetchOutcome::Found(record) = client.fetch(&id("1")).await.unwrap() else {
      panic!("expected a record");
    };
    assert_eq!(record.body["company"]["name"], "Eins GmbH");

    assert_eq!(client.fetch(&id("2")).await.unwrap(), FetchOutcome::NotFound);
    assert!(client.fetch(&id("3")).await.unwrap_err().is_transient());
    assert!(client.fetch(&id("4")).await.unwrap_err().is_transient());
    assert!(matches!(client.fetch(&id("5")).await, Err(FetchError::Fatal(_))));
    assert!(matches!(client.fetch(&id("6")).await, Err(FetchError::Fatal(_))));
  }

  #[tokio::test]
  async fn missing_credentials_are_fatal() {
    let client = serve().await;
    let anonymous = HttpRegistryClient { api_key: None, ..client };
    assert!(matches!(anonymous.fetch(&id("1")).await, Err(FetchError::Fatal(_))));
  }

  #[tokio::test]
  async fn search_parses_wrapped_hits() {
    let client = serve().await;
    let hits = client
      .search(&SearchParams {
        locality: Some("90001".into()),
        limit: 10,
        ..SearchParams::default()
      })
      .await
      .unwrap();

    let ids: Vec<_> = hits.iter().map(|c| c.external_id.as_str()).collect();
    assert_eq!(ids, vec!["11A", "12"]);
    assert_eq!(hits[0].name.as_deref(), Some("Elf AG"));
  }

  #[tokio::test]
  async fn unreachable_upstream_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpRegistryClient::new(&RegistryConfig {
      base_url: format!("http://{addr}"),
      ..RegistryConfig::default()
    })
    .unwrap();
    assert!(client.fetch(&id("1")).await.unwrap_err().is_transient());
  }

  #[test]
  fn status_classes() {
    assert!(classify_status(StatusCode::BAD_GATEWAY).is_transient());
    assert!(classify_status(StatusCode::REQUEST_TIMEOUT).is_transient());
    assert!(!classify_status(StatusCode::FORBIDDEN).is_transient());
  }
}
