//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, NaiveDate, TimeZone as _, Utc};
use serde_json::json;
use uuid::Uuid;

use regis_core::{
  ExternalId,
  canonical::{CompanyFields, CompanyQuery, CompanySnapshot},
  extract::{ExtractKind, IngestStatus, NewExtract, SourceTag},
  payload::{AddressRecord, LinkRecord, LinkType, OfficerRecord},
  run::{NewRun, RunOutcome, RunStatus},
  store::RegistryStore,
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn id(raw: &str) -> ExternalId { ExternalId::parse(raw).unwrap() }

fn officer(name: &str) -> OfficerRecord {
  OfficerRecord {
    title:       None,
    first_name:  None,
    last_name:   None,
    full_name:   name.to_owned(),
    role:        Some("Geschäftsführer".into()),
    birth_date:  NaiveDate::from_ymd_opt(1975, 6, 30),
    is_active:   true,
    version_tag: Some("3".into()),
  }
}

fn address(city: &str) -> AddressRecord {
  AddressRecord {
    street:         Some("Hauptplatz".into()),
    house_number:   Some("1".into()),
    stairway:       None,
    door_number:    None,
    postal_code:    Some("8010".into()),
    city:           Some(city.to_owned()),
    state:          None,
    country:        "AT".into(),
    is_deliverable: true,
    is_active:      true,
    version_tag:    None,
  }
}

fn fields(name: &str) -> CompanyFields {
  CompanyFields {
    name:       name.to_owned(),
    legal_form: Some("GmbH".into()),
    status:     Some("aktiv".into()),
    city:       Some("Graz".into()),
    country:    Some("AT".into()),
  }
}

fn snapshot(external: &str, name: &str, minute: u32) -> CompanySnapshot {
  let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
  let mut snap = CompanySnapshot::new(id(external), at);
  snap.company = Some(fields(name));
  snap.fetched_at = Some(at);
  snap
}

// ─── Staging ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_assigns_strictly_increasing_timestamps() {
  let s = store().await;
  let fnr = id("100A");

  let mut stamps = vec![];
  for n in 0..5 {
    let extract = s
      .append_extract(NewExtract::payload(
        fnr.clone(),
        ExtractKind::Company,
        SourceTag::BulkDiscovery,
        json!({ "name": format!("Acme {n}") }),
      ))
      .await
      .unwrap();
    assert_eq!(extract.status, IngestStatus::Ok);
    assert!(extract.payload_digest.is_some());
    stamps.push(extract.extracted_at);
  }

  assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn append_fetch_shares_one_timestamp() {
  let s = store().await;
  let fnr = id("100A");
  let before = s
    .append_extract(NewExtract::failed(fnr.clone(), SourceTag::OnDemand, "timeout"))
    .await
    .unwrap();

  let staged = s
    .append_fetch(vec![
      NewExtract::payload(fnr.clone(), ExtractKind::Company, SourceTag::OnDemand, json!({ "name": "Acme" })),
      NewExtract::payload(fnr.clone(), ExtractKind::Officers, SourceTag::OnDemand, json!([])),
      NewExtract::payload(fnr.clone(), ExtractKind::Addresses, SourceTag::OnDemand, json!([])),
    ])
    .await
    .unwrap();

  assert_eq!(staged.len(), 3);
  assert!(staged.iter().all(|e| e.extracted_at == staged[0].extracted_at));
  assert!(staged[0].extracted_at > before.extracted_at);
  assert_eq!(s.latest_extracts(&fnr).await.unwrap().len(), 3);
  assert!(s.append_fetch(vec![]).await.unwrap().is_empty());
}

#[tokio::test]
async fn latest_extracts_picks_newest_ok_per_kind() {
  let s = store().await;
  let fnr = id("200B");

  for name in ["Old GmbH", "New GmbH"] {
    s.append_extract(NewExtract::payload(
      fnr.clone(),
      ExtractKind::Company,
      SourceTag::BulkDiscovery,
      json!({ "name": name }),
    ))
    .await
    .unwrap();
  }
  s.append_extract(NewExtract::payload(
    fnr.clone(),
    ExtractKind::Officers,
    SourceTag::OnDemand,
    json!([{ "fullName": "Jane Doe" }]),
  ))
  .await
  .unwrap();
  // A later failure must not hide the last good snapshot.
  s.append_extract(NewExtract::failed(fnr.clone(), SourceTag::OnDemand, "timeout"))
    .await
    .unwrap();

  let latest = s.latest_extracts(&fnr).await.unwrap();
  assert_eq!(latest.len(), 2);
  let company = latest.iter().find(|e| e.kind == ExtractKind::Company).unwrap();
  assert_eq!(company.payload, Some(json!({ "name": "New GmbH" })));

  let all = s.list_extracts(&fnr, None).await.unwrap();
  assert_eq!(all.len(), 4);
  assert_eq!(all[0].status, IngestStatus::Error);
  assert_eq!(all[0].error_detail.as_deref(), Some("timeout"));
  assert!(all[0].payload.is_none());

  let limited = s.list_extracts(&fnr, Some(2)).await.unwrap();
  assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn last_ingested_ignores_error_rows() {
  let s = store().await;
  let fnr = id("300");

  s.append_extract(NewExtract::failed(fnr.clone(), SourceTag::BulkDiscovery, "503"))
    .await
    .unwrap();
  assert!(s.last_ingested_at(&fnr).await.unwrap().is_none());

  let ok = s
    .append_extract(NewExtract::payload(
      fnr.clone(),
      ExtractKind::Company,
      SourceTag::BulkDiscovery,
      json!({ "name": "X" }),
    ))
    .await
    .unwrap();
  assert_eq!(s.last_ingested_at(&fnr).await.unwrap(), Some(ok.extracted_at));
}

#[tokio::test]
async fn pending_normalization_tracks_canonical_watermark() {
  let s = store().await;
  for raw in ["1A", "2B", "3C"] {
    s.append_extract(NewExtract::payload(
      id(raw),
      ExtractKind::Company,
      SourceTag::BulkDiscovery,
      json!({ "name": raw }),
    ))
    .await
    .unwrap();
  }

  let pending = s.pending_normalization(None, 10).await.unwrap();
  assert_eq!(pending, vec![id("1A"), id("2B"), id("3C")]);

  let page = s.pending_normalization(Some(&id("1A")), 1).await.unwrap();
  assert_eq!(page, vec![id("2B")]);

  // Normalizing 2B at its newest extract time clears it.
  let newest = s.last_ingested_at(&id("2B")).await.unwrap().unwrap();
  let mut snap = CompanySnapshot::new(id("2B"), newest);
  snap.company = Some(fields("2B"));
  s.apply_snapshot(snap).await.unwrap();

  let pending = s.pending_normalization(None, 10).await.unwrap();
  assert_eq!(pending, vec![id("1A"), id("3C")]);
}

// ─── Canonical ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn apply_snapshot_without_company_and_without_row_writes_nothing() {
  let s = store().await;
  let mut snap = CompanySnapshot::new(id("404"), Utc::now());
  snap.officers = Some(vec![officer("Ghost")]);

  assert!(s.apply_snapshot(snap).await.unwrap().is_none());
  assert!(s.load_profile(&id("404")).await.unwrap().is_none());
}

#[tokio::test]
async fn apply_snapshot_replaces_rosters_wholesale() {
  let s = store().await;

  let mut first = snapshot("500", "Alpha GmbH", 0);
  first.officers = Some(vec![officer("Anna"), officer("Bernd")]);
  first.addresses = Some(vec![address("Graz")]);
  first.address_summary = Some("Hauptplatz 1, 8010 Graz".into());
  let created = s.apply_snapshot(first).await.unwrap().unwrap();

  let mut second = snapshot("500", "Alpha Holding GmbH", 5);
  second.officers = Some(vec![officer("Carla")]);
  second.addresses = Some(vec![]);
  second.address_summary = None;
  let updated = s.apply_snapshot(second).await.unwrap().unwrap();

  assert_eq!(updated.name, "Alpha Holding GmbH");
  assert_eq!(updated.created_at, created.created_at);
  assert!(updated.updated_at > created.updated_at);
  assert!(updated.address_summary.is_none());

  let profile = s.load_profile(&id("500")).await.unwrap().unwrap();
  let names: Vec<_> = profile.officers.iter().map(|o| o.officer.full_name.as_str()).collect();
  assert_eq!(names, vec!["Carla"]);
  assert!(profile.addresses.is_empty());
}

#[tokio::test]
async fn absent_kinds_are_left_untouched() {
  let s = store().await;

  let mut first = snapshot("600", "Beta KG", 0);
  first.officers = Some(vec![officer("Dora")]);
  s.apply_snapshot(first).await.unwrap();

  // Company slice failed validation this time; officers are not re-sent.
  let later = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
  let snap = CompanySnapshot::new(id("600"), later);
  let company = s.apply_snapshot(snap).await.unwrap().unwrap();

  assert_eq!(company.name, "Beta KG");
  assert_eq!(company.last_normalized_at, later);
  let profile = s.load_profile(&id("600")).await.unwrap().unwrap();
  assert_eq!(profile.officers.len(), 1);
}

#[tokio::test]
async fn applying_the_same_snapshot_twice_is_identical() {
  let s = store().await;
  let build = || {
    let mut snap = snapshot("700", "Gamma AG", 0);
    snap.officers = Some(vec![officer("Emil"), officer("Frida")]);
    snap.addresses = Some(vec![address("Linz")]);
    snap.links = Some(vec![LinkRecord {
      target:    id("701"),
      link_type: LinkType::Ownership,
      share:     Some(100.0),
      note:      None,
    }]);
    snap
  };

  s.apply_snapshot(build()).await.unwrap();
  let first = s.load_profile(&id("700")).await.unwrap().unwrap();
  s.apply_snapshot(build()).await.unwrap();
  let second = s.load_profile(&id("700")).await.unwrap().unwrap();

  assert_eq!(first, second);
  assert_eq!(
    serde_json::to_string(&first).unwrap(),
    serde_json::to_string(&second).unwrap()
  );
}

#[tokio::test]
async fn links_collapse_on_natural_key() {
  let s = store().await;
  let link = |share: f64| LinkRecord {
    target:    id("801"),
    link_type: LinkType::Ownership,
    share:     Some(share),
    note:      None,
  };

  let mut first = snapshot("800", "Delta GmbH", 0);
  first.links = Some(vec![link(40.0), link(40.0)]);
  s.apply_snapshot(first).await.unwrap();

  let mut second = snapshot("800", "Delta GmbH", 1);
  second.links = Some(vec![
    link(60.0),
    LinkRecord { link_type: LinkType::Management, ..link(0.0) },
  ]);
  s.apply_snapshot(second).await.unwrap();

  let profile = s.load_profile(&id("800")).await.unwrap().unwrap();
  assert_eq!(profile.links.len(), 2);
  let ownership = profile
    .links
    .iter()
    .find(|l| l.link_type == LinkType::Ownership)
    .unwrap();
  assert_eq!(ownership.share, Some(60.0));
  assert_eq!(ownership.target_key.as_str(), "AT-801");
}

#[tokio::test]
async fn find_by_name_ignores_case_and_spacing() {
  let s = store().await;
  s.apply_snapshot(snapshot("900", "Österreich  Handel GmbH", 0))
    .await
    .unwrap();

  let found = s.find_by_name(" österreich handel gmbh ").await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].external_id, id("900"));
  assert!(s.find_by_name("Handel").await.unwrap().is_empty());
}

#[tokio::test]
async fn search_matches_any_token_and_filters() {
  let s = store().await;
  s.apply_snapshot(snapshot("1001", "Bäckerei Huber", 0)).await.unwrap();
  s.apply_snapshot(snapshot("1002", "Huber & Söhne", 0)).await.unwrap();
  s.apply_snapshot(snapshot("1003", "Maier 100% Bio", 0)).await.unwrap();

  let hits = s
    .search_companies(&CompanyQuery { text: Some("huber".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(hits.len(), 2);

  let hits = s
    .search_companies(&CompanyQuery {
      text: Some("bäckerei maier".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(hits.len(), 2);

  // `%` is literal, not a wildcard.
  let hits = s
    .search_companies(&CompanyQuery { text: Some("0%".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);

  let hits = s
    .search_companies(&CompanyQuery {
      city: Some("GRAZ".into()),
      limit: Some(2),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn search_ranks_whole_name_and_token_count_before_truncating() {
  let s = store().await;
  for n in 1..=120u32 {
    let raw = n.to_string();
    s.apply_snapshot(snapshot(&raw, &format!("Aaa Hotel {n:03}"), 0)).await.unwrap();
  }
  s.apply_snapshot(snapshot("900", "Hotel Alpenrose Wien", 0)).await.unwrap();
  s.apply_snapshot(snapshot("901", "Hotel Alpenrose", 0)).await.unwrap();

  let hits = s
    .search_companies(&CompanyQuery {
      text: Some("Hotel  Alpenrose".into()),
      limit: Some(3),
      ..Default::default()
    })
    .await
    .unwrap();
  let names: Vec<_> = hits.iter().map(|c| c.name.as_str()).collect();
  assert_eq!(names, vec!["Hotel Alpenrose", "Hotel Alpenrose Wien", "Aaa Hotel 001"]);
}

// ─── Runs ────────────────────────────────────────────────────────────────────

fn new_run() -> NewRun {
  NewRun {
    strategy:        "localities".into(),
    max_identifiers: 10,
    concurrency:     4,
    rate_per_sec:    1.0,
  }
}

#[tokio::test]
async fn run_counters_accumulate_and_freeze() {
  let s = store().await;
  let run = s.create_run(new_run()).await.unwrap();
  assert_eq!(run.status, RunStatus::Running);

  for outcome in [RunOutcome::Succeeded, RunOutcome::Succeeded, RunOutcome::Failed] {
    s.record_outcome(run.run_id, outcome).await.unwrap();
  }
  s.record_outcome(run.run_id, RunOutcome::Skipped).await.unwrap();

  let finished = s.finish_run(run.run_id, RunStatus::Cancelled).await.unwrap();
  assert_eq!(finished.status, RunStatus::Cancelled);
  assert_eq!(
    (finished.attempted, finished.succeeded, finished.failed, finished.skipped),
    (4, 2, 1, 1)
  );
  assert!(finished.finished_at.is_some());

  // Read-only afterwards.
  s.record_outcome(run.run_id, RunOutcome::Succeeded).await.unwrap();
  let again = s.finish_run(run.run_id, RunStatus::Completed).await.unwrap();
  assert_eq!(again.attempted, 4);
  assert_eq!(again.status, RunStatus::Cancelled);
  assert_eq!(s.get_run(run.run_id).await.unwrap(), Some(again));
}

#[tokio::test]
async fn unknown_run_is_reported() {
  let s = store().await;
  let missing = Uuid::new_v4();
  assert!(s.get_run(missing).await.unwrap().is_none());
  assert!(s.record_outcome(missing, RunOutcome::Failed).await.is_err());
  assert!(s.finish_run(missing, RunStatus::Completed).await.is_err());
}

#[tokio::test]
async fn latest_extract_is_the_newest_append() {
  let s = store().await;
  let fnr = id("1100");
  let first = s
    .append_extract(NewExtract::payload(
      fnr.clone(),
      ExtractKind::Links,
      SourceTag::BulkDiscovery,
      json!([]),
    ))
    .await
    .unwrap();
  let second = s
    .append_extract(NewExtract::payload(
      fnr.clone(),
      ExtractKind::Links,
      SourceTag::BulkDiscovery,
      json!([{ "target": "1" }]),
    ))
    .await
    .unwrap();
  assert!(second.extracted_at - first.extracted_at >= Duration::microseconds(1));

  let latest = s.latest_extracts(&fnr).await.unwrap();
  assert_eq!(latest[0].extract_id, second.extract_id);
}
