//! Normalization Engine: latest staged extracts in, one canonical snapshot out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regis_core::{
  ExternalId,
  canonical::{CanonicalCompany, CompanyFields, CompanySnapshot},
  clean::title_case,
  payload::{AddressRecord, ExtractPayload, OfficerRecord},
  roster::diff_officers,
  store::RegistryStore,
};
use serde::Serialize;

use crate::error::NormalizeError;

/// Counts from one batch sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
  pub normalized: u64,
  /// Identifiers whose staged data could not produce a canonical row.
  pub skipped:    u64,
  pub failed:     u64,
}

pub struct Normalizer<S> {
  store: Arc<S>,
}

impl<S> Clone for Normalizer<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

fn store_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> NormalizeError {
  NormalizeError::Store(Box::new(e))
}

impl<S: RegistryStore> Normalizer<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Normalize one company from its newest successful extract of each kind.
  ///
  /// A kind whose payload fails validation is left untouched in the
  /// canonical store; the other kinds still apply.
  pub async fn normalize(
    &self,
    id: &ExternalId,
  ) -> Result<CanonicalCompany, NormalizeError> {
    let extracts = self.store.latest_extracts(id).await.map_err(store_err)?;
    let Some(normalized_at) = extracts.iter().map(|e| e.extracted_at).max() else {
      return Err(NormalizeError::NothingStaged(id.clone()));
    };

    let mut snapshot = CompanySnapshot::new(id.clone(), normalized_at);
    for extract in &extracts {
      let Some(raw) = &extract.payload else { continue };
      match ExtractPayload::decode(extract.kind, raw) {
        Ok(payload) => absorb(&mut snapshot, payload, extract.extracted_at),
        Err(e) => tracing::warn!(
          external_id = %id,
          kind = %extract.kind,
          data_quality = e.is_data_quality(),
          error = %e,
          "skipping staged payload"
        ),
      }
    }

    if let (Some(company), Some(addresses)) = (&mut snapshot.company, &snapshot.addresses) {
      if company.city.is_none() {
        company.city = first_active(addresses).and_then(|a| a.city.clone());
      }
    }

    if let Some(officers) = &snapshot.officers {
      self.report_roster(id, officers).await?;
    }

    let company = self
      .store
      .apply_snapshot(snapshot)
      .await
      .map_err(store_err)?
      .ok_or_else(|| NormalizeError::NoCompanyData(id.clone()))?;

    tracing::debug!(external_id = %id, key = %company.canonical_key, "normalized");
    Ok(company)
  }

  /// Normalize every identifier with unprocessed extracts, in external-id
  /// order. Identifiers that fail are counted and passed over.
  pub async fn normalize_pending(
    &self,
    page_size: usize,
  ) -> Result<NormalizeReport, NormalizeError> {
    let page_size = page_size.max(1);
    let mut report = NormalizeReport::default();
    let mut cursor: Option<ExternalId> = None;

    loop {
      let batch = self
        .store
        .pending_normalization(cursor.as_ref(), page_size)
        .await
        .map_err(store_err)?;

      for id in &batch {
        match self.normalize(id).await {
          Ok(_) => report.normalized += 1,
          Err(e) if e.is_skip() => {
            tracing::warn!(external_id = %id, error = %e, "not normalized");
            report.skipped += 1;
          }
          Err(e) => {
            tracing::error!(external_id = %id, error = %e, "normalization failed");
            report.failed += 1;
          }
        }
      }

      if batch.len() < page_size {
        break;
      }
      cursor = batch.last().cloned();
    }

    tracing::info!(
      normalized = report.normalized,
      skipped = report.skipped,
      failed = report.failed,
      "normalization sweep finished"
    );
    Ok(report)
  }

  async fn report_roster(
    &self,
    id: &ExternalId,
    incoming: &[OfficerRecord],
  ) -> Result<(), NormalizeError> {
    let Some(current) = self.store.load_profile(id).await.map_err(store_err)? else {
      return Ok(());
    };
    let current: Vec<_> = current.officers.into_iter().map(|o| o.officer).collect();
    let diff = diff_officers(&current, incoming);
    if !diff.is_unchanged() {
      tracing::info!(
        external_id = %id,
        retained = diff.retained.len(),
        added = diff.added.len(),
        retired = diff.retired.len(),
        "officer roster changed"
      );
    }
    Ok(())
  }
}

fn first_active(addresses: &[AddressRecord]) -> Option<&AddressRecord> {
  addresses.iter().find(|a| a.is_active)
}

fn absorb(snapshot: &mut CompanySnapshot, payload: ExtractPayload, at: DateTime<Utc>) {
  match payload {
    ExtractPayload::Company(record) => {
      snapshot.company = Some(CompanyFields {
        name:       record.name,
        legal_form: record.legal_form,
        status:     record.status,
        city:       record.city.as_deref().map(title_case),
        country:    record.country,
      });
      snapshot.fetched_at = Some(at);
    }
    ExtractPayload::Officers(officers) => snapshot.officers = Some(officers),
    ExtractPayload::Addresses(mut addresses) => {
      for address in &mut addresses {
        address.city = address.city.as_deref().map(title_case);
      }
      snapshot.address_summary = first_active(&addresses).and_then(AddressRecord::summary);
      snapshot.addresses = Some(addresses);
    }
    ExtractPayload::Links(links) => {
      let own = snapshot.external_id.clone();
      snapshot.links = Some(links.into_iter().filter(|l| l.target != own).collect());
    }
  }
}
