//! The pipeline proper: discovery, bulk ingestion into staging,
//! normalization into the canonical store, and the fetch-on-miss gateway.
//!
//! Everything here is generic over a [`RegistryStore`] and a
//! [`RegistryClient`]; the binary picks the SQLite store and the resilient
//! HTTP client.
//!
//! [`RegistryStore`]: regis_core::store::RegistryStore
//! [`RegistryClient`]: regis_client::RegistryClient

pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod normalize;
pub mod pool;

#[cfg(test)]
mod fake;

pub use config::{GatewayConfig, IngestConfig};
pub use error::{GatewayError, IngestError, NormalizeError};
pub use gateway::{Gateway, Query, Resolution, ResolvedProfile};
pub use normalize::{NormalizeReport, Normalizer};
pub use pool::{BulkRequest, IngestionPool};
