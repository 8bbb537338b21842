//! SQLite backend for the registry pipeline: staging extracts, canonical
//! entities and ingestion runs in one database file.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. That thread also serializes
//! writers, so every per-company transaction commits atomically with respect
//! to concurrent readers.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
