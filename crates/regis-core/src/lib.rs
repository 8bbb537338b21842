//! Core types and trait definitions for the company registry pipeline.
//!
//! This crate has no HTTP or database dependencies. Every other crate depends
//! on it.

// Native `async fn` in traits; `Send` bounds are spelled out on the trait.
#![allow(async_fn_in_trait)]

pub mod canonical;
pub mod clean;
pub mod error;
pub mod extract;
pub mod ids;
pub mod payload;
pub mod roster;
pub mod run;
pub mod store;

pub use error::{Error, Result};
pub use ids::{CanonicalKey, ExternalId};
