//! # Querylito Core
//!
//! Core types for the Querylito request cache.
//!
//! This crate holds everything that does not need an async runtime: how a
//! request is identified, how long its result stays fresh, how failures are
//! retried, and the state machine that every cached request goes through.
//! The async engine that drives fetches lives in `querylito-async`.
//!
//! ## Features
//!
//! - **Fingerprints**: Order-independent request identifiers (family + named parameters)
//! - **Freshness windows**: Per-family `stale_time` and `gc_time`
//! - **Retry policies**: Capped exponential backoff, cancellation never retried
//! - **Stale-while-revalidate**: Old data stays readable while a refresh runs or fails
//! - **Snapshots**: Immutable views of an entry handed to subscribers
//!
//! ## Module Organization
//!
//! - [`fingerprint`] - Request identity
//! - [`config`] - Per-family query configuration
//! - [`retry`] - Retry decisions and backoff delays
//! - [`cache_entry`] - Per-fingerprint state machine
//! - [`snapshot`] - Immutable entry views
//! - [`error`] - Fetch error taxonomy
//!
mod cache_entry;
mod config;
mod error;
mod fingerprint;
mod retry;
mod snapshot;

#[cfg(feature = "stats")]
mod stats;

pub use cache_entry::{CacheEntry, FetchId};
pub use config::QueryConfig;
pub use error::FetchError;
pub use fingerprint::{Fingerprint, Param};
pub use retry::RetryPolicy;
pub use snapshot::{FetchStatus, Snapshot};

#[cfg(feature = "stats")]
pub use stats::CacheStats;
