//! # Querylito
//!
//! The data layer of a time & weather dashboard: a request cache with
//! freshness windows, background refresh, retries and timed eviction, and
//! the request families that run on top of it.
//!
//! ## Features
//!
//! - **Request cache**: Stale-while-revalidate, request collapsing and GC of unused entries
//! - **Request families**: IP location, city search and current weather with tuned defaults
//! - **Injected transport**: Bring your own HTTP client through [`Transport`]
//! - **Session lifecycle**: [`QueryClient::interactive`] vs. [`QueryClient::for_render`]
//! - **Time helpers**: Day phases and business hours in any [`chrono::TimeZone`]
//! - **YAML configuration**: Per-family overrides via [`ClientConfig`]
//!
//! ## Quick Start
//!
//! ```
//! use futures::future::{BoxFuture, FutureExt};
//! use querylito::{Api, CancellationToken, FetchError, QueryClient, Transport};
//! use serde_json::{json, Value};
//! use url::Url;
//!
//! struct Canned;
//!
//! impl Transport for Canned {
//!     fn get_json(
//!         &self,
//!         _url: Url,
//!         _cancel: CancellationToken,
//!     ) -> BoxFuture<'static, Result<Value, FetchError>> {
//!         async {
//!             Ok(json!({
//!                 "current": {
//!                     "time": "2024-06-01T12:00",
//!                     "temperature_2m": 18.0,
//!                     "weather_code": 800
//!                 }
//!             }))
//!         }
//!         .boxed()
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = QueryClient::interactive(Api::new(Canned));
//! client.prefetch_weather(37.77, -122.42).await;
//!
//! let snapshot = client.weather(37.77, -122.42);
//! assert_eq!(snapshot.data.unwrap().temperature_c, 18.0);
//! # }
//! ```
//!
//! ## Crates
//!
//! - `querylito-core` - fingerprints, configs, retry policies and the entry state machine
//! - `querylito-async` - the Tokio engine ([`RequestCache`], [`RefreshScheduler`])
//! - `querylito` - this crate: the dashboard families built on both
pub mod api;
mod client;
mod config;
pub mod families;
pub mod store;
pub mod time;
mod types;

pub use api::{Api, Endpoints, Transport};
pub use client::{Mode, QueryClient};
pub use config::{ClientConfig, QueryOverride};
pub use families::Families;
pub use types::{City, CurrentWeather, GeoSearchResult, IpLocation};

pub use querylito_async::{
    CancellationToken, Fetcher, QueryOptions, RefreshScheduler, RequestCache, Subscription,
    Unsubscribe,
};
pub use querylito_core::{
    FetchError, FetchStatus, Fingerprint, Param, QueryConfig, RetryPolicy, Snapshot,
};

#[cfg(feature = "stats")]
pub use querylito_core::CacheStats;
