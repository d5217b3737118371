//! The dashboard's request families: how each one is keyed, configured and
//! fetched.
//!
//! | family        | stale | gc  | retries | interval refresh            |
//! |---------------|-------|-----|---------|-----------------------------|
//! | `ip`          | 12h   | 24h | 2       | none                        |
//! | `geo.search`  | 1h    | 6h  | 1       | none, disabled for `q` ≤ 1  |
//! | `weather`     | 5m    | 30m | 2       | 5m while subscribed+focused |
use std::time::Duration;

use querylito_async::{QueryOptions, RetryPolicy};
use querylito_core::QueryConfig;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::api::Api;
use crate::types::{CurrentWeather, GeoSearchResult, IpLocation};

const HOUR: Duration = Duration::from_secs(60 * 60);
const MINUTE: Duration = Duration::from_secs(60);

/// Fingerprints of the request families.
pub mod keys {
    use querylito_core::Fingerprint;

    pub const IP_LOCATION: &str = "ip";
    pub const GEO_SEARCH: &str = "geo.search";
    pub const WEATHER: &str = "weather";

    pub fn ip_location() -> Fingerprint {
        Fingerprint::new(IP_LOCATION).with("scope", "local")
    }

    pub fn geo_search(query: &str) -> Fingerprint {
        Fingerprint::new(GEO_SEARCH).with("q", query)
    }

    pub fn weather(lat: f64, lon: f64) -> Fingerprint {
        Fingerprint::new(WEATHER).with("lat", lat).with("lon", lon)
    }
}

/// A city search only runs for queries longer than one character.
pub fn geo_search_enabled(query: &str) -> bool {
    query.trim().chars().count() > 1
}

/// Per-family configuration, defaulting to the table above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Families {
    pub ip_location: QueryConfig,
    pub geo_search: QueryConfig,
    pub weather: QueryConfig,
}

impl Default for Families {
    fn default() -> Self {
        Self {
            ip_location: QueryConfig::default()
                .with_stale_time(12 * HOUR)
                .with_gc_time(24 * HOUR),
            geo_search: QueryConfig::default()
                .with_stale_time(HOUR)
                .with_gc_time(6 * HOUR)
                .with_retry(RetryPolicy {
                    max_retries: 1,
                    ..RetryPolicy::default()
                }),
            weather: QueryConfig::default()
                .with_stale_time(5 * MINUTE)
                .with_gc_time(30 * MINUTE)
                .with_refetch_on_focus(true)
                .with_refetch_interval(5 * MINUTE)
                .with_refetch_interval_in_background(false)
                .with_retry(RetryPolicy::new(
                    2,
                    Duration::from_millis(1500),
                    Duration::from_millis(8000),
                )),
        }
    }
}

impl Families {
    /// Applies `f` to every family's config.
    pub fn map(self, mut f: impl FnMut(QueryConfig) -> QueryConfig) -> Self {
        Self {
            ip_location: f(self.ip_location),
            geo_search: f(self.geo_search),
            weather: f(self.weather),
        }
    }

    pub fn ip_location_query(&self, api: &Api) -> QueryOptions<IpLocation> {
        let api = api.clone();
        QueryOptions::new(keys::ip_location(), move |cancel: CancellationToken| {
            let api = api.clone();
            async move { api.ip_location(cancel).await }
        })
        .with_config(self.ip_location.clone())
    }

    /// Search options for `query`; disabled for blank and one-character queries.
    pub fn geo_search_query(&self, api: &Api, query: &str) -> QueryOptions<Vec<GeoSearchResult>> {
        let api = api.clone();
        let owned = query.to_owned();
        let config = self.geo_search.clone();
        let enabled = config.enabled && geo_search_enabled(query);

        QueryOptions::new(keys::geo_search(query), move |cancel: CancellationToken| {
            let api = api.clone();
            let query = owned.clone();
            async move { api.search_cities(&query, cancel).await }
        })
        .with_config(config.with_enabled(enabled))
    }

    pub fn weather_query(&self, api: &Api, lat: f64, lon: f64) -> QueryOptions<CurrentWeather> {
        let api = api.clone();
        QueryOptions::new(keys::weather(lat, lon), move |cancel: CancellationToken| {
            let api = api.clone();
            async move { api.current_weather(lat, lon, cancel).await }
        })
        .with_config(self.weather.clone())
    }
}

/// IP location options with the default family config.
pub fn ip_location_query(api: &Api) -> QueryOptions<IpLocation> {
    Families::default().ip_location_query(api)
}

/// City search options with the default family config.
pub fn geo_search_query(api: &Api, query: &str) -> QueryOptions<Vec<GeoSearchResult>> {
    Families::default().geo_search_query(api, query)
}

/// Weather options with the default family config.
pub fn weather_query(api: &Api, lat: f64, lon: f64) -> QueryOptions<CurrentWeather> {
    Families::default().weather_query(api, lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weather_retry_delays() {
        let retry = Families::default().weather.retry;
        let delays: Vec<u64> = (0..5).map(|a| retry.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1500, 3000, 6000, 8000, 8000]);
        assert_eq!(retry.max_retries, 2);
    }

    #[test]
    fn test_family_windows() {
        let families = Families::default();
        assert_eq!(families.ip_location.stale_time, 12 * HOUR);
        assert_eq!(families.ip_location.gc_time, 24 * HOUR);
        assert_eq!(families.geo_search.retry.max_retries, 1);
        assert_eq!(families.geo_search.interval(), None);
        assert_eq!(families.weather.interval(), Some(5 * MINUTE));
        assert!(!families.weather.refetch_interval_in_background);
    }

    #[test]
    fn test_geo_search_enabled() {
        assert!(!geo_search_enabled(""));
        assert!(!geo_search_enabled("a"));
        assert!(!geo_search_enabled("  a  "));
        assert!(geo_search_enabled("ab"));
    }

    #[test]
    fn test_weather_keys_ignore_construction_order() {
        use querylito_core::Fingerprint;

        let swapped = Fingerprint::new(keys::WEATHER).with("lon", -0.13).with("lat", 51.5);
        assert_eq!(keys::weather(51.5, -0.13), swapped);
        assert_ne!(keys::weather(51.5, -0.13), keys::weather(-0.13, 51.5));
        assert_ne!(keys::geo_search("par"), keys::geo_search("pa"));
    }
}
