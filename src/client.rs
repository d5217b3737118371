use std::sync::Arc;

use futures::future::join_all;
use querylito_async::{RequestCache, Snapshot, Subscription, Unsubscribe};
use querylito_core::QueryConfig;
use tokio::runtime::Handle;

use crate::api::{Api, Transport};
use crate::config::ClientConfig;
use crate::families::{keys, Families};
use crate::types::{City, CurrentWeather, GeoSearchResult, IpLocation};

/// How a [`QueryClient`] is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Long-lived, follows the focus of the surface and refreshes in the background.
    Interactive,
    /// Short-lived, for producing one non-interactive render. No timers, no
    /// refetch on focus.
    Render,
}

/// The dashboard's data layer: one request cache per family, sharing one
/// [`Api`].
///
/// A client is owned by exactly one consumer. Create one with
/// [`interactive`](Self::interactive) for a user session and keep it for
/// the whole session; create a fresh one with [`for_render`](Self::for_render)
/// for every non-interactive render and drop it afterwards. The two are
/// never shared, so a render can never observe or disturb a session's
/// entries.
///
/// Dropping the client cancels its in-flight fetches and timers.
///
/// # Examples
///
/// ```no_run
/// use querylito::{Api, QueryClient, Transport};
///
/// # async fn run(transport: impl Transport) {
/// let client = QueryClient::interactive(Api::new(transport));
///
/// client.prefetch_weather(51.5074, -0.1278).await;
/// let london = client.weather(51.5074, -0.1278);
/// println!("{:?}", london.data.map(|w| w.temperature_c));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct QueryClient {
    mode: Mode,
    api: Api,
    families: Families,
    ip_location: RequestCache<IpLocation>,
    geo_search: RequestCache<Vec<GeoSearchResult>>,
    weather: RequestCache<CurrentWeather>,
}

impl QueryClient {
    /// A long-lived client for an interactive session, on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn interactive(api: Api) -> Self {
        Self::new(Mode::Interactive, api, Families::default(), Handle::current())
    }

    /// A throwaway client for one non-interactive render, on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn for_render(api: Api) -> Self {
        Self::new(Mode::Render, api, Families::default(), Handle::current())
    }

    /// Builds a client from a loaded [`ClientConfig`].
    pub fn from_config(
        mode: Mode,
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Self {
        let api = Api::with_endpoints(transport, config.endpoints.clone());
        Self::new(mode, api, config.families(), runtime)
    }

    pub fn new(mode: Mode, api: Api, families: Families, runtime: Handle) -> Self {
        let families = match mode {
            Mode::Interactive => families,
            Mode::Render => families.map(without_background_refresh),
        };
        let name = match mode {
            Mode::Interactive => "session",
            Mode::Render => "render",
        };
        tracing::debug!(?mode, "creating query client");

        Self {
            mode,
            api,
            families,
            ip_location: RequestCache::with_runtime(
                format!("{name}.{}", keys::IP_LOCATION),
                runtime.clone(),
            ),
            geo_search: RequestCache::with_runtime(
                format!("{name}.{}", keys::GEO_SEARCH),
                runtime.clone(),
            ),
            weather: RequestCache::with_runtime(format!("{name}.{}", keys::WEATHER), runtime),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn families(&self) -> &Families {
        &self.families
    }

    pub fn ip_location(&self) -> Snapshot<IpLocation> {
        self.ip_location.get(&self.families.ip_location_query(&self.api))
    }

    pub fn subscribe_ip_location(&self) -> Subscription<IpLocation> {
        self.ip_location.subscribe(&self.families.ip_location_query(&self.api))
    }

    pub async fn prefetch_ip_location(&self) {
        self.ip_location.prefetch(&self.families.ip_location_query(&self.api)).await
    }

    /// Search results for `query`. Blank and one-character queries report
    /// a disabled snapshot without searching.
    pub fn geo_search(&self, query: &str) -> Snapshot<Vec<GeoSearchResult>> {
        self.geo_search.get(&self.families.geo_search_query(&self.api, query))
    }

    pub fn subscribe_geo_search(&self, query: &str) -> Subscription<Vec<GeoSearchResult>> {
        self.geo_search.subscribe(&self.families.geo_search_query(&self.api, query))
    }

    pub fn weather(&self, lat: f64, lon: f64) -> Snapshot<CurrentWeather> {
        self.weather.get(&self.families.weather_query(&self.api, lat, lon))
    }

    pub fn subscribe_weather(&self, lat: f64, lon: f64) -> Subscription<CurrentWeather> {
        self.weather.subscribe(&self.families.weather_query(&self.api, lat, lon))
    }

    /// Calls `listener` with every new weather snapshot for the coordinate.
    pub fn watch_weather<F>(&self, lat: f64, lon: f64, listener: F) -> Unsubscribe
    where
        F: Fn(Snapshot<CurrentWeather>) + Send + Sync + 'static,
    {
        self.weather
            .watch(&self.families.weather_query(&self.api, lat, lon), listener)
    }

    /// Warms the weather of a coordinate, e.g. right before a city is added.
    pub async fn prefetch_weather(&self, lat: f64, lon: f64) {
        self.weather
            .prefetch(&self.families.weather_query(&self.api, lat, lon))
            .await
    }

    /// Warms the weather of every city concurrently.
    pub async fn prefetch_cities(&self, cities: &[City]) {
        join_all(cities.iter().map(|city| self.prefetch_weather(city.lat, city.lon))).await;
    }

    /// Marks the weather of a coordinate stale; subscribed rows refresh right away.
    pub fn invalidate_weather(&self, lat: f64, lon: f64) -> bool {
        self.weather.invalidate(&keys::weather(lat, lon))
    }

    /// Marks every cached weather entry stale.
    pub fn invalidate_all_weather(&self) -> usize {
        self.weather.invalidate_family(keys::WEATHER)
    }

    /// Tells the client whether the surface is focused. Ignored in render mode.
    pub fn set_focused(&self, focused: bool) {
        if self.mode == Mode::Render {
            return;
        }
        self.ip_location.set_focused(focused);
        self.geo_search.set_focused(focused);
        self.weather.set_focused(focused);
    }

    pub fn ip_location_cache(&self) -> &RequestCache<IpLocation> {
        &self.ip_location
    }

    pub fn geo_search_cache(&self) -> &RequestCache<Vec<GeoSearchResult>> {
        &self.geo_search
    }

    pub fn weather_cache(&self) -> &RequestCache<CurrentWeather> {
        &self.weather
    }
}

fn without_background_refresh(config: QueryConfig) -> QueryConfig {
    QueryConfig {
        refetch_interval: None,
        refetch_on_focus: false,
        ..config
    }
}
