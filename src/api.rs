//! Fetchers for the three remote services, over an injected [`Transport`].
//!
//! The crate never talks HTTP itself. A [`Transport`] performs `GET`
//! requests and hands back the decoded JSON body; everything in here builds
//! URLs and normalizes the responses into the dashboard's types.
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use querylito_core::FetchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::types::{CurrentWeather, GeoSearchResult, IpLocation};

/// Performs `GET` requests for the fetchers.
///
/// Implementations report non-2xx responses with
/// [`FetchError::http_status`] and network failures with
/// [`FetchError::network`], and should abort the request once `cancel`
/// fires, returning [`FetchError::Cancelled`].
pub trait Transport: Send + Sync + 'static {
    fn get_json(
        &self,
        url: Url,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, FetchError>>;
}

/// Base URLs of the remote services.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub ip_location: Url,
    pub geocoding: Url,
    pub forecast: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ip_location: Url::parse("https://ipapi.co/json/").expect("valid url"),
            geocoding: Url::parse("https://geocoding-api.open-meteo.com/v1/search")
                .expect("valid url"),
            forecast: Url::parse("https://api.open-meteo.com/v1/forecast").expect("valid url"),
        }
    }
}

/// A [`Transport`] plus the endpoints it talks to. Cheap to clone.
#[derive(Clone)]
pub struct Api {
    transport: Arc<dyn Transport>,
    endpoints: Arc<Endpoints>,
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl Api {
    pub fn new(transport: impl Transport) -> Self {
        Self::with_endpoints(Arc::new(transport), Endpoints::default())
    }

    pub fn with_endpoints(transport: Arc<dyn Transport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints: Arc::new(endpoints),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub async fn ip_location(&self, cancel: CancellationToken) -> Result<IpLocation, FetchError> {
        fetch_ip_location(self.transport.as_ref(), &self.endpoints, cancel).await
    }

    pub async fn search_cities(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<GeoSearchResult>, FetchError> {
        search_cities_by_name(self.transport.as_ref(), &self.endpoints, query, cancel).await
    }

    pub async fn current_weather(
        &self,
        lat: f64,
        lon: f64,
        cancel: CancellationToken,
    ) -> Result<CurrentWeather, FetchError> {
        fetch_current_weather(self.transport.as_ref(), &self.endpoints, lat, lon, cancel).await
    }
}

fn decode<T: serde::de::DeserializeOwned>(url: &Url, value: Value) -> Result<T, FetchError> {
    serde_json::from_value(value).map_err(|e| FetchError::Decode(format!("{url}: {e}")))
}

#[derive(Deserialize)]
struct IpApiResponse {
    city: Option<String>,
    latitude: f64,
    longitude: f64,
    timezone: String,
}

/// Looks up the caller's approximate location.
pub async fn fetch_ip_location(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    cancel: CancellationToken,
) -> Result<IpLocation, FetchError> {
    let url = endpoints.ip_location.clone();
    let body = transport.get_json(url.clone(), cancel).await?;
    let raw: IpApiResponse = decode(&url, body)?;

    Ok(IpLocation {
        city: raw.city,
        lat: raw.latitude,
        lon: raw.longitude,
        tz: raw.timezone,
    })
}

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<GeocodingPlace>>,
}

#[derive(Deserialize)]
struct GeocodingPlace {
    id: Option<Value>,
    name: String,
    country: Option<String>,
    country_code: Option<String>,
    latitude: f64,
    longitude: f64,
    timezone: Option<String>,
}

impl GeocodingPlace {
    fn into_result(self) -> Option<GeoSearchResult> {
        let id = match self.id {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => format!(
                "{}-{}-{}-{}",
                self.name,
                self.country_code.as_deref().unwrap_or_default(),
                self.latitude,
                self.longitude
            ),
        };
        let Some(tz) = self.timezone else {
            tracing::debug!(place = %self.name, "skipping search result without a time zone");
            return None;
        };
        Some(GeoSearchResult {
            id,
            name: self.name,
            country: self.country,
            lat: self.latitude,
            lon: self.longitude,
            tz,
        })
    }
}

/// Searches cities by name, returning at most five matches.
///
/// A blank query returns no results without calling the transport.
pub async fn search_cities_by_name(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    query: &str,
    cancel: CancellationToken,
) -> Result<Vec<GeoSearchResult>, FetchError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut url = endpoints.geocoding.clone();
    url.query_pairs_mut()
        .append_pair("name", query)
        .append_pair("count", "5")
        .append_pair("language", "en");

    let body = transport.get_json(url.clone(), cancel).await?;
    let raw: GeocodingResponse = decode(&url, body)?;

    Ok(raw
        .results
        .unwrap_or_default()
        .into_iter()
        .filter_map(GeocodingPlace::into_result)
        .collect())
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: Option<ForecastCurrent>,
}

#[derive(Deserialize)]
struct ForecastCurrent {
    time: Option<String>,
    temperature_2m: Option<f64>,
    precipitation: Option<f64>,
    precipitation_probability: Option<f64>,
    weather_code: Option<i64>,
}

/// Fetches current conditions at a coordinate, in celsius and millimeters.
pub async fn fetch_current_weather(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    lat: f64,
    lon: f64,
    cancel: CancellationToken,
) -> Result<CurrentWeather, FetchError> {
    let mut url = endpoints.forecast.clone();
    url.query_pairs_mut()
        .append_pair("latitude", &lat.to_string())
        .append_pair("longitude", &lon.to_string())
        .append_pair(
            "current",
            "temperature_2m,precipitation,precipitation_probability,weather_code",
        )
        .append_pair("temperature_unit", "celsius")
        .append_pair("precipitation_unit", "mm")
        .append_pair("timezone", "auto");

    let body = transport.get_json(url.clone(), cancel).await?;
    let raw: ForecastResponse = decode(&url, body)?;

    let current = raw
        .current
        .ok_or_else(|| FetchError::Decode(format!("{url}: missing `current`")))?;
    let temperature_c = current
        .temperature_2m
        .ok_or_else(|| FetchError::Decode(format!("{url}: missing `current.temperature_2m`")))?;
    let observed_at_iso = current.time.unwrap_or_else(|| {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    });

    Ok(CurrentWeather {
        temperature_c,
        precip_mm: current.precipitation,
        precip_probability: current.precipitation_probability,
        code: current.weather_code,
        observed_at_iso,
    })
}
