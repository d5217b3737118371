use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{self, DayPhase, TimeError};

/// A city shown on the dashboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    /// Stable key, e.g. the geocoder id or a slug.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub lat: f64,
    pub lon: f64,
    /// IANA zone name, e.g. `Europe/London`.
    pub tz: String,
    /// Seeded by default rather than added by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_in: Option<bool>,
}

impl City {
    pub fn is_built_in(&self) -> bool {
        self.built_in.unwrap_or(false)
    }

    /// Day phase of this city at `instant`, in its own zone.
    pub fn day_phase_at(&self, instant: DateTime<Utc>) -> Result<DayPhase, TimeError> {
        time::classify_phase_in(instant, &self.tz)
    }

    /// Local `HH:mm` of this city at `instant`.
    pub fn local_hhmm(&self, instant: DateTime<Utc>) -> Result<String, TimeError> {
        time::format_hhmm_in(instant, &self.tz)
    }
}

impl From<GeoSearchResult> for City {
    fn from(result: GeoSearchResult) -> Self {
        Self {
            id: result.id,
            name: result.name,
            country: result.country,
            lat: result.lat,
            lon: result.lon,
            tz: result.tz,
            built_in: None,
        }
    }
}

/// Current conditions at one location, normalized from the forecast API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentWeather {
    pub temperature_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precip_mm: Option<f64>,
    /// Percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precip_probability: Option<f64>,
    /// WMO weather code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// ISO 8601 observation time as reported by the API.
    #[serde(rename = "observedAtISO")]
    pub observed_at_iso: String,
}

/// One hit of a city search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoSearchResult {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub tz: String,
}

/// Where the current user roughly is, based on their IP address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub tz: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_weather_wire_names() {
        let weather = CurrentWeather {
            temperature_c: 18.0,
            precip_mm: None,
            precip_probability: Some(20.0),
            code: Some(800),
            observed_at_iso: "2024-06-01T12:00".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&weather).unwrap(),
            json!({
                "temperatureC": 18.0,
                "precipProbability": 20.0,
                "code": 800,
                "observedAtISO": "2024-06-01T12:00",
            })
        );
    }

    #[test]
    fn test_city_optional_fields() {
        let city: City = serde_json::from_value(json!({
            "id": "london-gb",
            "name": "London",
            "lat": 51.5074,
            "lon": -0.1278,
            "tz": "Europe/London",
            "builtIn": true,
        }))
        .unwrap();
        assert_eq!(city.country, None);
        assert!(city.is_built_in());
    }

    #[test]
    fn test_city_from_search_result() {
        let city = City::from(GeoSearchResult {
            id: "2988507".to_string(),
            name: "Paris".to_string(),
            country: Some("France".to_string()),
            lat: 48.85,
            lon: 2.35,
            tz: "Europe/Paris".to_string(),
        });
        assert_eq!(city.id, "2988507");
        assert!(!city.is_built_in());
    }

    #[test]
    fn test_city_local_time() {
        use chrono::TimeZone;

        let mut city = crate::store::default_cities("UTC").remove(5);
        assert_eq!(city.name, "Seoul");
        let instant = Utc.with_ymd_and_hms(2024, 6, 3, 0, 30, 0).unwrap();
        assert_eq!(city.local_hhmm(instant).unwrap(), "09:30");
        assert_eq!(city.day_phase_at(instant).unwrap(), DayPhase::Day);

        city.tz = "Nowhere/Special".to_string();
        assert!(matches!(city.day_phase_at(instant), Err(TimeError::UnknownZone(_))));
    }
}
