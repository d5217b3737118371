//! Shapes of the persisted dashboard state.
//!
//! Storage itself belongs to the host. This module only defines what is
//! stored under each key and how it is read back.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::types::City;

/// Key of the saved city list.
pub const STORAGE_KEY: &str = "timeweather:v1";

/// Key of the "what-if" baseline override.
pub const BASELINE_KEY: &str = "timeweather:baselineISO";

/// Id of the built-in row that follows the user's own location.
pub const MY_LOCATION_ID: &str = "my-location";

fn built_in(id: &str, name: &str, country: &str, lat: f64, lon: f64, tz: &str) -> City {
    City {
        id: id.to_owned(),
        name: name.to_owned(),
        country: Some(country.to_owned()),
        lat,
        lon,
        tz: tz.to_owned(),
        built_in: Some(true),
    }
}

static DEFAULT_CITIES: Lazy<Vec<City>> = Lazy::new(|| {
    vec![
        built_in("london-gb", "London", "United Kingdom", 51.5074, -0.1278, "Europe/London"),
        built_in("new-york-us", "New York", "United States", 40.7128, -74.0060, "America/New_York"),
        built_in(
            "san-francisco-us",
            "San Francisco",
            "United States",
            37.7749,
            -122.4194,
            "America/Los_Angeles",
        ),
        built_in("delhi-in", "Delhi", "India", 28.6139, 77.2090, "Asia/Kolkata"),
        built_in("seoul-kr", "Seoul", "South Korea", 37.5665, 126.9780, "Asia/Seoul"),
    ]
});

/// Cities seeded on first use: the user's own location (in `local_tz`,
/// coordinates filled in once known) followed by the built-in set.
pub fn default_cities(local_tz: &str) -> Vec<City> {
    let mut cities = Vec::with_capacity(DEFAULT_CITIES.len() + 1);
    cities.push(built_in(MY_LOCATION_ID, "My Location", "Local", 0.0, 0.0, local_tz));
    cities.extend(DEFAULT_CITIES.iter().cloned());
    cities
}

/// The value stored under [`STORAGE_KEY`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCities {
    #[serde(default)]
    pub cities: Vec<City>,
}

impl StoredCities {
    /// Reads a stored payload. Anything unreadable loads as an empty list.
    pub fn load(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match serde_json::from_str(raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::debug!(error = %e, "discarding unreadable city list");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> String {
        // a Vec of plain structs always serializes
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"cities":[]}"#))
    }
}

/// The user's ordered city list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CityList {
    cities: Vec<City>,
}

impl CityList {
    pub fn new(cities: Vec<City>) -> Self {
        Self { cities }
    }

    /// The stored list if it has any cities, the seed list otherwise.
    pub fn restore(stored: StoredCities, seed: Vec<City>) -> Self {
        if stored.cities.is_empty() {
            Self::new(seed)
        } else {
            Self::new(stored.cities)
        }
    }

    /// Appends `city` unless one with the same id is already listed.
    /// Returns whether it was added.
    pub fn add(&mut self, city: City) -> bool {
        if self.contains(&city.id) {
            return false;
        }
        self.cities.push(city);
        true
    }

    /// Removes the city with `id`. Returns the removed city.
    pub fn remove(&mut self, id: &str) -> Option<City> {
        let index = self.cities.iter().position(|c| c.id == id)?;
        Some(self.cities.remove(index))
    }

    /// Updates the coordinates of the "My Location" row.
    pub fn locate_me(&mut self, lat: f64, lon: f64) -> bool {
        match self.cities.iter_mut().find(|c| c.id == MY_LOCATION_ID) {
            Some(city) => {
                city.lat = lat;
                city.lon = lon;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cities.iter().any(|c| c.id == id)
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn to_stored(&self) -> StoredCities {
        StoredCities {
            cities: self.cities.clone(),
        }
    }
}

/// Reads the value stored under [`BASELINE_KEY`]. `None` means "now".
pub fn load_baseline(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(instant) => Some(instant.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(error = %e, value = raw, "ignoring unreadable baseline");
            None
        }
    }
}

/// The value to store under [`BASELINE_KEY`].
pub fn store_baseline(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
