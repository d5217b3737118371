use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use querylito_core::QueryConfig;
use serde::{Deserialize, Serialize};

use crate::api::Endpoints;
use crate::families::Families;

/// Partial [`QueryConfig`]: only the fields that are set replace the
/// family's defaults.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryOverride {
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stale_time: Option<Duration>,

    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub gc_time: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub retry_base_delay: Option<Duration>,

    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub retry_max_delay: Option<Duration>,

    /// Zero turns interval refresh off.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub refetch_interval: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refetch_interval_in_background: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refetch_on_focus: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl QueryOverride {
    pub fn apply(&self, mut config: QueryConfig) -> QueryConfig {
        if let Some(stale_time) = self.stale_time {
            config.stale_time = stale_time;
        }
        if let Some(gc_time) = self.gc_time {
            config.gc_time = gc_time;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(base_delay) = self.retry_base_delay {
            config.retry.base_delay = base_delay;
        }
        if let Some(max_delay) = self.retry_max_delay {
            config.retry.max_delay = max_delay;
        }
        if let Some(interval) = self.refetch_interval {
            config.refetch_interval = Some(interval).filter(|i| !i.is_zero());
        }
        if let Some(background) = self.refetch_interval_in_background {
            config.refetch_interval_in_background = background;
        }
        if let Some(refetch_on_focus) = self.refetch_on_focus {
            config.refetch_on_focus = refetch_on_focus;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        config
    }
}

/// Configuration of a [`QueryClient`](crate::QueryClient), usually loaded from YAML.
///
/// ```yaml
/// endpoints:
///   forecast: "https://forecast.internal/v1/forecast"
/// defaults:
///   max_retries: 3
/// weather:
///   stale_time: 2m
///   refetch_interval: 2m
/// ```
///
/// `defaults` applies to every family, then each family's own section on top.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub defaults: QueryOverride,
    pub ip_location: QueryOverride,
    pub geo_search: QueryOverride,
    pub weather: QueryOverride,
}

impl ClientConfig {
    /// Loads the config at `path`, or the defaults without one.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let yaml = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_yaml(&yaml)
                    .with_context(|| format!("failed to load config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("failed to parse YAML config")
    }

    /// The family configs with every override applied.
    pub fn families(&self) -> Families {
        let defaults = Families::default().map(|config| self.defaults.apply(config));
        Families {
            ip_location: self.ip_location.apply(defaults.ip_location),
            geo_search: self.geo_search.apply(defaults.geo_search),
            weather: self.weather.apply(defaults.weather),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_keeps_family_defaults() {
        let config = ClientConfig::from_yaml("{}").unwrap();
        assert_eq!(config.families(), Families::default());
        assert_eq!(config.endpoints, Endpoints::default());
    }

    #[test]
    fn test_overrides_layer_on_family_defaults() {
        let yaml = [
            "defaults:",
            "  max_retries: 3",
            "weather:",
            "  stale_time: 2m",
            "  refetch_interval: 2m",
            "geo_search:",
            "  enabled: false",
        ]
        .join("\n");
        let config = ClientConfig::from_yaml(&yaml).unwrap();
        let families = config.families();

        assert_eq!(families.weather.stale_time, Duration::from_secs(120));
        assert_eq!(families.weather.interval(), Some(Duration::from_secs(120)));
        // untouched weather fields keep the family values
        assert_eq!(families.weather.gc_time, Duration::from_secs(30 * 60));
        assert_eq!(families.weather.retry.base_delay, Duration::from_millis(1500));
        assert_eq!(families.weather.retry.max_retries, 3);
        assert_eq!(families.ip_location.retry.max_retries, 3);
        assert!(!families.geo_search.enabled);
    }

    #[test]
    fn test_zero_interval_disables_refresh() {
        let config = ClientConfig::from_yaml("weather:\n  refetch_interval: 0s\n").unwrap();
        assert_eq!(config.families().weather.refetch_interval, None);
    }

    #[test]
    fn test_endpoint_override() {
        let yaml = "endpoints:\n  forecast: \"http://localhost:8080/v1/forecast\"\n";
        let config = ClientConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.endpoints.forecast.as_str(), "http://localhost:8080/v1/forecast");
        assert_eq!(config.endpoints.geocoding, Endpoints::default().geocoding);
    }

    #[test]
    fn test_invalid_yaml_has_context() {
        let err = ClientConfig::from_yaml("weather:\n  stale_time: soon\n").unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse YAML config"));
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::get(Some(Path::new("/nonexistent/querylito.yml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
        assert_eq!(ClientConfig::get(None).unwrap(), ClientConfig::default());
    }
}
