//! Process configuration from `GEOAR_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use maps::PollerConfig;

pub const DEFAULT_MAP_API: &str = "https://api.immersal.com";

/// Shortest accepted poll interval; smaller values are raised to it.
pub const MIN_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStoreConfig {
    pub url: String,
    pub app_id: String,
    pub rest_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub map_api: String,
    pub map_token: Option<String>,
    pub poller: PollerConfig,
    /// Present only when the store URL and application id are both set.
    pub object_store: Option<ObjectStoreConfig>,
    pub author: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = PollerConfig::default();
        let poller = PollerConfig {
            interval: Duration::from_millis(
                parse_or(
                    &lookup,
                    "GEOAR_POLL_INTERVAL_MS",
                    defaults.interval.as_millis() as u64,
                )
                .max(MIN_POLL_INTERVAL_MS),
            ),
            radius_m: parse_or(&lookup, "GEOAR_SEARCH_RADIUS_M", defaults.radius_m),
            max_loaded: parse_or(&lookup, "GEOAR_MAX_LOADED_MAPS", defaults.max_loaded),
            include_public: flag_or(&lookup, "GEOAR_LOAD_PUBLIC_MAPS", defaults.include_public),
            request_timeout: Duration::from_millis(parse_or(
                &lookup,
                "GEOAR_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )),
            max_backoff: Duration::from_millis(parse_or(
                &lookup,
                "GEOAR_MAX_BACKOFF_MS",
                defaults.max_backoff.as_millis() as u64,
            )),
        };

        let object_store = match (non_empty(&lookup, "GEOAR_PARSE_URL"), non_empty(&lookup, "GEOAR_PARSE_APP_ID")) {
            (Some(url), Some(app_id)) => Some(ObjectStoreConfig {
                url,
                app_id,
                rest_key: non_empty(&lookup, "GEOAR_PARSE_REST_KEY").unwrap_or_default(),
                session_token: non_empty(&lookup, "GEOAR_PARSE_SESSION_TOKEN"),
            }),
            _ => None,
        };

        Self {
            map_api: non_empty(&lookup, "GEOAR_MAP_API").unwrap_or_else(|| DEFAULT_MAP_API.to_string()),
            map_token: non_empty(&lookup, "GEOAR_MAP_TOKEN"),
            poller,
            object_store,
            author: non_empty(&lookup, "GEOAR_AUTHOR").unwrap_or_else(|| "geoar".to_string()),
        }
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    non_empty(lookup, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn flag_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match non_empty(lookup, key).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
