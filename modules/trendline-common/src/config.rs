use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::ConfigError;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Backend
    pub api_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,

    // Status polling
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("TRENDLINE_API_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("TRENDLINE_API_URL"))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token: lookup("TRENDLINE_API_TOKEN").filter(|v| !v.is_empty()),
            request_timeout: Duration::from_secs(seconds(
                &lookup,
                "TRENDLINE_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            poll_interval: Duration::from_secs(seconds(
                &lookup,
                "TRENDLINE_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
        })
    }

    /// Log the effective configuration with the token masked.
    pub fn log_redacted(&self) {
        info!(
            api_url = self.api_url.as_str(),
            api_token = if self.api_token.is_some() { "[set]" } else { "[unset]" },
            poll_interval_secs = self.poll_interval.as_secs(),
            request_timeout_secs = self.request_timeout.as_secs(),
            "Loaded configuration"
        );
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("TRENDLINE_API_URL", "https://api.example.org/")])).unwrap();
        assert_eq!(config.api_url, "https://api.example.org");
        assert_eq!(config.api_token, None);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_url_is_an_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TRENDLINE_API_URL")));
    }

    #[test]
    fn bad_interval_is_an_error() {
        let err = Config::from_lookup(lookup(&[
            ("TRENDLINE_API_URL", "http://localhost:3000"),
            ("TRENDLINE_POLL_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRENDLINE_POLL_INTERVAL_SECS", .. }));
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("TRENDLINE_API_URL", "http://localhost:3000"),
            ("TRENDLINE_API_TOKEN", "secret"),
            ("TRENDLINE_POLL_INTERVAL_SECS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }
}
