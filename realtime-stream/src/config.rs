//! Configuration types for the realtime-stream crate
//!
//! This module defines the options that control the connection manager: the
//! live channel endpoint, the polling fallback, heartbeat timing and the
//! reconnect backoff. Options deserialize from camelCase JSON so the same
//! document the web frontend uses can configure this client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

/// Configuration for the realtime client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    /// Live channel endpoint (ws:// or wss://). Absent means polling only.
    /// Default: None
    pub channel_url: Option<String>,

    /// Base URL of the REST API serving `/stock/multi`
    /// Default: None
    pub api_base_url: Option<String>,

    /// Whether the REST polling fallback may be used
    /// Default: true
    pub polling_enabled: bool,

    /// Interval between fallback poll ticks
    /// Default: 10 seconds
    #[serde(rename = "pollIntervalMs", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Interval between heartbeat checks while the channel is open
    /// Default: 20 seconds
    #[serde(rename = "heartbeatIntervalMs", with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// Silence after which an open channel is declared dead
    /// Default: 45 seconds
    #[serde(rename = "heartbeatTimeoutMs", with = "duration_ms")]
    pub heartbeat_timeout: Duration,

    /// Upper bound for a single channel establishment attempt
    /// Default: 10 seconds
    #[serde(rename = "connectTimeoutMs", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Consecutive channel failures before polling covers the outage (0 = never)
    /// Default: 3
    pub fallback_after_failures: u32,

    /// Reconnect backoff
    pub backoff: BackoffPolicy,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_url: None,
            api_base_url: None,
            polling_enabled: true,
            poll_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(10),
            fallback_after_failures: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RealtimeConfig {
    /// Create a new RealtimeConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that talks to a live channel and polls `api_base_url` as fallback
    pub fn live(channel_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            channel_url: Some(channel_url.into()),
            api_base_url: Some(api_base_url.into()),
            ..Default::default()
        }
    }

    /// Create a config that only polls
    pub fn polling_only(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: Some(api_base_url.into()),
            ..Default::default()
        }
    }

    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }

    /// The parsed live channel URL, if one is configured.
    pub fn channel_endpoint(&self) -> Result<Option<Url>, ConfigError> {
        parse_optional_url("channelUrl", self.channel_url.as_deref())
    }

    /// The parsed REST base URL, if one is configured.
    pub fn api_endpoint(&self) -> Result<Option<Url>, ConfigError> {
        parse_optional_url("apiBaseUrl", self.api_base_url.as_deref())
    }

    /// The live channel URL, checked for a `ws`/`wss` scheme.
    pub fn live_endpoint(&self) -> Result<Option<Url>, ConfigError> {
        let Some(url) = self.channel_endpoint()? else {
            return Ok(None);
        };
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                field: "channelUrl",
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(Some(url))
    }

    /// Validate the configuration and return any issues
    ///
    /// A missing data source is not reported here; it surfaces at `connect()`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.live_endpoint()?;
        self.api_endpoint()?;
        self.validate_timing()
    }

    /// Validate intervals, timeouts and backoff, ignoring endpoints.
    ///
    /// Heartbeat and connect timing only apply to a usable live channel, so
    /// they are skipped when there is none.
    pub fn validate_timing(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.live_endpoint(), Ok(Some(_))) {
            return Ok(());
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::InvalidValue(
                "Heartbeat timeout must be greater than the heartbeat interval".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        self.backoff.validate()
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_channel_url(mut self, url: impl Into<String>) -> Self {
        self.channel_url = Some(url.into());
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn with_polling(mut self, enabled: bool) -> Self {
        self.polling_enabled = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_fallback_after_failures(mut self, failures: u32) -> Self {
        self.fallback_after_failures = failures;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

fn parse_optional_url(field: &'static str, raw: Option<&str>) -> Result<Option<Url>, ConfigError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Url::parse(raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidUrl {
                field,
                reason: e.to_string(),
            }),
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
