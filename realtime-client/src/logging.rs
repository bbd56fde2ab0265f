//! Logging setup for applications embedding the realtime client
//!
//! The library crates only emit `tracing` events; nothing is printed until the
//! application installs a subscriber. These helpers install one suited to the
//! usual POS deployments: nothing at all for kiosk front ends that own the
//! terminal, compact or verbose stderr output while developing, and JSON lines
//! for terminals that ship logs to a collector.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr output at `info`
    Development,
    /// Verbose stderr output at `debug` with source locations
    Debug,
    /// One JSON object per event at `info`
    Json,
}

impl LoggingMode {
    /// Parse a mode name as used in `POS_REALTIME_LOG_MODE`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "silent" => Some(Self::Silent),
            "development" | "dev" => Some(Self::Development),
            "debug" => Some(Self::Debug),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn default_level(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            _ => "info",
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },
}

/// Initialize logging with the specified mode
///
/// Call this once, early, before connecting. A second initialization fails
/// with [`LoggingError::TracingInit`].
///
/// # Environment Variables
///
/// - `POS_REALTIME_LOG_LEVEL`: filter directive, e.g. `realtime_stream=debug`
/// - `RUST_LOG`: used when `POS_REALTIME_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = match mode {
        LoggingMode::Silent => return Ok(()),
        _ => create_env_filter(mode.default_level())?,
    };

    let result = match mode {
        LoggingMode::Development => Registry::default()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .with(filter)
            .try_init(),
        LoggingMode::Debug => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init(),
        LoggingMode::Json => Registry::default()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init(),
        LoggingMode::Silent => Ok(()),
    };

    result.map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Initialize logging from `POS_REALTIME_LOG_MODE`
///
/// Accepts `silent`, `development`, `debug` or `json`; anything else, or an
/// unset variable, means silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = std::env::var("POS_REALTIME_LOG_MODE")
        .ok()
        .and_then(|name| LoggingMode::from_name(&name))
        .unwrap_or(LoggingMode::Silent);

    init_logging(mode)
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directive = std::env::var("POS_REALTIME_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    parse_filter(&directive)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[rstest]
    #[case("silent", Some(LoggingMode::Silent))]
    #[case("Development", Some(LoggingMode::Development))]
    #[case("dev", Some(LoggingMode::Development))]
    #[case(" debug ", Some(LoggingMode::Debug))]
    #[case("json", Some(LoggingMode::Json))]
    #[case("loud", None)]
    fn test_mode_names(#[case] name: &str, #[case] expected: Option<LoggingMode>) {
        assert_eq!(LoggingMode::from_name(name), expected);
    }

    #[test]
    fn test_filter_directives() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("realtime_stream=debug,warn").is_ok());
        assert!(matches!(
            parse_filter("realtime_stream=loudest"),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_default_levels() {
        assert_eq!(LoggingMode::Debug.default_level(), "debug");
        assert_eq!(LoggingMode::Json.default_level(), "info");
    }
}
