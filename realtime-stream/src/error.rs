//! Error types for the realtime-stream crate.

use std::time::Duration;

/// Configuration problems detected before or at `connect()` time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A URL option could not be parsed
    #[error("Invalid {field}: {reason}")]
    InvalidUrl {
        /// Name of the offending option
        field: &'static str,
        /// Parser message
        reason: String,
    },

    /// A numeric option is out of range
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Neither a live channel nor polling is available
    #[error("No data source configured: channel URL is absent and polling is unavailable")]
    NoDataSource,

    /// `connect()` was called outside of a tokio runtime
    #[error("connect() must be called from within a tokio runtime")]
    NoRuntime,
}

/// Errors raised while opening or using the live channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection attempt was refused or failed
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The connection attempt did not finish in time
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The WebSocket handshake failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame could not be handed to the channel because it is closed
    #[error("Channel closed")]
    ChannelClosed,

    /// A control frame could not be encoded
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from a fallback poll request.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The HTTP request itself failed
    #[error("Poll request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Poll endpoint returned status {0}")]
    Status(u16),

    /// The polling endpoint URL cannot be built
    #[error("Invalid polling endpoint: {0}")]
    InvalidEndpoint(String),

    /// A custom stock source failed
    #[error("Stock source error: {0}")]
    Source(String),
}

/// Errors decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The frame is not valid JSON or does not match its declared type
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame has no string `type` discriminator
    #[error("Message has no type field")]
    MissingType,
}

/// Umbrella error for the crate.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Convenience type alias for Results using RealtimeError.
pub type Result<T> = std::result::Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::InvalidUrl {
            field: "channelUrl",
            reason: "relative URL without a base".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid channelUrl: relative URL without a base"
        );

        assert!(ConfigError::NoDataSource
            .to_string()
            .contains("No data source configured"));
        assert!(ConfigError::NoRuntime.to_string().contains("tokio runtime"));
    }

    #[test]
    fn test_transport_error_display() {
        let error = TransportError::ConnectFailed("connection refused".to_string());
        assert_eq!(error.to_string(), "Connection failed: connection refused");

        let error = TransportError::ConnectTimeout(Duration::from_secs(10));
        assert_eq!(error.to_string(), "Connection attempt timed out after 10s");

        assert_eq!(TransportError::ChannelClosed.to_string(), "Channel closed");
    }

    #[test]
    fn test_poll_error_display() {
        assert_eq!(
            PollError::Status(503).to_string(),
            "Poll endpoint returned status 503"
        );
        assert_eq!(
            PollError::Source("offline".to_string()).to_string(),
            "Stock source error: offline"
        );
    }

    #[test]
    fn test_error_conversion_into_realtime_error() {
        let error: RealtimeError = ConfigError::NoDataSource.into();
        match error {
            RealtimeError::Config(ConfigError::NoDataSource) => {}
            other => panic!("Expected Config variant, got {:?}", other),
        }

        let error: RealtimeError = MessageError::MissingType.into();
        assert_eq!(error.to_string(), "Message has no type field");
    }
}
