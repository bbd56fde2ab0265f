//! # pos-realtime-client
//!
//! Application-facing client for realtime POS stock and reservation updates.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use realtime_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     realtime_client::logging::init_logging_from_env()?;
//!
//!     let config = RealtimeConfig::from_json(r#"{
//!         "channelUrl": "wss://erp.example.com/realtime",
//!         "apiBaseUrl": "https://erp.example.com/api",
//!         "pollIntervalMs": 10000
//!     }"#)?;
//!     let client = Arc::new(RealtimeClient::new(config));
//!
//!     let _sku = client.subscribe_entity("sku-1", |message: &Message| {
//!         println!("{}: {:?}", message.kind(), message);
//!     });
//!     client.connect();
//!
//!     let mut state = client.watch_state();
//!     while state.changed().await.is_ok() {
//!         println!("connection is {}", *state.borrow());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery
//!
//! Handlers receive the same [`Message`](realtime_stream::Message) values
//! whether they arrived over the live channel or were synthesized by the
//! polling fallback. Subscriptions are registered once and carried across
//! every reconnect; the returned [`Subscription`](realtime_stream::Subscription)
//! guard unsubscribes when dropped.
//!
//! ## Architecture
//!
//! ```text
//! realtime-client (RealtimeClient facade, logging)
//!     ↓
//! realtime-stream ConnectionManager (driver task per session)
//!     ↓                                  ↓
//! WebSocketConnector (live channel)   HttpStockSource (GET /stock/multi)
//! ```

mod client;
pub mod logging;

pub use client::{RealtimeClient, RealtimeClientBuilder};

/// Re-exports of the lower-level crate for custom connectors and sources.
pub use realtime_stream;

pub mod prelude {
    pub use crate::client::{RealtimeClient, RealtimeClientBuilder};
    pub use realtime_stream::{
        BackoffPolicy, ConfigError, ConnectionState, EntityId, ExpiresAt, Message, Quantity,
        RealtimeConfig, Subscription,
    };
}
