//! # pos-realtime-stream
//!
//! Realtime stock and reservation updates for a point-of-sale client.
//!
//! Many independent consumers subscribe to entity ids through one shared
//! [`SubscriptionRegistry`]. A [`ConnectionManager`] keeps a single live channel
//! open for all of them: it reconnects with exponential backoff, detects dead
//! connections with a heartbeat, replays the full subscription set on every
//! reopen, and falls back to polling a REST endpoint when the channel is
//! unavailable. Consumers see the same [`Message`] shape from either source.
//!
//! ```no_run
//! use std::sync::Arc;
//! use realtime_stream::{
//!     ConnectionManager, HttpStockSource, Message, RealtimeConfig, SubscriptionRegistry,
//!     WebSocketConnector,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RealtimeConfig::live("wss://erp.example.com/realtime", "https://erp.example.com/api");
//! let api = config.api_endpoint()?.expect("api url configured");
//! let source = HttpStockSource::new(&api, config.connect_timeout)?;
//!
//! let registry = SubscriptionRegistry::new();
//! let _stock = registry.subscribe_entity("sku-1", |message: &Message| {
//!     println!("{:?}", message);
//! });
//!
//! let manager = ConnectionManager::new(
//!     config,
//!     registry,
//!     Arc::new(WebSocketConnector::new()),
//!     Some(Arc::new(source)),
//! );
//! manager.connect();
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod poller;
pub mod registry;
pub mod transport;
pub mod types;

pub use backoff::{BackoffPolicy, BackoffState};
pub use config::RealtimeConfig;
pub use connection::ConnectionManager;
pub use error::{ConfigError, MessageError, PollError, RealtimeError, Result, TransportError};
pub use heartbeat::{HeartbeatMonitor, Liveness};
pub use message::{ControlFrame, ExpiresAt, Message};
pub use poller::{FallbackPoller, HttpStockSource, PollOutcome, PollingTask, StockSnapshot, StockSource};
pub use registry::{DispatchReport, Handler, InterestChange, Subscription, SubscriptionRegistry};
pub use transport::{Channel, ChannelEvent, Connector, WebSocketConnector};
pub use types::{ConnectionState, EntityId, Quantity};
