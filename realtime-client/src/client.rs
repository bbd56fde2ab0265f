//! The application-facing realtime client.

use std::sync::Arc;

use realtime_stream::{
    ConfigError, ConnectionManager, ConnectionState, Connector, HttpStockSource, Message,
    RealtimeConfig, StockSource, Subscription, SubscriptionRegistry, WebSocketConnector,
};
use tokio::sync::watch;

/// Realtime stock and reservation updates for one application.
///
/// Create one client at startup and share it by `Arc` through the
/// application context. Subscriptions registered on the client survive
/// reconnects and fallback transitions; dropping the client disconnects.
///
/// ```no_run
/// use realtime_client::prelude::*;
///
/// # async fn run() {
/// let client = RealtimeClient::new(RealtimeConfig::live(
///     "wss://erp.example.com/realtime",
///     "https://erp.example.com/api",
/// ));
///
/// let _stock = client.subscribe_entity("sku-1", |message: &Message| {
///     if let Message::StockUpdate { available_qty, .. } = message {
///         println!("sku-1 now has {} available", available_qty);
///     }
/// });
///
/// client.connect();
/// # }
/// ```
#[derive(Debug)]
pub struct RealtimeClient {
    manager: ConnectionManager,
}

impl RealtimeClient {
    /// Client talking WebSocket to `channel_url` and polling `api_base_url` over HTTP.
    pub fn new(config: RealtimeConfig) -> Self {
        Self::builder().with_config(config).build()
    }

    pub fn builder() -> RealtimeClientBuilder {
        RealtimeClientBuilder::new()
    }

    /// Start receiving updates. No-op while already connected, connecting or polling.
    ///
    /// Misconfiguration does not panic; it is logged and exposed through
    /// [`last_error`](Self::last_error).
    pub fn connect(&self) {
        self.manager.connect();
    }

    /// Stop receiving updates. Handlers stay registered for the next `connect()`.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Register `handler` for messages about `entity_id`.
    pub fn subscribe_entity<F>(&self, entity_id: &str, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.manager.registry().subscribe_entity(entity_id, handler)
    }

    /// Register `handler` for every message, including unknown types.
    pub fn subscribe_global<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.manager.registry().subscribe_global(handler)
    }

    /// Run a heartbeat check now. Does nothing unless the channel is open.
    pub fn send_heartbeat(&self) {
        self.manager.send_heartbeat();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn backoff_attempt(&self) -> u32 {
        self.manager.backoff_attempt()
    }

    pub fn last_error(&self) -> Option<ConfigError> {
        self.manager.last_error()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        self.manager.registry()
    }

    pub fn config(&self) -> &RealtimeConfig {
        self.manager.config()
    }
}

/// Builder for [`RealtimeClient`] with injectable transports.
#[derive(Default)]
pub struct RealtimeClientBuilder {
    config: RealtimeConfig,
    registry: Option<SubscriptionRegistry>,
    connector: Option<Arc<dyn Connector>>,
    stock_source: Option<Arc<dyn StockSource>>,
}

impl RealtimeClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RealtimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing registry instead of creating one.
    pub fn with_registry(mut self, registry: SubscriptionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the WebSocket connector.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the HTTP stock source used by the polling fallback.
    pub fn with_stock_source(mut self, source: Arc<dyn StockSource>) -> Self {
        self.stock_source = Some(source);
        self
    }

    pub fn build(self) -> RealtimeClient {
        let stock_source = self
            .stock_source
            .or_else(|| default_stock_source(&self.config));
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector::new()),
        };

        let manager = ConnectionManager::new(
            self.config,
            self.registry.unwrap_or_default(),
            connector,
            stock_source,
        );
        RealtimeClient { manager }
    }
}

/// HTTP source for the configured API, if one is configured and usable.
///
/// An unparsable URL is left for `connect()` to report.
fn default_stock_source(config: &RealtimeConfig) -> Option<Arc<dyn StockSource>> {
    let api = config.api_endpoint().ok().flatten()?;
    match HttpStockSource::new(&api, config.connect_timeout) {
        Ok(source) => Some(Arc::new(source) as Arc<dyn StockSource>),
        Err(e) => {
            tracing::warn!(api = %api, "Polling fallback unavailable: {}", e);
            None
        }
    }
}
