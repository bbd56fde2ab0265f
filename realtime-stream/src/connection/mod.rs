//! Connection manager: one live channel shared by every subscriber.
//!
//! The manager owns the connection lifecycle:
//!
//! ```text
//! Closed ──connect()──▶ Connecting ──opened──▶ Open
//!   ▲  │                    │                   │
//!   │  └─no channel url─▶ FallbackPolling       │ closed / heartbeat dead
//!   │                        ▲                  ▼
//!   └──── reconnect timer ◀──┴──────────── Closed (transient)
//! ```
//!
//! `connect()` spawns a driver task that owns the channel, the heartbeat
//! ticker, the reconnect timer and the poll task. `disconnect()` is final:
//! it clears the session's liveness flag and aborts the driver, so nothing
//! belonging to the old session can dispatch or publish state afterwards.

mod driver;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::error::ConfigError;
use crate::poller::{FallbackPoller, StockSource};
use crate::registry::SubscriptionRegistry;
use crate::transport::Connector;
use crate::types::ConnectionState;

use driver::{Command, Driver};

/// State shared between the handle and the running driver.
#[derive(Debug)]
pub(crate) struct Shared {
    state: watch::Sender<ConnectionState>,
    attempt: AtomicU32,
    last_error: Mutex<Option<ConfigError>>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            state,
            attempt: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Publish `state` unless the session that produced it has ended.
    pub(crate) fn publish(&self, alive: &AtomicBool, state: ConnectionState) {
        if !alive.load(Ordering::Acquire) {
            return;
        }
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!(state = %state, "Connection state changed");
        }
    }

    pub(crate) fn set_attempt(&self, alive: &AtomicBool, attempt: u32) {
        if alive.load(Ordering::Acquire) {
            self.attempt.store(attempt, Ordering::Release);
        }
    }
}

/// One `connect()` .. `disconnect()` span.
#[derive(Debug)]
struct Session {
    id: Uuid,
    alive: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Owns the live channel lifecycle and the polling fallback.
pub struct ConnectionManager {
    config: RealtimeConfig,
    registry: SubscriptionRegistry,
    connector: Arc<dyn Connector>,
    stock_source: Option<Arc<dyn StockSource>>,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Create a manager. Nothing happens until [`connect`](Self::connect).
    ///
    /// `stock_source` is the polling backend; without one the manager can
    /// only use the live channel.
    pub fn new(
        config: RealtimeConfig,
        registry: SubscriptionRegistry,
        connector: Arc<dyn Connector>,
        stock_source: Option<Arc<dyn StockSource>>,
    ) -> Self {
        Self {
            config,
            registry,
            connector,
            stock_source,
            shared: Arc::new(Shared::new()),
            session: Mutex::new(None),
        }
    }

    /// Start a session.
    ///
    /// Does nothing while a session already exists. Misconfiguration is
    /// recorded in [`last_error`](Self::last_error) rather than returned;
    /// an unusable channel URL degrades to polling when polling is possible.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut slot = self.session.lock();
        if let Some(session) = slot.as_ref() {
            tracing::debug!(session = %session.id, "connect() ignored, session already active");
            return;
        }

        *self.shared.last_error.lock() = None;

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.report(ConfigError::NoRuntime);
                return;
            }
        };

        if let Err(e) = self.config.validate_timing() {
            self.report(e);
            return;
        }

        let channel_url = match self.config.live_endpoint() {
            Ok(url) => url,
            Err(e) => {
                self.report(e);
                None
            }
        };

        if self.config.polling_enabled {
            if let Err(e) = self.config.api_endpoint() {
                self.report(e);
            }
        }

        let poller = self.fallback_poller();
        if channel_url.is_none() && poller.is_none() {
            // a bad endpoint reported above is the root cause
            let already_reported = self.shared.last_error.lock().is_some();
            if !already_reported {
                self.report(ConfigError::NoDataSource);
            }
            return;
        }

        let id = Uuid::new_v4();
        let alive = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (interest_tx, interest_rx) = mpsc::unbounded_channel();
        self.registry.attach_listener(interest_tx);

        let initial = if channel_url.is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::FallbackPolling
        };
        self.shared.set_attempt(&alive, 0);
        self.shared.publish(&alive, initial);

        tracing::info!(
            session = %id,
            live = channel_url.is_some(),
            polling = poller.is_some(),
            "Realtime session started"
        );

        let driver = Driver {
            session: id,
            channel_url,
            connector: Arc::clone(&self.connector),
            poller,
            registry: self.registry.clone(),
            shared: Arc::clone(&self.shared),
            alive: Arc::clone(&alive),
            config: self.config.clone(),
            interest: Some(interest_rx),
        };
        let task = runtime.spawn(driver.run(command_rx));

        *slot = Some(Session {
            id,
            alive,
            commands: command_tx,
            task,
        });
    }

    /// End the session. Idempotent and final: no handler runs and no state
    /// changes on behalf of the ended session after this returns.
    pub fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.alive.store(false, Ordering::Release);
        session.task.abort();
        self.registry.detach_listener();
        self.shared.attempt.store(0, Ordering::Release);
        self.shared.state.send_replace(ConnectionState::Closed);

        tracing::info!(session = %session.id, "Realtime session ended");
    }

    /// Ask the driver to run a heartbeat check now. No-op unless `Open`.
    pub fn send_heartbeat(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.commands.send(Command::Heartbeat);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// A receiver observing every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Consecutive failed channel attempts since the channel last opened.
    pub fn backoff_attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::Acquire)
    }

    /// The misconfiguration reported by the most recent `connect()`, if any.
    pub fn last_error(&self) -> Option<ConfigError> {
        self.shared.last_error.lock().clone()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.lock().as_ref().map(|session| session.id)
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn fallback_poller(&self) -> Option<FallbackPoller> {
        if !self.config.polling_enabled {
            return None;
        }
        let source = self.stock_source.as_ref()?;
        Some(FallbackPoller::new(Arc::clone(source), self.registry.clone()))
    }

    /// Log a misconfiguration. The first one per `connect()` is kept.
    fn report(&self, error: ConfigError) {
        tracing::error!("Realtime client misconfigured: {}", error);
        let mut last_error = self.shared.last_error.lock();
        if last_error.is_none() {
            *last_error = Some(error);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("session", &self.session_id())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::Channel;
    use async_trait::async_trait;
    use url::Url;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _url: &Url) -> Result<Channel, TransportError> {
            Err(TransportError::ConnectFailed("refused".to_string()))
        }
    }

    fn manager(config: RealtimeConfig) -> ConnectionManager {
        ConnectionManager::new(
            config,
            SubscriptionRegistry::new(),
            Arc::new(RefusingConnector),
            None,
        )
    }

    #[test]
    fn test_connect_outside_runtime_reports_error() {
        let manager = manager(RealtimeConfig::new().with_channel_url("ws://localhost:1/rt"));
        manager.connect();

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.last_error(), Some(ConfigError::NoRuntime));
        assert!(manager.session_id().is_none());
    }

    #[tokio::test]
    async fn test_connect_without_any_source_reports_error() {
        let manager = manager(RealtimeConfig::new());
        manager.connect();

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.last_error(), Some(ConfigError::NoDataSource));
        assert!(manager.session_id().is_none());
    }

    #[tokio::test]
    async fn test_unusable_endpoint_stays_the_reported_error() {
        let config = RealtimeConfig::new()
            .with_channel_url("http://localhost:1/rt")
            .with_api_base_url("not a url");
        let manager = manager(config);
        manager.connect();

        assert!(matches!(
            manager.last_error(),
            Some(ConfigError::InvalidUrl {
                field: "channelUrl",
                ..
            })
        ));
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.session_id().is_none());
    }

    #[tokio::test]
    async fn test_invalid_timing_is_reported() {
        let config = RealtimeConfig::new()
            .with_channel_url("ws://localhost:1/rt")
            .with_poll_interval(std::time::Duration::ZERO);
        let manager = manager(config);
        manager.connect();

        assert!(matches!(
            manager.last_error(),
            Some(ConfigError::InvalidValue(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = manager(RealtimeConfig::new().with_channel_url("ws://localhost:1/rt"));
        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.session_id().is_some());

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.backoff_attempt(), 0);
        assert!(manager.session_id().is_none());
    }

    #[test]
    fn test_publish_is_gated_on_liveness() {
        let shared = Shared::new();
        let alive = AtomicBool::new(false);
        shared.publish(&alive, ConnectionState::Open);
        shared.set_attempt(&alive, 4);

        assert_eq!(*shared.state.borrow(), ConnectionState::Closed);
        assert_eq!(shared.attempt.load(Ordering::Acquire), 0);
    }
}
