//! Session driver task.
//!
//! One driver runs per session and owns every piece of connection state: the
//! channel, the heartbeat ticker, the reconnect deadline, the in-flight
//! connection attempt and the poll task. A single `select!` loop multiplexes
//! them, so transitions never race each other.

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use url::Url;
use uuid::Uuid;

use crate::backoff::BackoffState;
use crate::config::RealtimeConfig;
use crate::error::TransportError;
use crate::heartbeat::{HeartbeatMonitor, Liveness};
use crate::message::{ControlFrame, Message};
use crate::poller::{FallbackPoller, PollingTask};
use crate::registry::{InterestChange, SubscriptionRegistry};
use crate::transport::{Channel, ChannelEvent, Connector};
use crate::types::ConnectionState;

use super::Shared;

type Attempt = BoxFuture<'static, Result<Channel, TransportError>>;

/// Commands sent from the [`ConnectionManager`](super::ConnectionManager) handle
#[derive(Debug)]
pub(crate) enum Command {
    /// Run a heartbeat check immediately
    Heartbeat,
}

/// Everything a session needs before its loop starts.
pub(crate) struct Driver {
    pub(crate) session: Uuid,
    pub(crate) channel_url: Option<Url>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) poller: Option<FallbackPoller>,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) shared: Arc<Shared>,
    pub(crate) alive: Arc<AtomicBool>,
    pub(crate) config: RealtimeConfig,
    pub(crate) interest: Option<mpsc::UnboundedReceiver<InterestChange>>,
}

impl Driver {
    pub(crate) async fn run(self, commands: mpsc::UnboundedReceiver<Command>) {
        let heartbeat = HeartbeatMonitor::new(
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
        );
        let mut session = SessionLoop {
            driver: self,
            backoff: BackoffState::default(),
            heartbeat,
            attempt: None,
            channel: None,
            ticker: None,
            reconnect_at: None,
            polling: None,
        };

        tracing::debug!(session = %session.driver.session, "Connection driver started");

        if session.driver.channel_url.is_some() {
            session.begin_attempt();
        } else {
            session.start_polling();
            session.publish(ConnectionState::FallbackPolling);
        }

        session.run(commands).await;

        tracing::debug!(session = %session.driver.session, "Connection driver stopped");
    }
}

struct SessionLoop {
    driver: Driver,
    backoff: BackoffState,
    heartbeat: HeartbeatMonitor,
    attempt: Option<Attempt>,
    channel: Option<Channel>,
    ticker: Option<Interval>,
    reconnect_at: Option<Instant>,
    polling: Option<PollingTask>,
}

impl SessionLoop {
    async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                result = next_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    match result {
                        Ok(channel) => self.on_open(channel),
                        Err(e) => {
                            tracing::warn!(
                                session = %self.driver.session,
                                attempt = self.backoff.attempt + 1,
                                "Live channel attempt failed: {}",
                                e
                            );
                            self.schedule_reconnect();
                        }
                    }
                }
                event = next_event(&mut self.channel) => match event {
                    ChannelEvent::Frame(text) => self.on_frame(&text),
                    ChannelEvent::Closed { reason } => {
                        tracing::warn!(
                            session = %self.driver.session,
                            reason = reason.as_deref().unwrap_or("none"),
                            "Live channel closed"
                        );
                        self.on_channel_lost();
                    }
                },
                _ = next_tick(&mut self.ticker) => self.on_heartbeat_tick(),
                _ = deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_attempt();
                }
                change = next_interest(&mut self.driver.interest) => match change {
                    Some(change) => self.on_interest(change),
                    None => self.driver.interest = None,
                },
                command = commands.recv() => match command {
                    Some(Command::Heartbeat) => self.on_heartbeat_tick(),
                    None => break,
                },
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.driver.alive.load(Ordering::Acquire)
    }

    fn publish(&self, state: ConnectionState) {
        self.driver.shared.publish(&self.driver.alive, state);
    }

    /// Start one channel attempt, dropping any stale channel first.
    fn begin_attempt(&mut self) {
        let Some(url) = self.driver.channel_url.clone() else {
            return;
        };
        self.drop_channel();
        self.publish(ConnectionState::Connecting);

        tracing::debug!(
            session = %self.driver.session,
            attempt = self.backoff.attempt + 1,
            url = %url,
            "Opening live channel"
        );

        let connector = Arc::clone(&self.driver.connector);
        let timeout = self.driver.config.connect_timeout;
        self.attempt = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::ConnectTimeout(timeout)),
            }
        }));
    }

    fn on_open(&mut self, channel: Channel) {
        if !self.is_alive() {
            return;
        }

        self.backoff.reset();
        self.driver.shared.set_attempt(&self.driver.alive, 0);
        let now = Instant::now();
        self.heartbeat.reset(now);
        self.stop_polling();

        // subscribe:init carries the full interest set; queued deltas are stale
        if let Some(interest) = self.driver.interest.as_mut() {
            while interest.try_recv().is_ok() {}
        }

        let entities = self.driver.registry.entity_ids();
        let count = entities.len();
        if let Err(e) = channel.send(&ControlFrame::SubscribeInit { entities }) {
            tracing::warn!(session = %self.driver.session, "Failed to send subscribe:init: {}", e);
        }
        self.channel = Some(channel);

        let period = self.heartbeat.interval();
        let mut ticker = interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);

        self.publish(ConnectionState::Open);
        tracing::info!(session = %self.driver.session, entities = count, "Live channel open");
    }

    fn on_frame(&mut self, text: &str) {
        self.heartbeat.record_traffic(Instant::now());

        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session = %self.driver.session, "Dropping undecodable frame: {}", e);
                return;
            }
        };

        if message.is_control() {
            tracing::trace!(kind = message.kind(), "Liveness frame received");
            return;
        }

        if !self.is_alive() {
            return;
        }

        tracing::debug!(
            kind = message.kind(),
            entity_id = ?message.entity_id(),
            "Dispatching live message"
        );
        let alive = &self.driver.alive;
        self.driver
            .registry
            .dispatch_while(&message, || alive.load(Ordering::Acquire));
    }

    fn on_heartbeat_tick(&mut self) {
        let Some(channel) = self.channel.as_ref() else {
            return;
        };

        match self.heartbeat.check(Instant::now()) {
            Liveness::Alive => {
                if let Err(e) = channel.send(&ControlFrame::ping_now()) {
                    tracing::debug!(session = %self.driver.session, "Ping not sent: {}", e);
                }
            }
            Liveness::Dead { silent_for } => {
                tracing::warn!(
                    session = %self.driver.session,
                    silent_ms = silent_for.as_millis() as u64,
                    "Heartbeat timed out"
                );
                self.on_channel_lost();
            }
        }
    }

    fn on_interest(&mut self, change: InterestChange) {
        // while not open the next subscribe:init covers it
        let Some(channel) = self.channel.as_ref() else {
            return;
        };

        let frame = match change {
            InterestChange::Subscribed(entity_id) => ControlFrame::SubscribeEntity { entity_id },
            InterestChange::Unsubscribed(entity_id) => {
                ControlFrame::UnsubscribeEntity { entity_id }
            }
        };
        if let Err(e) = channel.send(&frame) {
            tracing::warn!(session = %self.driver.session, "Failed to send subscription change: {}", e);
        }
    }

    fn on_channel_lost(&mut self) {
        self.drop_channel();
        self.schedule_reconnect();
    }

    fn drop_channel(&mut self) {
        self.ticker = None;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Arm the reconnect timer. A second call while armed does nothing.
    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }

        let delay = self.backoff.record_failure(&self.driver.config.backoff);
        let attempt = self.backoff.attempt;
        self.driver.shared.set_attempt(&self.driver.alive, attempt);
        self.reconnect_at = Some(Instant::now() + delay);

        let threshold = self.driver.config.fallback_after_failures;
        if threshold > 0 && attempt >= threshold {
            self.start_polling();
        }

        if self.polling.is_some() {
            self.publish(ConnectionState::FallbackPolling);
        } else {
            self.publish(ConnectionState::Closed);
        }

        tracing::debug!(
            session = %self.driver.session,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    fn start_polling(&mut self) {
        if self.polling.is_some() {
            return;
        }
        let Some(poller) = self.driver.poller.clone() else {
            return;
        };
        self.polling = Some(PollingTask::start(
            poller,
            self.driver.config.poll_interval,
            Arc::clone(&self.driver.alive),
        ));
    }

    fn stop_polling(&mut self) {
        if let Some(task) = self.polling.take() {
            task.stop();
        }
    }
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> Result<Channel, TransportError> {
    match attempt {
        Some(attempt) => attempt.await,
        None => pending().await,
    }
}

async fn next_event(channel: &mut Option<Channel>) -> ChannelEvent {
    match channel {
        Some(channel) => channel.recv().await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn next_interest(
    interest: &mut Option<mpsc::UnboundedReceiver<InterestChange>>,
) -> Option<InterestChange> {
    match interest {
        Some(interest) => interest.recv().await,
        None => pending().await,
    }
}
