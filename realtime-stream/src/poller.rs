//! Polling fallback for transparent event delivery
//!
//! When no live channel is available the poller periodically asks the REST
//! API for the stock of every subscribed entity and feeds the answers through
//! the registry as `stock:update` messages, so consumers cannot tell which
//! source an update came from. Failures are logged and retried on the next
//! tick; polling never backs off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use url::Url;

use crate::error::PollError;
use crate::message::Message;
use crate::registry::SubscriptionRegistry;
use crate::types::{EntityId, Quantity};

/// Current stock of one entity as reported by the REST API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSnapshot {
    pub entity_id: EntityId,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub available_qty: Quantity,
}

impl StockSnapshot {
    pub fn new(entity_id: impl Into<EntityId>, available_qty: impl Into<Quantity>) -> Self {
        Self {
            entity_id: entity_id.into(),
            variant_id: None,
            available_qty: available_qty.into(),
        }
    }

    /// The message a live channel would have sent for this snapshot.
    pub fn into_message(self) -> Message {
        Message::StockUpdate {
            entity_id: self.entity_id,
            variant_id: self.variant_id,
            available_qty: self.available_qty,
        }
    }
}

/// Source of stock snapshots for the poller.
#[async_trait]
pub trait StockSource: Send + Sync + 'static {
    /// Fetch the current stock of `entities` in one request.
    async fn fetch_stock(&self, entities: &[EntityId]) -> Result<Vec<StockSnapshot>, PollError>;
}

/// `GET {base}/stock/multi?entities=a,b,c` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStockSource {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpStockSource {
    /// Build a source for the API rooted at `api_base`.
    pub fn new(api_base: &Url, request_timeout: Duration) -> Result<Self, PollError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: stock_endpoint(api_base)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn stock_endpoint(api_base: &Url) -> Result<Url, PollError> {
    let mut endpoint = api_base.clone();
    endpoint
        .path_segments_mut()
        .map_err(|_| PollError::InvalidEndpoint(format!("{} cannot be a base URL", api_base)))?
        .pop_if_empty()
        .extend(["stock", "multi"]);
    endpoint.set_query(None);
    Ok(endpoint)
}

#[async_trait]
impl StockSource for HttpStockSource {
    async fn fetch_stock(&self, entities: &[EntityId]) -> Result<Vec<StockSnapshot>, PollError> {
        let ids = entities
            .iter()
            .map(EntityId::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("entities", ids.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(parse_stock_body(&body))
    }
}

/// Extract snapshots from a `{ data: [...] }` body.
///
/// A body that is not JSON or has no `data` array means "no update this tick";
/// malformed items are skipped individually.
pub fn parse_stock_body(body: &str) -> Vec<StockSnapshot> {
    let items = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut object)) => match object.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                tracing::debug!("Poll response has no data array");
                return Vec::new();
            }
        },
        _ => {
            tracing::debug!("Poll response is not a JSON object");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<StockSnapshot>(item) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::debug!("Skipping malformed stock item: {}", e);
                None
            }
        })
        .collect()
}

/// What a single poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing is subscribed; no request was made
    Skipped,
    /// Request succeeded and this many messages were dispatched
    Delivered(usize),
    /// Request failed; retried on the next tick
    Failed,
    /// The session ended while the request was in flight; nothing dispatched
    Abandoned,
}

/// Polls a [`StockSource`] for every subscribed entity.
#[derive(Clone)]
pub struct FallbackPoller {
    source: Arc<dyn StockSource>,
    registry: SubscriptionRegistry,
}

impl FallbackPoller {
    pub fn new(source: Arc<dyn StockSource>, registry: SubscriptionRegistry) -> Self {
        Self { source, registry }
    }

    /// Run one tick. Nothing is dispatched once `is_live` reports false.
    pub async fn poll_once<F>(&self, is_live: F) -> PollOutcome
    where
        F: Fn() -> bool + Send,
    {
        let entities = self.registry.entity_ids();
        if entities.is_empty() {
            return PollOutcome::Skipped;
        }

        let snapshots = match self.source.fetch_stock(&entities).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracing::warn!(entities = entities.len(), "Stock poll failed: {}", e);
                return PollOutcome::Failed;
            }
        };

        let mut delivered = 0;
        for snapshot in snapshots {
            if !is_live() {
                return PollOutcome::Abandoned;
            }
            self.registry.dispatch_while(&snapshot.into_message(), &is_live);
            delivered += 1;
        }

        tracing::debug!(entities = entities.len(), delivered, "Stock poll completed");
        PollOutcome::Delivered(delivered)
    }
}

impl std::fmt::Debug for FallbackPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPoller")
            .field("registry", &self.registry)
            .finish()
    }
}

/// A running poll loop.
///
/// The first tick fires one interval after start. Stopping or dropping the
/// task aborts it, including any request in flight.
#[derive(Debug)]
pub struct PollingTask {
    interval: Duration,
    shutdown_signal: Arc<AtomicBool>,
    task_handle: JoinHandle<()>,
}

impl PollingTask {
    /// Start polling every `interval` while `alive` holds.
    pub fn start(poller: FallbackPoller, interval: Duration, alive: Arc<AtomicBool>) -> Self {
        let shutdown_signal = Arc::new(AtomicBool::new(false));
        let task_shutdown = Arc::clone(&shutdown_signal);

        let task_handle = tokio::spawn(async move {
            Self::polling_loop(poller, interval, alive, task_shutdown).await;
        });

        tracing::info!(interval_ms = interval.as_millis() as u64, "Polling fallback started");
        Self {
            interval,
            shutdown_signal,
            task_handle,
        }
    }

    async fn polling_loop(
        poller: FallbackPoller,
        interval: Duration,
        alive: Arc<AtomicBool>,
        shutdown_signal: Arc<AtomicBool>,
    ) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let is_live = || {
                alive.load(Ordering::Acquire) && !shutdown_signal.load(Ordering::Acquire)
            };
            if !is_live() {
                break;
            }
            if poller.poll_once(is_live).await == PollOutcome::Abandoned {
                break;
            }
        }

        tracing::debug!("Polling loop ended");
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Stop polling; an in-flight request is abandoned.
    pub fn stop(self) {
        tracing::info!("Polling fallback stopped");
    }
}

impl Drop for PollingTask {
    fn drop(&mut self) {
        self.shutdown_signal.store(true, Ordering::Release);
        self.task_handle.abort();
    }
}
