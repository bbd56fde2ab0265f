//! Scripted in-memory connector and stock source for integration tests.
//!
//! Each `connect()` consumes the next [`Script`] step. Accepted connections are
//! plain in-process queues, so tests can push server frames, inspect what the
//! client sent, and close the server side at will.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use realtime_stream::{
    Channel, ChannelEvent, Connector, EntityId, PollError, StockSnapshot, StockSource,
    TransportError,
};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use url::Url;

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Open a channel immediately
    Accept,
    /// Fail immediately
    Refuse,
    /// Never complete; only the connect timeout ends the attempt
    Hang,
}

struct ServerSide {
    to_client: Option<mpsc::UnboundedSender<ChannelEvent>>,
    from_client: mpsc::UnboundedReceiver<String>,
    received: Vec<String>,
}

/// Connector whose behavior is scripted per attempt. Refuses once the script runs out.
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<Url>>,
    servers: Mutex<Vec<ServerSide>>,
}

impl MockConnector {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        })
    }

    /// A connector that refuses every attempt.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_script(&self, step: Script) {
        self.script.lock().push_back(step);
    }

    /// Number of `connect()` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }

    /// Number of accepted connections so far.
    pub fn connections(&self) -> usize {
        self.servers.lock().len()
    }

    /// Deliver a text frame to the client over accepted connection `index`.
    pub fn push_to_client(&self, index: usize, text: &str) {
        let servers = self.servers.lock();
        let sender = servers[index]
            .to_client
            .as_ref()
            .expect("server side already closed");
        let _ = sender.send(ChannelEvent::Frame(text.to_string()));
    }

    /// Close connection `index` from the server side.
    pub fn close_server(&self, index: usize) {
        let mut servers = self.servers.lock();
        if let Some(sender) = servers[index].to_client.take() {
            let _ = sender.send(ChannelEvent::Closed {
                reason: Some("server restart".to_string()),
            });
        }
    }

    /// Every frame the client sent over connection `index`, in order.
    pub fn sent_frames(&self, index: usize) -> Vec<String> {
        let mut servers = self.servers.lock();
        let server = &mut servers[index];
        while let Ok(frame) = server.from_client.try_recv() {
            server.received.push(frame);
        }
        server.received.clone()
    }

    pub fn sent_json(&self, index: usize) -> Vec<Value> {
        self.sent_frames(index)
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("client sent invalid JSON"))
            .collect()
    }

    /// The `type` of every frame sent over connection `index`.
    pub fn sent_types(&self, index: usize) -> Vec<String> {
        self.sent_json(index)
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Channel, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());
        let step = self.script.lock().pop_front().unwrap_or(Script::Refuse);

        match step {
            Script::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                self.servers.lock().push(ServerSide {
                    to_client: Some(inbound_tx),
                    from_client: outbound_rx,
                    received: Vec::new(),
                });
                Ok(Channel::new(outbound_tx, inbound_rx))
            }
            Script::Refuse => Err(TransportError::ConnectFailed(
                "connection refused".to_string(),
            )),
            Script::Hang => pending().await,
        }
    }
}

/// Stock source answering from a fixed table, optionally held until released.
#[derive(Default)]
pub struct MockStockSource {
    answer: Mutex<Vec<StockSnapshot>>,
    requests: Mutex<Vec<Vec<EntityId>>>,
    gate: Option<Arc<Notify>>,
    failing: bool,
}

impl MockStockSource {
    pub fn answering(answer: Vec<StockSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            ..Default::default()
        })
    }

    /// A source whose requests block until `gate` is notified.
    pub fn gated(answer: Vec<StockSnapshot>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            gate: Some(gate),
            ..Default::default()
        })
    }

    /// A source whose every request fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<Vec<EntityId>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl StockSource for MockStockSource {
    async fn fetch_stock(&self, entities: &[EntityId]) -> Result<Vec<StockSnapshot>, PollError> {
        self.requests.lock().push(entities.to_vec());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.failing {
            return Err(PollError::Source("stock service unavailable".to_string()));
        }
        Ok(self.answer.lock().clone())
    }
}
