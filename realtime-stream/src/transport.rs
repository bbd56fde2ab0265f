//! Live channel transport.
//!
//! The connection manager only sees a [`Channel`]: a text-frame sender and an
//! event receiver. A [`Connector`] produces channels; [`WebSocketConnector`] is
//! the production implementation, tests plug in in-memory connectors.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::TransportError;
use crate::message::ControlFrame;

/// Event surfaced by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One inbound text frame
    Frame(String),
    /// The channel ended; no further events follow
    Closed { reason: Option<String> },
}

/// One established live connection.
///
/// Dropping or closing the channel stops its pump task.
#[derive(Debug)]
pub struct Channel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    pump: Option<JoinHandle<()>>,
    closed: bool,
}

impl Channel {
    /// Wrap a pair of in-process queues as a channel.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            pump: None,
            closed: false,
        }
    }

    /// Attach the task that moves frames between the queues and the network.
    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn send(&self, frame: &ControlFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ChannelClosed);
        }
        let text = frame.to_json()?;
        self.outbound
            .send(text)
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Wait for the next inbound event. A vanished peer reads as `Closed`.
    pub async fn recv(&mut self) -> ChannelEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => ChannelEvent::Closed { reason: None },
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inbound.close();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens live channels.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Channel, TransportError>;
}

/// Connector speaking WebSocket via tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Channel, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_frames(stream, outbound_rx, inbound_tx));

        Ok(Channel::new(outbound_tx, inbound_rx).with_pump(pump))
    }
}

async fn pump_frames(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<ChannelEvent>,
) {
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        break Some(e.to_string());
                    }
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break None;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if inbound.send(ChannelEvent::Frame(text)).is_err() {
                        break None;
                    }
                }
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if inbound.send(ChannelEvent::Frame(text)).is_err() {
                            break None;
                        }
                    }
                    Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map(|f| f.reason.into_owned());
                }
                // tungstenite answers protocol pings itself
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            },
        }
    };

    tracing::debug!(reason = ?reason, "WebSocket pump finished");
    let _ = inbound.send(ChannelEvent::Closed { reason });
}
