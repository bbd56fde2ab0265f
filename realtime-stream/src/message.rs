//! Wire messages exchanged over the live channel.
//!
//! Inbound frames decode into [`Message`], a closed tagged union keyed by the
//! JSON `type` field. Unrecognised types are kept as [`Message::Unknown`] so a
//! newer server never breaks an older client. Outbound traffic is limited to
//! the [`ControlFrame`] set.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MessageError;
use crate::types::{EntityId, Quantity};

/// Wire names of every message type this client understands.
const KNOWN_TYPES: &[&str] = &[
    "stock:update",
    "reservation:created",
    "reservation:updated",
    "reservation:released",
    "entity:expired",
    "ping",
    "pong",
];

/// Reservation expiry, sent either as RFC 3339 or as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpiresAt {
    Timestamp(DateTime<Utc>),
    Millis(i64),
}

impl ExpiresAt {
    /// Normalise to a UTC timestamp. Returns `None` for out-of-range millis.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
        }
    }
}

/// Inbound message from the live channel (or synthesized by the poller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "stock:update", rename_all = "camelCase")]
    StockUpdate {
        entity_id: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant_id: Option<String>,
        available_qty: Quantity,
    },

    #[serde(rename = "reservation:created", rename_all = "camelCase")]
    ReservationCreated {
        entity_id: EntityId,
        reservation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<ExpiresAt>,
        quantity: Quantity,
    },

    #[serde(rename = "reservation:updated", rename_all = "camelCase")]
    ReservationUpdated {
        entity_id: EntityId,
        reservation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<ExpiresAt>,
        quantity: Quantity,
    },

    #[serde(rename = "reservation:released", rename_all = "camelCase")]
    ReservationReleased {
        entity_id: EntityId,
        reservation_id: String,
    },

    #[serde(rename = "entity:expired", rename_all = "camelCase")]
    EntityExpired {
        entity_id: EntityId,
        variant_id: String,
    },

    /// Liveness check; consumed by the connection manager
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<i64>,
    },

    /// Liveness answer; consumed by the connection manager
    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<i64>,
    },

    /// A message type this client does not know yet.
    #[serde(skip)]
    Unknown {
        /// Raw `type` discriminator
        kind: String,
        /// The whole frame as received
        payload: Value,
    },
}

impl Message {
    /// Decode a text frame.
    ///
    /// Frames whose `type` is unknown become [`Message::Unknown`]; frames that
    /// are not JSON objects, lack a `type`, or carry a known type with bad
    /// fields are rejected.
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingType)?;

        if KNOWN_TYPES.contains(&kind) {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(Self::Unknown {
                kind: kind.to_string(),
                payload: value,
            })
        }
    }

    /// Encode back to the JSON wire form.
    pub fn to_json(&self) -> Result<String, MessageError> {
        match self {
            Self::Unknown { payload, .. } => Ok(payload.to_string()),
            other => Ok(serde_json::to_string(other)?),
        }
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::StockUpdate { .. } => "stock:update",
            Self::ReservationCreated { .. } => "reservation:created",
            Self::ReservationUpdated { .. } => "reservation:updated",
            Self::ReservationReleased { .. } => "reservation:released",
            Self::EntityExpired { .. } => "entity:expired",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Unknown { kind, .. } => kind,
        }
    }

    /// The entity this message is about, if it is routable by entity.
    ///
    /// Unknown messages never route by entity, even when their payload has an
    /// `entityId` field.
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Self::StockUpdate { entity_id, .. }
            | Self::ReservationCreated { entity_id, .. }
            | Self::ReservationUpdated { entity_id, .. }
            | Self::ReservationReleased { entity_id, .. }
            | Self::EntityExpired { entity_id, .. } => Some(entity_id),
            Self::Ping { .. } | Self::Pong { .. } | Self::Unknown { .. } => None,
        }
    }

    /// Whether this is a liveness control message (never delivered to handlers).
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping { .. } | Self::Pong { .. })
    }
}

/// Outbound control frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    /// Sent once per open with every currently registered entity
    #[serde(rename = "subscribe:init")]
    SubscribeInit { entities: Vec<EntityId> },

    #[serde(rename = "subscribe:entity", rename_all = "camelCase")]
    SubscribeEntity { entity_id: EntityId },

    #[serde(rename = "unsubscribe:entity", rename_all = "camelCase")]
    UnsubscribeEntity { entity_id: EntityId },

    #[serde(rename = "ping")]
    Ping { ts: i64 },
}

impl ControlFrame {
    /// A ping stamped with the current wall clock in epoch milliseconds.
    pub fn ping_now() -> Self {
        Self::Ping {
            ts: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
