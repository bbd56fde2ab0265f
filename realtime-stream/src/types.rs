//! Core types for the realtime-stream crate.

use serde::{Deserialize, Serialize, Serializer};

/// Identifier of a stock-bearing entity (product, SKU, bed, slot...).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create a new entity ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the entity ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Largest magnitude at which every whole `f64` is an exact integer (2^53).
const MAX_EXACT_WHOLE: f64 = 9_007_199_254_740_992.0;

/// A stock or reservation quantity.
///
/// Backends send either integers or decimals (`7`, `7.0`, `2.5`), and
/// fractional stock is common for goods sold by weight or volume. Whole
/// values are written back as JSON integers.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize)]
#[serde(transparent)]
pub struct Quantity(f64);

impl Quantity {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// The quantity as an integer, when it is whole and exactly representable.
    pub fn as_whole(&self) -> Option<i64> {
        if self.0.fract() == 0.0 && self.0.abs() <= MAX_EXACT_WHOLE {
            Some(self.0 as i64)
        } else {
            None
        }
    }

    pub fn is_whole(&self) -> bool {
        self.as_whole().is_some()
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_whole() {
            Some(whole) => serializer.serialize_i64(whole),
            None => serializer.serialize_f64(self.0),
        }
    }
}

impl From<i32> for Quantity {
    fn from(value: i32) -> Self {
        Self(f64::from(value))
    }
}

impl From<u32> for Quantity {
    fn from(value: u32) -> Self {
        Self(f64::from(value))
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self(value as f64)
    }
}

impl From<f64> for Quantity {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_whole() {
            Some(whole) => write!(f, "{}", whole),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Lifecycle state of the connection manager.
///
/// Exactly one state is active at a time. `Closed` is both the initial state
/// and the transient state between a failure and the next reconnect attempt.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum ConnectionState {
    /// No live channel; either never connected, disconnected, or awaiting a retry
    #[default]
    Closed,
    /// A channel establishment attempt is in flight
    Connecting,
    /// The live channel is established
    Open,
    /// The live channel is unavailable and REST polling delivers updates
    FallbackPolling,
}

impl ConnectionState {
    /// Whether updates are currently flowing from some source.
    pub fn is_receiving(&self) -> bool {
        matches!(self, Self::Open | Self::FallbackPolling)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::FallbackPolling => "fallback-polling",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_conversions() {
        let from_str: EntityId = "sku-1".into();
        let from_string: EntityId = String::from("sku-1").into();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.as_str(), "sku-1");
        assert_eq!(from_str.to_string(), "sku-1");
    }

    #[test]
    fn test_entity_id_serializes_as_plain_string() {
        let id = EntityId::new("sku-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sku-42\"");
    }

    #[test]
    fn test_quantity_accepts_integer_and_decimal_json() {
        let whole: Quantity = serde_json::from_str("7").unwrap();
        let whole_decimal: Quantity = serde_json::from_str("7.0").unwrap();
        let fractional: Quantity = serde_json::from_str("2.5").unwrap();

        assert_eq!(whole, Quantity::from(7));
        assert_eq!(whole_decimal, whole);
        assert_eq!(fractional.value(), 2.5);
        assert!(serde_json::from_str::<Quantity>("\"7\"").is_err());
    }

    #[test]
    fn test_quantity_writes_whole_values_as_integers() {
        assert_eq!(serde_json::to_string(&Quantity::new(7.0)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&Quantity::new(2.5)).unwrap(), "2.5");
        assert_eq!(Quantity::new(-3.0).as_whole(), Some(-3));
        assert_eq!(Quantity::new(1e300).as_whole(), None);
        assert_eq!(Quantity::new(7.0).to_string(), "7");
        assert_eq!(Quantity::new(0.25).to_string(), "0.25");
    }

    #[test]
    fn test_connection_state_defaults_to_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert!(!ConnectionState::Connecting.is_receiving());
        assert!(ConnectionState::FallbackPolling.is_receiving());
        assert_eq!(ConnectionState::FallbackPolling.to_string(), "fallback-polling");
    }
}
