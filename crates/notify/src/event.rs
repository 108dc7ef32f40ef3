//! Notification events and the channels they are routed to.

use chrono::{DateTime, Utc};
use common::{LocationId, ProductId};
use serde::{Deserialize, Serialize};

/// Event name for a quantity change, on the location channel.
pub const STOCK_CHANGED: &str = "stock:changed";
/// Event name for a quantity change, on the global channel.
pub const STOCK_CHANGED_GLOBAL: &str = "stock:changed:global";
/// Event name for a low-stock alert.
pub const STOCK_LOW: &str = "stock:low";

/// A real-time delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Subscribers watching one location.
    Location(LocationId),
    /// Every subscriber.
    Global,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Location(id) => write!(f, "location:{id}"),
            Channel::Global => f.write_str("global"),
        }
    }
}

/// Payload of a quantity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChanged {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub new_qty: i64,
}

/// Payload of a low-stock alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStock {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub qty: i64,
    pub threshold: i64,
    pub time: DateTime<Utc>,
}

/// An event waiting in the publisher queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockEvent {
    Changed(StockChanged),
    LowStock(LowStock),
}

impl StockEvent {
    /// The `(channel, event name)` pairs this event is emitted on.
    pub fn routes(&self) -> Vec<(Channel, &'static str)> {
        match self {
            StockEvent::Changed(changed) => vec![
                (Channel::Location(changed.location_id), STOCK_CHANGED),
                (Channel::Global, STOCK_CHANGED_GLOBAL),
            ],
            StockEvent::LowStock(_) => vec![(Channel::Global, STOCK_LOW)],
        }
    }

    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StockEvent::Changed(changed) => serde_json::to_value(changed),
            StockEvent::LowStock(low) => serde_json::to_value(low),
        }
    }
}
