use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LocationId, ProductId};

/// Identity of a ledger record: one per (product, location).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub product_id: ProductId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(product_id: ProductId, location_id: LocationId) -> Self {
        Self {
            product_id,
            location_id,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.location_id)
    }
}

/// Write counter of a ledger record, used for compare-and-set updates.
///
/// A freshly created record is at version 0; every later write moves it
/// forward by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of a record that has never been written after creation.
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-hand quantity of one product at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    pub product_id: ProductId,
    pub location_id: LocationId,
    /// Never negative.
    pub quantity: i64,
    /// Held quantity; not allocated against by the ledger.
    pub reserved: i64,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// A new, empty record for `key`.
    pub fn empty(key: StockKey, now: DateTime<Utc>) -> Self {
        Self {
            product_id: key.product_id,
            location_id: key.location_id,
            quantity: 0,
            reserved: 0,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }

    /// Returns this record rewritten to `quantity` at the next version.
    pub fn with_quantity(mut self, quantity: i64, now: DateTime<Utc>) -> Self {
        self.quantity = quantity;
        self.version = self.version.next();
        self.updated_at = now;
        self
    }
}
