use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActorId, LedgerError, LocationId, ProductId};

/// Unique identifier for a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MovementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of mutation produced a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Receipt,
    Delivery,
    Transfer,
    Adjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receipt => "receipt",
            MovementKind::Delivery => "delivery",
            MovementKind::Transfer => "transfer",
            MovementKind::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MovementKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(MovementKind::Receipt),
            "delivery" => Ok(MovementKind::Delivery),
            "transfer" => Ok(MovementKind::Transfer),
            "adjustment" => Ok(MovementKind::Adjustment),
            other => Err(LedgerError::InvalidData(format!(
                "unknown movement kind '{other}'"
            ))),
        }
    }
}

/// An immutable journal entry describing one committed quantity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementEntry {
    pub id: MovementId,
    pub product_id: ProductId,
    pub from_location_id: Option<LocationId>,
    pub to_location_id: Option<LocationId>,
    /// Magnitude of the change actually applied.
    pub qty: i64,
    #[serde(rename = "type")]
    pub kind: MovementKind,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
}

/// A journal entry that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub from_location_id: Option<LocationId>,
    pub to_location_id: Option<LocationId>,
    pub qty: i64,
    pub kind: MovementKind,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

impl NewMovement {
    fn new(
        kind: MovementKind,
        product_id: ProductId,
        from_location_id: Option<LocationId>,
        to_location_id: Option<LocationId>,
        qty: i64,
    ) -> Self {
        Self {
            product_id,
            from_location_id,
            to_location_id,
            qty,
            kind,
            reason: None,
            performed_by: None,
        }
    }

    /// Stock arriving at `location_id`.
    pub fn receipt(product_id: ProductId, location_id: LocationId, qty: i64) -> Self {
        Self::new(MovementKind::Receipt, product_id, None, Some(location_id), qty)
    }

    /// Stock leaving from `location_id`.
    pub fn delivery(product_id: ProductId, location_id: LocationId, qty: i64) -> Self {
        Self::new(MovementKind::Delivery, product_id, Some(location_id), None, qty)
    }

    pub fn transfer(product_id: ProductId, from: LocationId, to: LocationId, qty: i64) -> Self {
        Self::new(MovementKind::Transfer, product_id, Some(from), Some(to), qty)
    }

    /// A count correction from `previous` to `counted`.
    ///
    /// The location is recorded as the source when the count went down and as
    /// the destination when it went up; an unchanged count records both.
    pub fn adjustment(
        product_id: ProductId,
        location_id: LocationId,
        previous: i64,
        counted: i64,
    ) -> Self {
        let diff = counted - previous;
        Self::new(
            MovementKind::Adjustment,
            product_id,
            (diff <= 0).then_some(location_id),
            (diff >= 0).then_some(location_id),
            diff.abs(),
        )
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn performed_by(mut self, actor: Option<ActorId>) -> Self {
        self.performed_by = actor;
        self
    }

    /// Stamps the entry with its identity and write time.
    pub fn into_entry(self, id: MovementId, created_at: DateTime<Utc>) -> MovementEntry {
        MovementEntry {
            id,
            product_id: self.product_id,
            from_location_id: self.from_location_id,
            to_location_id: self.to_location_id,
            qty: self.qty,
            kind: self.kind,
            reason: self.reason,
            performed_by: self.performed_by,
            created_at,
        }
    }
}
