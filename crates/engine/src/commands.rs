//! Stock commands.
//!
//! Each command checks its own shape in `validate`; the engine calls it
//! before opening a unit, so a rejected command never touches storage.

use common::{ActorId, LocationId, ProductId};

use crate::error::ValidationError;

fn positive(qty: i64) -> Result<(), ValidationError> {
    if qty <= 0 {
        return Err(ValidationError::NonPositiveQuantity(qty));
    }
    Ok(())
}

fn non_negative(qty: i64) -> Result<(), ValidationError> {
    if qty < 0 {
        return Err(ValidationError::NegativeQuantity(qty));
    }
    Ok(())
}

/// Command to add incoming stock at a location.
#[derive(Debug, Clone)]
pub struct Receive {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub qty: i64,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

impl Receive {
    pub fn new(product_id: ProductId, location_id: LocationId, qty: i64) -> Self {
        Self {
            product_id,
            location_id,
            qty,
            reason: None,
            performed_by: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn performed_by(mut self, actor: ActorId) -> Self {
        self.performed_by = Some(actor);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        positive(self.qty)
    }
}

/// Command to ship stock out of a location.
#[derive(Debug, Clone)]
pub struct Deliver {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub qty: i64,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

impl Deliver {
    pub fn new(product_id: ProductId, location_id: LocationId, qty: i64) -> Self {
        Self {
            product_id,
            location_id,
            qty,
            reason: None,
            performed_by: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn performed_by(mut self, actor: ActorId) -> Self {
        self.performed_by = Some(actor);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        positive(self.qty)
    }
}

/// Command to move stock between two locations.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub product_id: ProductId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub qty: i64,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

impl Transfer {
    pub fn new(
        product_id: ProductId,
        from_location_id: LocationId,
        to_location_id: LocationId,
        qty: i64,
    ) -> Self {
        Self {
            product_id,
            from_location_id,
            to_location_id,
            qty,
            reason: None,
            performed_by: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn performed_by(mut self, actor: ActorId) -> Self {
        self.performed_by = Some(actor);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        positive(self.qty)?;
        if self.from_location_id == self.to_location_id {
            return Err(ValidationError::SameLocation(self.from_location_id));
        }
        Ok(())
    }
}

/// Command to overwrite a quantity with a physical count.
#[derive(Debug, Clone)]
pub struct Reconcile {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub counted_qty: i64,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

impl Reconcile {
    pub fn new(product_id: ProductId, location_id: LocationId, counted_qty: i64) -> Self {
        Self {
            product_id,
            location_id,
            counted_qty,
            reason: None,
            performed_by: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn performed_by(mut self, actor: ActorId) -> Self {
        self.performed_by = Some(actor);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        non_negative(self.counted_qty)
    }
}

/// Administrative command to set an opening quantity.
///
/// Unlike [`Reconcile`] it leaves no journal entry.
#[derive(Debug, Clone)]
pub struct Initialize {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
}

impl Initialize {
    pub fn new(product_id: ProductId, location_id: LocationId, quantity: i64) -> Self {
        Self {
            product_id,
            location_id,
            quantity,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        non_negative(self.quantity)
    }
}
