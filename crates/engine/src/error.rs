//! Engine error types.

use common::{LocationId, ProductId};
use ledger_store::LedgerError;
use thiserror::Error;

/// A command rejected before any storage access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),

    #[error("Quantity must not be negative, got {0}")]
    NegativeQuantity(i64),

    /// Transfers need two distinct locations.
    #[error("Source and destination are the same location: {0}")]
    SameLocation(LocationId),
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid command: {0}")]
    Validation(#[from] ValidationError),

    /// The source location does not hold enough stock. Nothing was written.
    #[error(
        "Insufficient stock for product {product_id} at location {location_id}: requested {requested}"
    )]
    InsufficientStock {
        product_id: ProductId,
        location_id: LocationId,
        requested: i64,
    },

    /// The destination already holds so much that adding would overflow.
    /// Nothing was written.
    #[error("Quantity overflow for product {product_id} at location {location_id}")]
    QuantityOverflow {
        product_id: ProductId,
        location_id: LocationId,
    },

    /// The unit was aborted by the store.
    #[error("Store error: {0}")]
    Store(#[source] LedgerError),
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::QuantityOverflow(key) => EngineError::QuantityOverflow {
                product_id: key.product_id,
                location_id: key.location_id,
            },
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    /// Returns true for transient store failures; the caller may resend the
    /// same command.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_retryable(),
            EngineError::Validation(_)
            | EngineError::InsufficientStock { .. }
            | EngineError::QuantityOverflow { .. } => false,
        }
    }

    /// Short label used for the failure metric.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::InsufficientStock { .. } => "insufficient_stock",
            EngineError::QuantityOverflow { .. } => "quantity_overflow",
            EngineError::Store(e) if e.is_retryable() => "retryable",
            EngineError::Store(_) => "store",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_store::StockKey;

    #[test]
    fn business_failures_are_not_retryable() {
        let insufficient = EngineError::InsufficientStock {
            product_id: ProductId::new(),
            location_id: LocationId::new(),
            requested: 3,
        };
        assert!(!insufficient.is_retryable());
        assert_eq!(insufficient.kind(), "insufficient_stock");

        let invalid = EngineError::from(ValidationError::NonPositiveQuantity(0));
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.kind(), "validation");
    }

    #[test]
    fn lock_timeout_is_retryable() {
        let key = StockKey::new(ProductId::new(), LocationId::new());
        let err = EngineError::from(LedgerError::LockTimeout(key));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "retryable");
    }

    #[test]
    fn store_overflow_becomes_a_business_failure() {
        let key = StockKey::new(ProductId::new(), LocationId::new());
        let err = EngineError::from(LedgerError::QuantityOverflow(key));
        assert!(matches!(
            err,
            EngineError::QuantityOverflow { product_id, location_id }
                if product_id == key.product_id && location_id == key.location_id
        ));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "quantity_overflow");
    }

    #[test]
    fn invalid_data_is_not_retryable() {
        let err = EngineError::from(LedgerError::InvalidData("bad kind".into()));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "store");
    }
}
