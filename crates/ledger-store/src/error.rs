use thiserror::Error;

use crate::{StockKey, Version};

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A compare-and-set write found the record at a different version
    /// than the one the caller read.
    #[error("Concurrency conflict for stock {key}: expected version {expected}")]
    ConcurrencyConflict { key: StockKey, expected: Version },

    /// Waiting for another unit holding the same key took too long.
    #[error("Timed out waiting for lock on stock {0}")]
    LockTimeout(StockKey),

    /// The database aborted the transaction (serialization failure or deadlock).
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// Adding to the record would take its quantity past `i64::MAX`.
    #[error("Quantity overflow for stock {0}")]
    QuantityOverflow(StockKey),

    /// The store cannot currently accept work.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be mapped back into a ledger type.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true when re-running the whole unit may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::ConcurrencyConflict { .. }
            | LedgerError::LockTimeout(_)
            | LedgerError::Aborted(_)
            | LedgerError::Unavailable(_) => true,
            LedgerError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            LedgerError::QuantityOverflow(_)
            | LedgerError::InvalidData(_)
            | LedgerError::Migration(_) => false,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        // 40001 serialization_failure, 40P01 deadlock_detected
        if let sqlx::Error::Database(ref db_err) = e
            && matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        {
            tracing::warn!(
                code = ?db_err.code(),
                message = db_err.message(),
                "transaction aborted by database"
            );
            return LedgerError::Aborted(db_err.message().to_string());
        }
        LedgerError::Database(e)
    }
}

/// Result type for ledger store operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocationId, ProductId};

    #[test]
    fn conflicts_and_timeouts_are_retryable() {
        let key = StockKey::new(ProductId::new(), LocationId::new());
        assert!(
            LedgerError::ConcurrencyConflict {
                key,
                expected: Version::initial()
            }
            .is_retryable()
        );
        assert!(LedgerError::LockTimeout(key).is_retryable());
        assert!(LedgerError::Unavailable("down".into()).is_retryable());
        assert!(LedgerError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn data_errors_are_not_retryable() {
        assert!(!LedgerError::InvalidData("kind".into()).is_retryable());
        let key = StockKey::new(ProductId::new(), LocationId::new());
        assert!(!LedgerError::QuantityOverflow(key).is_retryable());
        assert!(!LedgerError::Database(sqlx::Error::RowNotFound).is_retryable());
    }
}
