use async_trait::async_trait;

use crate::{
    MovementEntry, MovementQuery, NewMovement, Result, StockKey, StockQuery, StockRecord, Version,
};

/// A transactional context over the ledger and the movement journal.
///
/// Every write made through a context becomes visible together on `commit`
/// or not at all. Dropping a context without committing discards its writes.
/// While a context holds a key, other contexts writing the same key wait.
#[async_trait]
pub trait LedgerTx: Send {
    /// Returns the record for `key`, creating an empty one if none exists.
    async fn get_or_create(&mut self, key: &StockKey) -> Result<StockRecord>;

    /// Adds `qty` to the record, creating it if needed.
    async fn increment(&mut self, key: &StockKey, qty: i64) -> Result<StockRecord>;

    /// Subtracts `qty` only if the record exists and holds at least `qty`.
    ///
    /// The check and the write are one indivisible step. Returns `None`
    /// (and writes nothing) when the precondition does not hold.
    async fn decrement_if_available(
        &mut self,
        key: &StockKey,
        qty: i64,
    ) -> Result<Option<StockRecord>>;

    /// Overwrites the quantity only if the record is still at `expected`.
    ///
    /// Returns `None` when the record moved on or does not exist.
    async fn set_quantity_if_version(
        &mut self,
        key: &StockKey,
        quantity: i64,
        expected: Version,
    ) -> Result<Option<StockRecord>>;

    /// Overwrites the quantity unconditionally, creating the record if needed.
    async fn set_quantity(&mut self, key: &StockKey, quantity: i64) -> Result<StockRecord>;

    /// Appends an entry to the movement journal.
    async fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry>;

    /// Makes every write of this context visible at once.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this context.
    async fn rollback(self) -> Result<()>;
}

/// Storage for stock records and their movement journal.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    /// Opens a new transactional context.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Reads one committed record.
    async fn get(&self, key: &StockKey) -> Result<Option<StockRecord>>;

    /// Lists committed records ordered by product then location.
    async fn query_stock(&self, query: StockQuery) -> Result<Vec<StockRecord>>;

    /// Lists journal entries, newest first.
    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<MovementEntry>>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Gets or creates a record in a unit of its own.
    async fn get_or_create(&self, key: &StockKey) -> Result<StockRecord> {
        let mut tx = self.begin().await?;
        let record = tx.get_or_create(key).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Returns the committed quantity, treating a missing record as zero.
    async fn quantity(&self, key: &StockKey) -> Result<i64> {
        Ok(self.get(key).await?.map_or(0, |r| r.quantity))
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}
