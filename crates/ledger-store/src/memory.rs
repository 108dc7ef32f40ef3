use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    LedgerError, MovementEntry, MovementId, MovementQuery, NewMovement, Result, StockKey,
    StockQuery, StockRecord, Version,
    store::{LedgerStore, LedgerTx},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// In-memory ledger store.
///
/// Each key has its own lock, held by a unit from the first touch of that key
/// until it commits or rolls back, so units on different keys never wait for
/// each other. Writes are staged inside the unit and applied together with
/// its journal entries on commit. A key's lock entry is dropped again once no
/// unit holds or waits for it.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    records: Arc<RwLock<HashMap<StockKey, StockRecord>>>,
    movements: Arc<RwLock<Vec<MovementEntry>>>,
    locks: Arc<Mutex<HashMap<StockKey, Arc<Mutex<()>>>>>,
    lock_timeout: Duration,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a store whose units give up waiting for a key after `timeout`.
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            records: Arc::default(),
            movements: Arc::default(),
            locks: Arc::default(),
            lock_timeout: timeout,
            fail_next_commit: Arc::default(),
        }
    }

    /// Makes the next commit fail as if the store went away mid-unit.
    pub fn set_fail_next_commit(&self, fail: bool) {
        self.fail_next_commit.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stock records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns the number of journal entries.
    pub async fn movement_count(&self) -> usize {
        self.movements.read().await.len()
    }

    /// Returns the number of keys currently in the lock table.
    pub async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Clears all records and journal entries.
    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.movements.write().await.clear();
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Transactional context of [`InMemoryLedgerStore`].
pub struct InMemoryLedgerTx {
    store: InMemoryLedgerStore,
    guards: HashMap<StockKey, OwnedMutexGuard<()>>,
    staged: HashMap<StockKey, StockRecord>,
    pending: Vec<MovementEntry>,
}

impl InMemoryLedgerTx {
    async fn lock(&mut self, key: &StockKey) -> Result<()> {
        if self.guards.contains_key(key) {
            return Ok(());
        }

        let slot = {
            let mut locks = self.store.locks.lock().await;
            Arc::clone(
                locks
                    .entry(*key)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let guard = tokio::time::timeout(self.store.lock_timeout, slot.lock_owned())
            .await
            .map_err(|_| LedgerError::LockTimeout(*key))?;
        self.guards.insert(*key, guard);
        Ok(())
    }

    /// Current value of `key` as seen by this unit.
    async fn current(&mut self, key: &StockKey) -> Result<Option<StockRecord>> {
        self.lock(key).await?;
        if let Some(record) = self.staged.get(key) {
            return Ok(Some(record.clone()));
        }
        Ok(self.store.records.read().await.get(key).cloned())
    }

    fn stage(&mut self, record: StockRecord) -> StockRecord {
        self.staged.insert(record.key(), record.clone());
        record
    }

    /// Releases every held key and prunes lock entries nobody references.
    fn release(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        self.guards.clear();

        // A busy table is left for the next releasing unit to prune.
        if let Ok(mut locks) = self.store.locks.try_lock() {
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
    }
}

impl Drop for InMemoryLedgerTx {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn get_or_create(&mut self, key: &StockKey) -> Result<StockRecord> {
        match self.current(key).await? {
            Some(record) => Ok(record),
            None => Ok(self.stage(StockRecord::empty(*key, Utc::now()))),
        }
    }

    async fn increment(&mut self, key: &StockKey, qty: i64) -> Result<StockRecord> {
        let now = Utc::now();
        let record = match self.current(key).await? {
            Some(record) => {
                let quantity = record
                    .quantity
                    .checked_add(qty)
                    .ok_or(LedgerError::QuantityOverflow(*key))?;
                record.with_quantity(quantity, now)
            }
            None => StockRecord {
                quantity: qty,
                ..StockRecord::empty(*key, now)
            },
        };
        Ok(self.stage(record))
    }

    async fn decrement_if_available(
        &mut self,
        key: &StockKey,
        qty: i64,
    ) -> Result<Option<StockRecord>> {
        match self.current(key).await? {
            Some(record) if record.quantity >= qty => {
                let quantity = record.quantity - qty;
                Ok(Some(self.stage(record.with_quantity(quantity, Utc::now()))))
            }
            _ => Ok(None),
        }
    }

    async fn set_quantity_if_version(
        &mut self,
        key: &StockKey,
        quantity: i64,
        expected: Version,
    ) -> Result<Option<StockRecord>> {
        match self.current(key).await? {
            Some(record) if record.version == expected => {
                Ok(Some(self.stage(record.with_quantity(quantity, Utc::now()))))
            }
            _ => Ok(None),
        }
    }

    async fn set_quantity(&mut self, key: &StockKey, quantity: i64) -> Result<StockRecord> {
        let now = Utc::now();
        let record = match self.current(key).await? {
            Some(record) => record.with_quantity(quantity, now),
            None => StockRecord {
                quantity,
                ..StockRecord::empty(*key, now)
            },
        };
        Ok(self.stage(record))
    }

    async fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry> {
        let entry = movement.into_entry(MovementId::new(), Utc::now());
        self.pending.push(entry.clone());
        Ok(entry)
    }

    async fn commit(mut self) -> Result<()> {
        if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(
                "commit failed: store went away".to_string(),
            ));
        }

        {
            // Records and journal become visible under the same pair of locks.
            let mut records = self.store.records.write().await;
            let mut movements = self.store.movements.write().await;
            records.extend(std::mem::take(&mut self.staged));
            movements.extend(std::mem::take(&mut self.pending));
        }
        self.release();
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryLedgerTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryLedgerTx {
            store: self.clone(),
            guards: HashMap::new(),
            staged: HashMap::new(),
            pending: Vec::new(),
        })
    }

    async fn get(&self, key: &StockKey) -> Result<Option<StockRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn query_stock(&self, query: StockQuery) -> Result<Vec<StockRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| query.matches(r.product_id, r.location_id))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.key());
        Ok(matching)
    }

    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<MovementEntry>> {
        let movements = self.movements.read().await;
        let mut entries: Vec<_> = movements
            .iter()
            .filter(|m| {
                if let Some(id) = query.product_id
                    && m.product_id != id
                {
                    return false;
                }
                if let Some(id) = query.location_id
                    && m.from_location_id != Some(id)
                    && m.to_location_id != Some(id)
                {
                    return false;
                }
                if let Some(kind) = query.kind
                    && m.kind != kind
                {
                    return false;
                }
                if let Some(from) = query.from_timestamp
                    && m.created_at < from
                {
                    return false;
                }
                if let Some(to) = query.to_timestamp
                    && m.created_at > to
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        // Journal order breaks timestamp ties.
        entries.reverse();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let entries = entries.into_iter().skip(query.offset.unwrap_or(0));
        Ok(match query.limit {
            Some(limit) => entries.take(limit).collect(),
            None => entries.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LedgerStoreExt;
    use crate::{LocationId, MovementKind, ProductId};

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), LocationId::new())
    }

    #[tokio::test]
    async fn get_or_create_starts_at_zero() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let record = store.get_or_create(&key).await.unwrap();
        assert_eq!(record.quantity, 0);
        assert_eq!(record.key(), key);
        assert_eq!(store.record_count().await, 1);

        let again = store.get_or_create(&key).await.unwrap();
        assert_eq!(again, record);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_one_record() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create(&key).await })
            })
            .collect();

        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert_eq!(record.quantity, 0);
        }
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, 5).await.unwrap();
        tx.append_movement(NewMovement::receipt(key.product_id, key.location_id, 5))
            .await
            .unwrap();

        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.movement_count().await, 0);

        tx.commit().await.unwrap();

        assert_eq!(store.quantity(&key).await.unwrap(), 5);
        assert_eq!(store.movement_count().await, 1);
    }

    #[tokio::test]
    async fn rollback_discards_record_and_journal() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, 5).await.unwrap();
        tx.append_movement(NewMovement::receipt(key.product_id, key.location_id, 5))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.movement_count().await, 0);
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = InMemoryLedgerStore::new();
        let key = key();
        store.set_fail_next_commit(true);

        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, 5).await.unwrap();
        tx.append_movement(NewMovement::receipt(key.product_id, key.location_id, 5))
            .await
            .unwrap();
        let err = tx.commit().await.unwrap_err();

        assert!(err.is_retryable());
        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.movement_count().await, 0);

        // The flag is one-shot.
        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, 1).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.quantity(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn decrement_requires_sufficient_quantity() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_if_available(&key, 1).await.unwrap().is_none());
        tx.increment(&key, 3).await.unwrap();
        assert!(tx.decrement_if_available(&key, 4).await.unwrap().is_none());
        let record = tx.decrement_if_available(&key, 3).await.unwrap().unwrap();
        assert_eq!(record.quantity, 0);
        tx.commit().await.unwrap();

        assert_eq!(store.quantity(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn increment_past_max_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, i64::MAX).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.increment(&key, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::QuantityOverflow(k) if k == key));
        assert!(!err.is_retryable());
        tx.rollback().await.unwrap();

        assert_eq!(store.quantity(&key).await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn released_keys_leave_the_lock_table() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        // A delivery against a key that never gets created.
        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_if_available(&key, 1).await.unwrap().is_none());
        assert_eq!(store.lock_count().await, 1);
        tx.rollback().await.unwrap();
        assert_eq!(store.lock_count().await, 0);

        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, 1).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.lock_count().await, 0);

        // Dropping a unit without finishing it releases too.
        let mut tx = store.begin().await.unwrap();
        tx.get_or_create(&key).await.unwrap();
        drop(tx);
        assert_eq!(store.lock_count().await, 0);
    }

    #[tokio::test]
    async fn waited_on_key_stays_in_the_lock_table() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let mut holder = store.begin().await.unwrap();
        holder.get_or_create(&key).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                let record = tx.increment(&key, 2).await.unwrap();
                tx.commit().await.unwrap();
                record
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        holder.commit().await.unwrap();
        let record = waiter.await.unwrap();
        assert_eq!(record.quantity, 2);
        assert_eq!(store.lock_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_decrements_never_oversell() {
        let store = InMemoryLedgerStore::new();
        let key = key();

        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, 10).await.unwrap();
        tx.commit().await.unwrap();

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut tx = store.begin().await.unwrap();
                    let taken = tx.decrement_if_available(&key, 1).await.unwrap().is_some();
                    tx.commit().await.unwrap();
                    taken
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 10);
        assert_eq!(store.quantity(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_quantity_if_version_detects_moved_record() {
        let store = InMemoryLedgerStore::new();
        let key = key();
        let created = store.get_or_create(&key).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.increment(&key, 2).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let stale = tx
            .set_quantity_if_version(&key, 9, created.version)
            .await
            .unwrap();
        assert!(stale.is_none());

        let current = tx.get_or_create(&key).await.unwrap();
        let fresh = tx
            .set_quantity_if_version(&key, 9, current.version)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.quantity, 9);
        assert_eq!(fresh.version, current.version.next());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn held_key_times_out_other_units() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let key = key();

        let mut holder = store.begin().await.unwrap();
        holder.get_or_create(&key).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.increment(&key, 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout(k) if k == key));

        // Other keys are unaffected.
        let other = StockKey::new(ProductId::new(), LocationId::new());
        waiter.increment(&other, 1).await.unwrap();
        waiter.commit().await.unwrap();
        holder.commit().await.unwrap();
    }

    #[tokio::test]
    async fn query_stock_filters_by_location() {
        let store = InMemoryLedgerStore::new();
        let product = ProductId::new();
        let shelf_a = LocationId::new();
        let shelf_b = LocationId::new();

        store
            .get_or_create(&StockKey::new(product, shelf_a))
            .await
            .unwrap();
        store
            .get_or_create(&StockKey::new(product, shelf_b))
            .await
            .unwrap();

        let all = store.query_stock(StockQuery::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_a = store
            .query_stock(StockQuery::new().location_id(shelf_a))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].location_id, shelf_a);

        let none = store
            .query_stock(StockQuery::new().product_id(ProductId::new()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn query_movements_newest_first_with_filters() {
        let store = InMemoryLedgerStore::new();
        let product = ProductId::new();
        let a = LocationId::new();
        let b = LocationId::new();

        let mut tx = store.begin().await.unwrap();
        tx.append_movement(NewMovement::receipt(product, a, 5))
            .await
            .unwrap();
        tx.append_movement(NewMovement::transfer(product, a, b, 2))
            .await
            .unwrap();
        tx.append_movement(NewMovement::delivery(ProductId::new(), b, 1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let for_product = store
            .query_movements(MovementQuery::for_product(product))
            .await
            .unwrap();
        assert_eq!(for_product.len(), 2);
        assert_eq!(for_product[0].kind, MovementKind::Transfer);
        assert_eq!(for_product[1].kind, MovementKind::Receipt);

        let touching_b = store
            .query_movements(MovementQuery::new().location_id(b))
            .await
            .unwrap();
        assert_eq!(touching_b.len(), 2);

        let deliveries = store
            .query_movements(MovementQuery::new().kind(MovementKind::Delivery))
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 1);

        let paged = store
            .query_movements(MovementQuery::new().offset(1).limit(1))
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
    }
}
