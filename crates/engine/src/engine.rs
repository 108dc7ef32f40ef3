//! The mutation engine.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use common::{LocationId, ProductId};
use ledger_store::{
    LedgerError, LedgerStore, LedgerTx, MovementEntry, MovementQuery, NewMovement, StockKey,
    StockQuery, StockRecord,
};
use notify::NotificationPublisher;
use serde::Serialize;

use crate::commands::{Deliver, Initialize, Receive, Reconcile, Transfer};
use crate::directory::{LocationDirectory, LocationInfo, ProductDirectory, ProductInfo};
use crate::error::{EngineError, Result, ValidationError};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Retry policy for units aborted by a transient store failure.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Total runs of a unit, the first one included.
    pub max_attempts: u32,
    /// Wait before the n-th retry is `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Both sides of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub from: StockRecord,
    pub to: StockRecord,
}

/// A ledger record with whatever the directory knows about its product and
/// location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockView {
    #[serde(flatten)]
    pub record: StockRecord,
    pub product: Option<ProductInfo>,
    pub location: Option<LocationInfo>,
}

/// Runs stock commands as atomic units over a [`LedgerStore`].
///
/// Each mutation opens one unit, applies the conditional ledger write and its
/// journal entry, and commits. Only after a successful commit are
/// notifications queued on the [`NotificationPublisher`]; a failed or slow
/// notification never changes what the caller gets back.
pub struct MutationEngine<S, D> {
    store: S,
    directory: D,
    publisher: NotificationPublisher,
    config: EngineConfig,
}

impl<S, D> MutationEngine<S, D>
where
    S: LedgerStore,
    D: ProductDirectory + LocationDirectory,
{
    pub fn new(store: S, directory: D, publisher: NotificationPublisher) -> Self {
        Self {
            store,
            directory,
            publisher,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    /// Adds incoming stock. Creates the record on first use.
    #[tracing::instrument(skip(self, cmd), fields(product_id = %cmd.product_id, location_id = %cmd.location_id, qty = cmd.qty))]
    pub async fn receive(&self, cmd: Receive) -> Result<StockRecord> {
        let record = self
            .mutate("receive", cmd.validate(), || self.receive_once(&cmd))
            .await?;
        self.notify(&record).await;
        Ok(record)
    }

    /// Removes stock, failing with [`EngineError::InsufficientStock`] when the
    /// location holds less than requested.
    #[tracing::instrument(skip(self, cmd), fields(product_id = %cmd.product_id, location_id = %cmd.location_id, qty = cmd.qty))]
    pub async fn deliver(&self, cmd: Deliver) -> Result<StockRecord> {
        let record = self
            .mutate("deliver", cmd.validate(), || self.deliver_once(&cmd))
            .await?;
        self.notify(&record).await;
        Ok(record)
    }

    /// Moves stock between two locations. The destination is only touched
    /// once the source decrement has succeeded.
    #[tracing::instrument(skip(self, cmd), fields(product_id = %cmd.product_id, from = %cmd.from_location_id, to = %cmd.to_location_id, qty = cmd.qty))]
    pub async fn transfer(&self, cmd: Transfer) -> Result<TransferResult> {
        let result = self
            .mutate("transfer", cmd.validate(), || self.transfer_once(&cmd))
            .await?;
        self.notify(&result.from).await;
        self.notify(&result.to).await;
        Ok(result)
    }

    /// Overwrites the quantity with a physical count and journals the
    /// difference.
    #[tracing::instrument(skip(self, cmd), fields(product_id = %cmd.product_id, location_id = %cmd.location_id, counted = cmd.counted_qty))]
    pub async fn reconcile(&self, cmd: Reconcile) -> Result<StockRecord> {
        let record = self
            .mutate("reconcile", cmd.validate(), || self.reconcile_once(&cmd))
            .await?;
        self.notify(&record).await;
        Ok(record)
    }

    /// Sets an opening quantity without a journal entry.
    #[tracing::instrument(skip(self, cmd), fields(product_id = %cmd.product_id, location_id = %cmd.location_id, quantity = cmd.quantity))]
    pub async fn initialize(&self, cmd: Initialize) -> Result<StockRecord> {
        let record = self
            .mutate("initialize", cmd.validate(), || self.initialize_once(&cmd))
            .await?;
        self.publisher
            .publish_change(record.product_id, record.location_id, record.quantity);
        Ok(record)
    }

    /// Lists committed records with their product and location details.
    ///
    /// Details the directory cannot supply are left empty.
    #[tracing::instrument(skip(self))]
    pub async fn query(&self, query: StockQuery) -> Result<Vec<StockView>> {
        let records = self.store.query_stock(query).await?;

        let mut products: HashMap<ProductId, Option<ProductInfo>> = HashMap::new();
        let mut locations: HashMap<LocationId, Option<LocationInfo>> = HashMap::new();
        let mut views = Vec::with_capacity(records.len());

        for record in records {
            if !products.contains_key(&record.product_id) {
                let info = self
                    .directory
                    .product(record.product_id)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(product_id = %record.product_id, error = %e, "product lookup failed");
                        None
                    });
                products.insert(record.product_id, info);
            }
            if !locations.contains_key(&record.location_id) {
                let info = self
                    .directory
                    .location(record.location_id)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(location_id = %record.location_id, error = %e, "location lookup failed");
                        None
                    });
                locations.insert(record.location_id, info);
            }

            views.push(StockView {
                product: products.get(&record.product_id).cloned().flatten(),
                location: locations.get(&record.location_id).cloned().flatten(),
                record,
            });
        }

        Ok(views)
    }

    /// Reads the movement journal, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn history(&self, query: MovementQuery) -> Result<Vec<MovementEntry>> {
        Ok(self.store.query_movements(query).await?)
    }

    async fn receive_once(&self, cmd: &Receive) -> Result<StockRecord> {
        let key = StockKey::new(cmd.product_id, cmd.location_id);
        let mut tx = self.store.begin().await?;

        let outcome = async {
            let record = tx.increment(&key, cmd.qty).await?;
            tx.append_movement(
                NewMovement::receipt(cmd.product_id, cmd.location_id, cmd.qty)
                    .reason(cmd.reason.clone())
                    .performed_by(cmd.performed_by),
            )
            .await?;
            Ok::<_, EngineError>(record)
        }
        .await;

        self.finish(tx, outcome).await
    }

    async fn deliver_once(&self, cmd: &Deliver) -> Result<StockRecord> {
        let key = StockKey::new(cmd.product_id, cmd.location_id);
        let mut tx = self.store.begin().await?;

        let outcome = async {
            let record = tx
                .decrement_if_available(&key, cmd.qty)
                .await?
                .ok_or_else(|| EngineError::InsufficientStock {
                    product_id: cmd.product_id,
                    location_id: cmd.location_id,
                    requested: cmd.qty,
                })?;
            tx.append_movement(
                NewMovement::delivery(cmd.product_id, cmd.location_id, cmd.qty)
                    .reason(cmd.reason.clone())
                    .performed_by(cmd.performed_by),
            )
            .await?;
            Ok::<_, EngineError>(record)
        }
        .await;

        self.finish(tx, outcome).await
    }

    async fn transfer_once(&self, cmd: &Transfer) -> Result<TransferResult> {
        let from_key = StockKey::new(cmd.product_id, cmd.from_location_id);
        let to_key = StockKey::new(cmd.product_id, cmd.to_location_id);
        let mut tx = self.store.begin().await?;

        let outcome = async {
            let from = tx
                .decrement_if_available(&from_key, cmd.qty)
                .await?
                .ok_or_else(|| EngineError::InsufficientStock {
                    product_id: cmd.product_id,
                    location_id: cmd.from_location_id,
                    requested: cmd.qty,
                })?;
            let to = tx.increment(&to_key, cmd.qty).await?;
            tx.append_movement(
                NewMovement::transfer(
                    cmd.product_id,
                    cmd.from_location_id,
                    cmd.to_location_id,
                    cmd.qty,
                )
                .reason(cmd.reason.clone())
                .performed_by(cmd.performed_by),
            )
            .await?;
            Ok::<_, EngineError>(TransferResult { from, to })
        }
        .await;

        self.finish(tx, outcome).await
    }

    async fn reconcile_once(&self, cmd: &Reconcile) -> Result<StockRecord> {
        let key = StockKey::new(cmd.product_id, cmd.location_id);
        let mut tx = self.store.begin().await?;

        let outcome = async {
            let current = tx.get_or_create(&key).await?;
            // Written against the version we read so a concurrent change is
            // never overwritten by a stale count.
            let record = tx
                .set_quantity_if_version(&key, cmd.counted_qty, current.version)
                .await?
                .ok_or(LedgerError::ConcurrencyConflict {
                    key,
                    expected: current.version,
                })?;
            tx.append_movement(
                NewMovement::adjustment(
                    cmd.product_id,
                    cmd.location_id,
                    current.quantity,
                    cmd.counted_qty,
                )
                .reason(cmd.reason.clone())
                .performed_by(cmd.performed_by),
            )
            .await?;
            Ok::<_, EngineError>(record)
        }
        .await;

        self.finish(tx, outcome).await
    }

    async fn initialize_once(&self, cmd: &Initialize) -> Result<StockRecord> {
        let key = StockKey::new(cmd.product_id, cmd.location_id);
        let mut tx = self.store.begin().await?;
        let outcome = tx.set_quantity(&key, cmd.quantity).await.map_err(EngineError::from);
        self.finish(tx, outcome).await
    }

    /// Commits on success, rolls back on failure.
    async fn finish<T>(&self, tx: S::Tx, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Runs a validated command's unit with retries and records the outcome.
    async fn mutate<T, F, Fut>(
        &self,
        op: &'static str,
        validation: std::result::Result<(), ValidationError>,
        unit: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match validation {
            Ok(()) => self.retry(op, unit).await,
            Err(e) => Err(e.into()),
        };

        metrics::histogram!("stock_mutation_duration_seconds", "op" => op)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => {
                metrics::counter!("stock_mutations_total", "op" => op).increment(1);
            }
            Err(e) => {
                match e {
                    EngineError::Store(_) => tracing::warn!(op, error = %e, "mutation failed"),
                    _ => tracing::debug!(op, error = %e, "mutation rejected"),
                }
                metrics::counter!("stock_mutation_failures_total", "op" => op, "kind" => e.kind())
                    .increment(1);
            }
        }

        result
    }

    async fn retry<T, F, Fut>(&self, op: &'static str, mut unit: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match unit().await {
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    tracing::warn!(op, attempt, error = %e, "unit aborted, retrying");
                    metrics::counter!("stock_mutation_retries_total", "op" => op).increment(1);
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Queues the change event and, when at or below the reorder level, a
    /// low-stock alert.
    async fn notify(&self, record: &StockRecord) {
        self.publisher
            .publish_change(record.product_id, record.location_id, record.quantity);

        match self.directory.lookup_reorder_level(record.product_id).await {
            Ok(threshold) if record.quantity <= threshold => {
                self.publisher.publish_low_stock(
                    record.product_id,
                    record.location_id,
                    record.quantity,
                    threshold,
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    product_id = %record.product_id,
                    error = %e,
                    "reorder level lookup failed, skipping low-stock check"
                );
            }
        }
    }
}
