//! Queue-backed notification publisher.

use std::sync::Arc;

use chrono::Utc;
use common::{LocationId, ProductId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::event::{LowStock, StockChanged, StockEvent};
use crate::transport::Transport;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Events that may wait for the worker before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

enum Command {
    Publish(StockEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle for emitting stock notifications.
///
/// Publishing never waits and never fails: events go into a bounded queue
/// drained by a background task, and an event that does not fit is dropped
/// with a warning. Clones share the same queue; the worker stops once every
/// handle is dropped and the queue is empty.
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    queue: mpsc::Sender<Command>,
}

impl NotificationPublisher {
    /// Starts the delivery worker on the current tokio runtime.
    pub fn spawn<T>(transport: T, config: PublisherConfig) -> (Self, JoinHandle<()>)
    where
        T: Transport + 'static,
    {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = tokio::spawn(run(rx, Arc::new(transport)));
        (Self { queue }, worker)
    }

    /// Announces the new quantity of a (product, location) pair.
    pub fn publish_change(&self, product_id: ProductId, location_id: LocationId, new_qty: i64) {
        self.enqueue(StockEvent::Changed(StockChanged {
            product_id,
            location_id,
            new_qty,
        }));
    }

    /// Raises a low-stock alert. The caller decides that `qty <= threshold`.
    pub fn publish_low_stock(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        qty: i64,
        threshold: i64,
    ) {
        self.enqueue(StockEvent::LowStock(LowStock {
            product_id,
            location_id,
            qty,
            threshold,
            time: Utc::now(),
        }));
    }

    /// Waits until every event queued before this call has been handed to
    /// the transport.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.queue.send(Command::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    fn enqueue(&self, event: StockEvent) {
        match self.queue.try_send(Command::Publish(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Command::Publish(event))) => {
                tracing::warn!(?event, "notification queue full, dropping event");
                metrics::counter!("stock_notifications_dropped_total").increment(1);
            }
            Err(e) => {
                tracing::warn!(error = %e, "notification worker gone, dropping event");
                metrics::counter!("stock_notifications_dropped_total").increment(1);
            }
        }
    }
}

async fn run(mut rx: mpsc::Receiver<Command>, transport: Arc<dyn Transport>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Publish(event) => dispatch(transport.as_ref(), &event).await,
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!("notification queue closed, worker exiting");
}

async fn dispatch(transport: &dyn Transport, event: &StockEvent) {
    let payload = match event.payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, ?event, "could not encode notification");
            metrics::counter!("stock_notifications_failed_total").increment(1);
            return;
        }
    };

    for (channel, name) in event.routes() {
        match transport.publish(&channel, name, payload.clone()).await {
            Ok(()) => {
                metrics::counter!("stock_notifications_published_total").increment(1);
            }
            Err(e) => {
                tracing::warn!(%channel, event = name, error = %e, "notification delivery failed");
                metrics::counter!("stock_notifications_failed_total").increment(1);
            }
        }
    }
}
