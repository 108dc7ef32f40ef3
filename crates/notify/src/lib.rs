//! Post-commit notifications for the stock ledger.
//!
//! Mutations hand events to a [`NotificationPublisher`], which queues them and
//! returns immediately. A background worker drains the queue into a
//! [`Transport`]. Delivery is best-effort: nothing is persisted or replayed,
//! and transport failures are logged, never reported back to the mutation.

pub mod error;
pub mod event;
pub mod publisher;
pub mod transport;

pub use error::TransportError;
pub use event::{Channel, LowStock, StockChanged, StockEvent};
pub use publisher::{NotificationPublisher, PublisherConfig};
pub use transport::{BroadcastTransport, InMemoryTransport, Notification, Transport};
