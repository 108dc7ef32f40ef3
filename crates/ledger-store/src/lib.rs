pub mod error;
pub mod memory;
pub mod movement;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use common::{ActorId, LocationId, ProductId};
pub use error::{LedgerError, Result};
pub use memory::{InMemoryLedgerStore, InMemoryLedgerTx};
pub use movement::{MovementEntry, MovementId, MovementKind, NewMovement};
pub use postgres::{PostgresLedgerStore, PostgresLedgerTx};
pub use query::{MovementQuery, StockQuery};
pub use record::{StockKey, StockRecord, Version};
pub use store::{LedgerStore, LedgerStoreExt, LedgerTx};
