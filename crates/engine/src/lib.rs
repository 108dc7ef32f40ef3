//! Mutation engine for the stock ledger.
//!
//! Every stock change runs as one atomic unit over the [`LedgerStore`]: the
//! quantity update and its movement journal entry commit together or not at
//! all. Notifications are emitted after commit and never affect the outcome.

pub mod commands;
pub mod directory;
pub mod engine;
pub mod error;

pub use commands::{Deliver, Initialize, Receive, Reconcile, Transfer};
pub use directory::{
    DirectoryError, DirectorySeed, InMemoryDirectory, LocationDirectory, LocationInfo, ProductDirectory,
    ProductInfo,
};
pub use engine::{EngineConfig, MutationEngine, StockView, TransferResult};
pub use error::{EngineError, Result, ValidationError};

pub use ledger_store::{
    LedgerStore, MovementEntry, MovementKind, MovementQuery, StockQuery, StockRecord,
};
