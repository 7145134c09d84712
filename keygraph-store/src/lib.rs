//! Persistence layer for keygraph.
//!
//! Defines the records the account key graph reads and writes, the
//! [`Store`]/[`Transaction`] contract it is written against, and
//! [`MemoryStore`], an in-memory implementation used by tests and
//! single-process deployments.
//!
//! # Transactions
//!
//! Every multi-record mutation runs inside one [`Transaction`]. Commit
//! consumes the transaction; dropping it without committing rolls back.

mod entities;
mod error;
pub mod ids;
mod memory;
mod transaction;

pub use entities::{
    Account, AccountUser, AdminLevel, Event, EventQuery, Relationship, Secret, Tombstone,
};
pub use error::{EntityKind, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use transaction::{Store, Transaction};
