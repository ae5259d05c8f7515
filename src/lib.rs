//! Simple Bank - accounts, entries and transfers on PostgreSQL
//!
//! The interesting part is the transfer core: a multi-row, all-or-nothing
//! money movement that stays deadlock-free under any number of concurrent
//! transfers over the same accounts.
//!
//! # Modules
//!
//! - [`store`] - Record store traits, PostgreSQL and in-memory implementations
//! - [`transfer`] - Transfer coordinator, request/outcome types, errors
//! - [`db`] - Connection pool and schema bootstrap
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`util`] - Random fixture helpers

pub mod config;
pub mod db;
pub mod logging;
pub mod store;
pub mod transfer;
pub mod util;

// Convenient re-exports at crate root
pub use store::{
    Account, Entry, MemoryStore, PgStore, Queries, Store, StoreError, StoreScope, Transfer,
};
pub use transfer::{TransferCoordinator, TransferError, TransferOutcome, TransferRequest};
