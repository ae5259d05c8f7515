//! Record Store
//!
//! Single-row operations on accounts, entries and transfers. Every operation
//! is atomic on its own; multi-row atomicity comes from running the same
//! operations through a [`StoreScope`] obtained from [`Store::begin`].
//!
//! ```text
//! Store ──begin()──▶ StoreScope ──commit()/rollback()
//!   │                    │
//!   └──── Queries ◀──────┘   (same operation set, auto-commit vs. scoped)
//! ```
//!
//! Implementations:
//! - [`PgStore`] - PostgreSQL via sqlx, scope = `sqlx::Transaction`
//! - [`MemoryStore`] - in-process tables with row locks and fault injection

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;

pub use error::StoreError;
pub use memory::{Fault, LockEvent, MemoryStore};
pub use models::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, EntryId, ListEntriesParams, ListTransfersParams, Page, Transfer,
    TransferId,
};
pub use postgres::{PgScope, PgStore};

use async_trait::async_trait;

/// Operations shared by the store and its transaction-bound scopes
#[async_trait]
pub trait Queries: Send + Sync {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>, StoreError>;

    async fn create_entry(&self, params: CreateEntryParams) -> Result<Entry, StoreError>;

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError>;

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, StoreError>;

    async fn create_transfer(&self, params: CreateTransferParams)
    -> Result<Transfer, StoreError>;

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError>;

    async fn list_transfers(&self, params: ListTransfersParams)
    -> Result<Vec<Transfer>, StoreError>;

    /// Apply `balance = balance + amount` and return the updated row.
    ///
    /// Inside a scope this takes the account's row lock and holds it until
    /// the scope ends.
    async fn add_account_balance(
        &self,
        params: AddAccountBalanceParams,
    ) -> Result<Account, StoreError>;
}

/// A store that can open transactional scopes
#[async_trait]
pub trait Store: Queries {
    /// Open a new scope. Fails when the store is unreachable.
    async fn begin(&self) -> Result<Box<dyn StoreScope>, StoreError>;
}

/// Transaction-bound view of the store.
///
/// Dropping a scope without calling `commit` rolls it back.
#[async_trait]
pub trait StoreScope: Queries {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
