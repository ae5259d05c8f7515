//! PostgreSQL record store
//!
//! Every query is written once against a generic executor and dispatched
//! either to the pool (auto-commit) or to an open transaction.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::{StoreError, or_not_found};
use super::models::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, EntryId, ListEntriesParams, ListTransfersParams, Page, Transfer,
    TransferId,
};
use super::{Queries, Store, StoreScope};

/// Pool-backed store. Cheap to clone.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Store operations bound to one open transaction
pub struct PgScope {
    tx: Mutex<Transaction<'static, Postgres>>,
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreScope>, StoreError> {
        let tx = self.pool.begin().await?;
        debug!("PostgreSQL transaction opened");
        Ok(Box::new(PgScope { tx: Mutex::new(tx) }))
    }
}

#[async_trait]
impl StoreScope for PgScope {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.into_inner().rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Queries for PgStore {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        queries::create_account(&self.pool, &params).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        queries::get_account(&self.pool, id).await
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>, StoreError> {
        queries::list_accounts(&self.pool, page).await
    }

    async fn create_entry(&self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        queries::create_entry(&self.pool, params).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        queries::get_entry(&self.pool, id).await
    }

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        queries::list_entries(&self.pool, params).await
    }

    async fn create_transfer(
        &self,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        queries::create_transfer(&self.pool, params).await
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        queries::get_transfer(&self.pool, id).await
    }

    async fn list_transfers(
        &self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        queries::list_transfers(&self.pool, params).await
    }

    async fn add_account_balance(
        &self,
        params: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        queries::add_account_balance(&self.pool, params).await
    }
}

#[async_trait]
impl Queries for PgScope {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::create_account(&mut **tx, &params).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::get_account(&mut **tx, id).await
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::list_accounts(&mut **tx, page).await
    }

    async fn create_entry(&self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::create_entry(&mut **tx, params).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::get_entry(&mut **tx, id).await
    }

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::list_entries(&mut **tx, params).await
    }

    async fn create_transfer(
        &self,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::create_transfer(&mut **tx, params).await
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::get_transfer(&mut **tx, id).await
    }

    async fn list_transfers(
        &self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::list_transfers(&mut **tx, params).await
    }

    async fn add_account_balance(
        &self,
        params: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        let mut tx = self.tx.lock().await;
        queries::add_account_balance(&mut **tx, params).await
    }
}

mod queries {
    use super::*;

    pub async fn create_account<'e, E: PgExecutor<'e>>(
        executor: E,
        params: &CreateAccountParams,
    ) -> Result<Account, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(executor)
        .await?;

        Ok(account)
    }

    pub async fn get_account<'e, E: PgExecutor<'e>>(
        executor: E,
        id: AccountId,
    ) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts WHERE id = $1 LIMIT 1"#,
        )
        .bind(id)
        .fetch_one(executor)
        .await
        .map_err(or_not_found("account", id))
    }

    pub async fn list_accounts<'e, E: PgExecutor<'e>>(
        executor: E,
        page: Page,
    ) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts ORDER BY id LIMIT $1 OFFSET $2"#,
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }

    pub async fn create_entry<'e, E: PgExecutor<'e>>(
        executor: E,
        params: CreateEntryParams,
    ) -> Result<Entry, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(executor)
        .await?;

        Ok(entry)
    }

    pub async fn get_entry<'e, E: PgExecutor<'e>>(
        executor: E,
        id: EntryId,
    ) -> Result<Entry, StoreError> {
        sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE id = $1 LIMIT 1"#,
        )
        .bind(id)
        .fetch_one(executor)
        .await
        .map_err(or_not_found("entry", id))
    }

    pub async fn list_entries<'e, E: PgExecutor<'e>>(
        executor: E,
        params: ListEntriesParams,
    ) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE account_id = $1
               ORDER BY id LIMIT $2 OFFSET $3"#,
        )
        .bind(params.account_id)
        .bind(params.page.limit)
        .bind(params.page.offset)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }

    pub async fn create_transfer<'e, E: PgExecutor<'e>>(
        executor: E,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(executor)
        .await?;

        Ok(transfer)
    }

    pub async fn get_transfer<'e, E: PgExecutor<'e>>(
        executor: E,
        id: TransferId,
    ) -> Result<Transfer, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers WHERE id = $1 LIMIT 1"#,
        )
        .bind(id)
        .fetch_one(executor)
        .await
        .map_err(or_not_found("transfer", id))
    }

    pub async fn list_transfers<'e, E: PgExecutor<'e>>(
        executor: E,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers
               WHERE from_account_id = $1 OR to_account_id = $2
               ORDER BY id LIMIT $3 OFFSET $4"#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.page.limit)
        .bind(params.page.offset)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }

    // UPDATE takes a FOR NO KEY UPDATE row lock, which does not conflict with
    // the KEY SHARE locks the entries/transfers foreign keys take.
    pub async fn add_account_balance<'e, E: PgExecutor<'e>>(
        executor: E,
        params: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts SET balance = balance + $1
            WHERE id = $2
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(params.amount)
        .bind(params.id)
        .fetch_one(executor)
        .await
        .map_err(or_not_found("account", params.id))
    }
}
