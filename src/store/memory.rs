//! In-process record store
//!
//! Committed rows live in shared tables. A scope buffers its own inserts and
//! balance deltas and publishes them on commit. `add_account_balance` inside
//! a scope takes a per-account row lock that is held until the scope ends,
//! the same blocking behaviour PostgreSQL gives an `UPDATE` inside a
//! transaction. Two scopes locking the same pair of accounts in opposite
//! order will therefore wait on each other forever.
//!
//! Faults can be armed with [`MemoryStore::fail_on`] to make a chosen step
//! fail once, and [`MemoryStore::set_commit_latency`] delays the
//! acknowledgement of every commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::error::StoreError;
use super::models::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, EntryId, ListEntriesParams, ListTransfersParams, Page, Transfer,
    TransferId,
};
use super::{Queries, Store, StoreScope};

/// A store step that can be made to fail once.
///
/// `nth` counts calls of that operation within one scope, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Begin,
    CreateTransfer { nth: usize },
    CreateEntry { nth: usize },
    AddAccountBalance { nth: usize },
    Commit,
    Rollback,
}

/// A row lock acquired by a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockEvent {
    pub scope: u64,
    pub account_id: AccountId,
}

/// Committed row counts, for asserting that nothing leaked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub accounts: usize,
    pub entries: usize,
    pub transfers: usize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: StdMutex<Tables>,
    row_locks: StdMutex<HashMap<AccountId, Arc<Mutex<()>>>>,
    faults: StdMutex<Vec<Fault>>,
    lock_log: StdMutex<Vec<LockEvent>>,
    commit_latency: StdMutex<Option<Duration>>,
    next_scope: AtomicU64,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
    last_account_id: i64,
    last_entry_id: i64,
    last_transfer_id: i64,
}

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_id(last: &mut i64) -> i64 {
    *last += 1;
    *last
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot fault
    pub fn fail_on(&self, fault: Fault) {
        lock(&self.inner.faults).push(fault);
    }

    /// Hold back each commit's return for `latency` after its writes are visible
    pub fn set_commit_latency(&self, latency: Duration) {
        *lock(&self.inner.commit_latency) = Some(latency);
    }

    /// Row locks taken by scopes, in acquisition order
    pub fn lock_history(&self) -> Vec<LockEvent> {
        lock(&self.inner.lock_log).clone()
    }

    pub fn row_counts(&self) -> RowCounts {
        let tables = lock(&self.inner.tables);
        RowCounts {
            accounts: tables.accounts.len(),
            entries: tables.entries.len(),
            transfers: tables.transfers.len(),
        }
    }
}

impl Inner {
    fn trip(&self, fault: Fault) -> Result<(), StoreError> {
        let mut faults = lock(&self.faults);
        if let Some(pos) = faults.iter().position(|f| *f == fault) {
            faults.remove(pos);
            warn!(?fault, "Injected store fault triggered");
            return Err(StoreError::Fault(format!("{:?}", fault)));
        }
        Ok(())
    }

    fn row_lock(&self, id: AccountId) -> Arc<Mutex<()>> {
        lock(&self.row_locks).entry(id).or_default().clone()
    }

    fn committed_account(&self, id: AccountId) -> Option<Account> {
        lock(&self.tables).accounts.get(&id).cloned()
    }
}

impl Tables {
    fn new_account(&mut self, params: CreateAccountParams) -> Account {
        Account {
            id: next_id(&mut self.last_account_id),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        }
    }

    fn new_entry(&mut self, params: CreateEntryParams) -> Entry {
        Entry {
            id: next_id(&mut self.last_entry_id),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        }
    }

    fn new_transfer(&mut self, params: CreateTransferParams) -> Transfer {
        Transfer {
            id: next_id(&mut self.last_transfer_id),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        }
    }
}

fn check_transfer(params: &CreateTransferParams) -> Result<(), StoreError> {
    if params.amount <= 0 {
        return Err(StoreError::Constraint(format!(
            "transfers.amount must be positive, got {}",
            params.amount
        )));
    }
    Ok(())
}

fn missing_account(table: &str, id: AccountId) -> StoreError {
    StoreError::Constraint(format!("{} references missing account {}", table, id))
}

fn balance_out_of_range(id: AccountId) -> StoreError {
    StoreError::Constraint(format!("accounts.balance out of range for account {}", id))
}

fn transfer_matches(transfer: &Transfer, params: &ListTransfersParams) -> bool {
    transfer.from_account_id == params.from_account_id
        || transfer.to_account_id == params.to_account_id
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreScope>, StoreError> {
        self.inner.trip(Fault::Begin)?;
        let id = self.inner.next_scope.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(scope = id, "Memory scope opened");
        Ok(Box::new(MemoryScope {
            id,
            inner: Arc::clone(&self.inner),
            state: Mutex::new(ScopeState::default()),
        }))
    }
}

#[async_trait]
impl Queries for MemoryStore {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let mut tables = lock(&self.inner.tables);
        let account = tables.new_account(params);
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.inner
            .committed_account(id)
            .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>, StoreError> {
        Ok(page.apply(lock(&self.inner.tables).accounts.values().cloned()))
    }

    async fn create_entry(&self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        let mut tables = lock(&self.inner.tables);
        if !tables.accounts.contains_key(&params.account_id) {
            return Err(missing_account("entries.account_id", params.account_id));
        }
        let entry = tables.new_entry(params);
        tables.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        lock(&self.inner.tables)
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let tables = lock(&self.inner.tables);
        let rows = tables
            .entries
            .values()
            .filter(|e| e.account_id == params.account_id)
            .cloned();
        Ok(params.page.apply(rows))
    }

    async fn create_transfer(
        &self,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        check_transfer(&params)?;
        let mut tables = lock(&self.inner.tables);
        for id in [params.from_account_id, params.to_account_id] {
            if !tables.accounts.contains_key(&id) {
                return Err(missing_account("transfers", id));
            }
        }
        let transfer = tables.new_transfer(params);
        tables.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        lock(&self.inner.tables)
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn list_transfers(
        &self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let tables = lock(&self.inner.tables);
        let rows = tables
            .transfers
            .values()
            .filter(|t| transfer_matches(t, &params))
            .cloned();
        Ok(params.page.apply(rows))
    }

    async fn add_account_balance(
        &self,
        params: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        // Auto-commit update still waits for any scope holding the row
        let row = self.inner.row_lock(params.id);
        let _guard = row.lock().await;

        let mut tables = lock(&self.inner.tables);
        let account = tables
            .accounts
            .get_mut(&params.id)
            .ok_or_else(|| StoreError::not_found("account", params.id))?;
        account.balance = account
            .balance
            .checked_add(params.amount)
            .ok_or_else(|| balance_out_of_range(params.id))?;
        Ok(account.clone())
    }
}

/// Scope-bound view of a [`MemoryStore`]
pub struct MemoryScope {
    id: u64,
    inner: Arc<Inner>,
    state: Mutex<ScopeState>,
}

#[derive(Default)]
struct ScopeState {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
    deltas: BTreeMap<AccountId, i64>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    transfer_calls: usize,
    entry_calls: usize,
    balance_calls: usize,
}

impl ScopeState {
    fn account_exists(&self, inner: &Inner, id: AccountId) -> bool {
        self.accounts.contains_key(&id) || lock(&inner.tables).accounts.contains_key(&id)
    }

    /// Own or committed row, before this scope's pending delta
    fn base_account(&self, inner: &Inner, id: AccountId) -> Option<Account> {
        self.accounts
            .get(&id)
            .cloned()
            .or_else(|| inner.committed_account(id))
    }

    /// Account as this scope sees it: base row plus pending delta.
    ///
    /// `add_account_balance` rejects any delta that would leave this out of
    /// range, and the row lock keeps the base fixed while a delta is pending.
    fn visible_account(&self, inner: &Inner, id: AccountId) -> Option<Account> {
        let mut account = self.base_account(inner, id)?;
        let delta = self.deltas.get(&id).copied().unwrap_or(0);
        account.balance = account.balance.saturating_add(delta);
        Some(account)
    }
}

#[async_trait]
impl StoreScope for MemoryScope {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryScope { id, inner, state } = *self;
        let state = state.into_inner();

        // A failed commit leaves nothing behind; the buffer and locks drop here
        inner.trip(Fault::Commit)?;

        {
            let mut tables = lock(&inner.tables);

            let mut balances = Vec::with_capacity(state.deltas.len());
            for (&account_id, &delta) in &state.deltas {
                let base = state
                    .accounts
                    .get(&account_id)
                    .or_else(|| tables.accounts.get(&account_id))
                    .map(|a| a.balance)
                    .ok_or_else(|| StoreError::not_found("account", account_id))?;
                let balance = base
                    .checked_add(delta)
                    .ok_or_else(|| balance_out_of_range(account_id))?;
                balances.push((account_id, balance));
            }

            tables.accounts.extend(state.accounts);
            tables.entries.extend(state.entries);
            tables.transfers.extend(state.transfers);
            for (account_id, balance) in balances {
                if let Some(account) = tables.accounts.get_mut(&account_id) {
                    account.balance = balance;
                }
            }
        }

        // Row locks are released only after the writes are visible
        drop(state.held);
        debug!(scope = id, "Memory scope committed");

        let latency = *lock(&inner.commit_latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let id = self.id;
        self.inner.trip(Fault::Rollback)?;
        debug!(scope = id, "Memory scope rolled back");
        Ok(())
    }
}

#[async_trait]
impl Queries for MemoryScope {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let mut state = self.state.lock().await;
        let account = lock(&self.inner.tables).new_account(params);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let state = self.state.lock().await;
        state
            .visible_account(&self.inner, id)
            .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>, StoreError> {
        let state = self.state.lock().await;
        let mut ids: Vec<AccountId> = lock(&self.inner.tables).accounts.keys().copied().collect();
        ids.extend(state.accounts.keys().copied());
        ids.sort_unstable();
        let rows = ids
            .into_iter()
            .filter_map(|id| state.visible_account(&self.inner, id));
        Ok(page.apply(rows))
    }

    async fn create_entry(&self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        let mut state = self.state.lock().await;
        state.entry_calls += 1;
        self.inner.trip(Fault::CreateEntry {
            nth: state.entry_calls,
        })?;

        if !state.account_exists(&self.inner, params.account_id) {
            return Err(missing_account("entries.account_id", params.account_id));
        }
        let entry = lock(&self.inner.tables).new_entry(params);
        state.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        let state = self.state.lock().await;
        if let Some(entry) = state.entries.get(&id) {
            return Ok(entry.clone());
        }
        lock(&self.inner.tables)
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: BTreeMap<EntryId, Entry> = lock(&self.inner.tables)
            .entries
            .values()
            .filter(|e| e.account_id == params.account_id)
            .map(|e| (e.id, e.clone()))
            .collect();
        rows.extend(
            state
                .entries
                .values()
                .filter(|e| e.account_id == params.account_id)
                .map(|e| (e.id, e.clone())),
        );
        Ok(params.page.apply(rows.into_values()))
    }

    async fn create_transfer(
        &self,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let mut state = self.state.lock().await;
        state.transfer_calls += 1;
        self.inner.trip(Fault::CreateTransfer {
            nth: state.transfer_calls,
        })?;

        check_transfer(&params)?;
        for id in [params.from_account_id, params.to_account_id] {
            if !state.account_exists(&self.inner, id) {
                return Err(missing_account("transfers", id));
            }
        }
        let transfer = lock(&self.inner.tables).new_transfer(params);
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        let state = self.state.lock().await;
        if let Some(transfer) = state.transfers.get(&id) {
            return Ok(transfer.clone());
        }
        lock(&self.inner.tables)
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn list_transfers(
        &self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: BTreeMap<TransferId, Transfer> = lock(&self.inner.tables)
            .transfers
            .values()
            .filter(|t| transfer_matches(t, &params))
            .map(|t| (t.id, t.clone()))
            .collect();
        rows.extend(
            state
                .transfers
                .values()
                .filter(|t| transfer_matches(t, &params))
                .map(|t| (t.id, t.clone())),
        );
        Ok(params.page.apply(rows.into_values()))
    }

    async fn add_account_balance(
        &self,
        params: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        let mut state = self.state.lock().await;
        state.balance_calls += 1;
        self.inner.trip(Fault::AddAccountBalance {
            nth: state.balance_calls,
        })?;

        if !state.account_exists(&self.inner, params.id) {
            return Err(StoreError::not_found("account", params.id));
        }

        // Lock before reading so the base balance cannot move under the delta
        if !state.held.contains_key(&params.id) {
            let guard = self.inner.row_lock(params.id).lock_owned().await;
            lock(&self.inner.lock_log).push(LockEvent {
                scope: self.id,
                account_id: params.id,
            });
            state.held.insert(params.id, guard);
        }

        let mut account = state
            .base_account(&self.inner, params.id)
            .ok_or_else(|| StoreError::not_found("account", params.id))?;
        let pending = state.deltas.get(&params.id).copied().unwrap_or(0);
        let delta = pending
            .checked_add(params.amount)
            .ok_or_else(|| balance_out_of_range(params.id))?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| balance_out_of_range(params.id))?;

        state.deltas.insert(params.id, delta);
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn open(store: &MemoryStore, balance: i64) -> Account {
        store
            .create_account(CreateAccountParams {
                owner: "alice".to_string(),
                balance,
                currency: "USD".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_account_crud_and_pagination() {
        let store = MemoryStore::new();
        for i in 0..10 {
            open(&store, i).await;
        }

        let first = store.list_accounts(Page::nth(0, 5).unwrap()).await.unwrap();
        let second = store.list_accounts(Page::nth(1, 5).unwrap()).await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 5);
        assert!(first.last().unwrap().id < second.first().unwrap().id);

        let fetched = store.get_account(first[0].id).await.unwrap();
        assert_eq!(fetched, first[0]);

        let err = store.get_account(999).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_entry_requires_existing_account() {
        let store = MemoryStore::new();
        let err = store
            .create_entry(CreateEntryParams {
                account_id: 7,
                amount: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_transfer_amount_must_be_positive() {
        let store = MemoryStore::new();
        let a = open(&store, 0).await;
        let b = open(&store, 0).await;
        let err = store
            .create_transfer(CreateTransferParams {
                from_account_id: a.id,
                to_account_id: b.id,
                amount: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_scope_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let account = open(&store, 100).await;

        let scope = store.begin().await.unwrap();
        let entry = scope
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: -10,
            })
            .await
            .unwrap();
        let updated = scope
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: -10,
            })
            .await
            .unwrap();
        assert_eq!(updated.balance, 90);

        // Reads through the scope see its own writes, the store does not
        assert_eq!(scope.get_entry(entry.id).await.unwrap(), entry);
        assert!(store.get_entry(entry.id).await.unwrap_err().is_not_found());
        assert_eq!(store.get_account(account.id).await.unwrap().balance, 100);

        scope.commit().await.unwrap();
        assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
        assert_eq!(store.get_account(account.id).await.unwrap().balance, 90);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let account = open(&store, 100).await;

        let scope = store.begin().await.unwrap();
        scope
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 50,
            })
            .await
            .unwrap();
        scope.rollback().await.unwrap();

        assert_eq!(store.get_account(account.id).await.unwrap().balance, 100);
        assert_eq!(store.row_counts().entries, 0);
    }

    #[tokio::test]
    async fn test_dropped_scope_releases_row_lock() {
        let store = MemoryStore::new();
        let account = open(&store, 0).await;

        let scope = store.begin().await.unwrap();
        scope
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 5,
            })
            .await
            .unwrap();
        drop(scope);

        let updated = tokio::time::timeout(
            Duration::from_secs(1),
            store.add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            }),
        )
        .await
        .expect("row lock should be free")
        .unwrap();
        assert_eq!(updated.balance, 1);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_writer() {
        let store = MemoryStore::new();
        let account = open(&store, 0).await;

        let holder = store.begin().await.unwrap();
        holder
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            })
            .await
            .unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            store.add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            }),
        )
        .await;
        assert!(blocked.is_err(), "second writer must wait for the row lock");

        holder.commit().await.unwrap();
        let updated = store
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            })
            .await
            .unwrap();
        assert_eq!(updated.balance, 2);
    }

    #[tokio::test]
    async fn test_faults_fire_once() {
        let store = MemoryStore::new();
        store.fail_on(Fault::Begin);

        assert!(matches!(store.begin().await, Err(StoreError::Fault(_))));
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_nth_entry_fault() {
        let store = MemoryStore::new();
        let account = open(&store, 0).await;
        store.fail_on(Fault::CreateEntry { nth: 2 });

        let scope = store.begin().await.unwrap();
        let params = CreateEntryParams {
            account_id: account.id,
            amount: 1,
        };
        assert!(scope.create_entry(params).await.is_ok());
        assert!(matches!(
            scope.create_entry(params).await,
            Err(StoreError::Fault(_))
        ));
        assert!(scope.create_entry(params).await.is_ok());
    }

    #[tokio::test]
    async fn test_commit_fault_persists_nothing() {
        let store = MemoryStore::new();
        let account = open(&store, 10).await;
        store.fail_on(Fault::Commit);

        let scope = store.begin().await.unwrap();
        scope
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 3,
            })
            .await
            .unwrap();
        scope
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 3,
            })
            .await
            .unwrap();

        assert!(scope.commit().await.is_err());
        assert_eq!(store.get_account(account.id).await.unwrap().balance, 10);
        assert_eq!(store.row_counts().entries, 0);
    }

    #[tokio::test]
    async fn test_balance_overflow_is_constraint_error() {
        let store = MemoryStore::new();
        let account = open(&store, i64::MAX - 5).await;

        let err = store
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(store.get_account(account.id).await.unwrap().balance, i64::MAX - 5);

        // Inside a scope the rejected delta is not recorded
        let scope = store.begin().await.unwrap();
        scope
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 5,
            })
            .await
            .unwrap();
        let err = scope
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(scope.get_account(account.id).await.unwrap().balance, i64::MAX);

        scope.commit().await.unwrap();
        assert_eq!(store.get_account(account.id).await.unwrap().balance, i64::MAX);
    }

    #[tokio::test]
    async fn test_commit_latency_applies_writes_first() {
        let store = MemoryStore::new();
        let account = open(&store, 0).await;
        store.set_commit_latency(Duration::from_millis(100));

        let scope = store.begin().await.unwrap();
        scope
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 7,
            })
            .await
            .unwrap();

        let reader = store.clone();
        let commit = tokio::spawn(async move { scope.commit().await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!commit.is_finished());
        assert_eq!(reader.get_account(account.id).await.unwrap().balance, 7);
        commit.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lock_history_records_scope_and_account() {
        let store = MemoryStore::new();
        let a = open(&store, 0).await;
        let b = open(&store, 0).await;

        let scope = store.begin().await.unwrap();
        for id in [b.id, a.id, b.id] {
            scope
                .add_account_balance(AddAccountBalanceParams { id, amount: 1 })
                .await
                .unwrap();
        }
        scope.commit().await.unwrap();

        // Re-locking a held row is not a new acquisition
        let history: Vec<AccountId> = store
            .lock_history()
            .iter()
            .map(|e| e.account_id)
            .collect();
        assert_eq!(history, vec![b.id, a.id]);
        assert_eq!(store.get_account(b.id).await.unwrap().balance, 2);
    }
}
