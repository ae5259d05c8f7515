//! Transfer Coordinator
//!
//! Runs one transfer as a single store scope:
//!
//! ```text
//! begin ─▶ transfer row ─▶ debit entry ─▶ credit entry ─▶ balance(lower id) ─▶ balance(higher id) ─▶ commit
//!                 │               │               │                 │                    │
//!                 └───────────────┴───────────────┴─────── any error ┴────────────────────┴─▶ rollback
//! ```
//!
//! The coordinator holds no locks of its own. Mutual exclusion comes from the
//! store's row locks, and deadlock freedom from always taking them in
//! ascending account-ID order.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::types::{TransferOutcome, TransferRequest};
use crate::store::{
    Account, AccountId, AddAccountBalanceParams, CreateEntryParams, CreateTransferParams, Queries,
    Store, StoreError, StoreScope,
};

pub struct TransferCoordinator {
    store: Arc<dyn Store>,
    timeout: Option<Duration>,
}

impl TransferCoordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Abort (and roll back) any transfer whose writes are not staged within `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Move funds between two accounts atomically.
    ///
    /// The timeout bounds opening the scope and staging the writes. Once
    /// every write has succeeded the commit always runs to completion, so a
    /// returned `Timeout` means nothing was persisted. Dropping the returned
    /// future before the commit starts drops the open scope, which rolls it
    /// back.
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferOutcome, TransferError> {
        if req.amount <= 0 {
            return Err(TransferError::InvalidAmount);
        }
        if req.from_account_id == req.to_account_id {
            return Err(TransferError::SameAccount);
        }

        let (scope, outcome) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.stage(req)).await {
                Ok(staged) => staged?,
                Err(_) => {
                    warn!(request = %req, timeout = ?limit, "Transfer timed out, scope rolled back");
                    return Err(TransferError::Timeout(limit));
                }
            },
            None => self.stage(req).await?,
        };

        if let Err(e) = scope.commit().await {
            error!(request = %req, error = %e, "Transfer commit failed");
            return Err(TransferError::CommitFailed(e));
        }
        info!(
            transfer_id = outcome.transfer.id,
            from = req.from_account_id,
            to = req.to_account_id,
            amount = req.amount,
            "Transfer committed"
        );
        Ok(outcome)
    }

    /// Open a scope and run every write in it, leaving it ready to commit
    async fn stage(
        &self,
        req: TransferRequest,
    ) -> Result<(Box<dyn StoreScope>, TransferOutcome), TransferError> {
        let scope = self.store.begin().await.map_err(|e| {
            error!(request = %req, error = %e, "Cannot open transfer scope");
            TransferError::StoreUnavailable(e)
        })?;

        match write_transfer(scope.as_ref(), &req).await {
            Ok(outcome) => Ok((scope, outcome)),
            Err(cause) => match scope.rollback().await {
                Ok(()) => {
                    warn!(request = %req, error = %cause, "Transfer rolled back");
                    Err(TransferError::WriteFailed(cause))
                }
                Err(rollback) => {
                    error!(
                        request = %req,
                        error = %cause,
                        rollback_error = %rollback,
                        "Transfer rollback failed, store needs reconciliation"
                    );
                    Err(TransferError::RollbackFailed { cause, rollback })
                }
            },
        }
    }
}

/// The five writes of a transfer, in order, against one scope
async fn write_transfer<Q>(q: &Q, req: &TransferRequest) -> Result<TransferOutcome, StoreError>
where
    Q: Queries + ?Sized,
{
    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: req.from_account_id,
            to_account_id: req.to_account_id,
            amount: req.amount,
        })
        .await?;

    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: req.from_account_id,
            amount: -req.amount,
        })
        .await?;

    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: req.to_account_id,
            amount: req.amount,
        })
        .await?;

    let [first, second] = req.lock_order();
    let (first, second) = add_money(q, first, second).await?;
    let (from_account, to_account) = if first.id == req.from_account_id {
        (first, second)
    } else {
        (second, first)
    };

    debug!(
        transfer_id = transfer.id,
        from_balance = from_account.balance,
        to_balance = to_account.balance,
        "Transfer writes staged"
    );

    Ok(TransferOutcome {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Apply two balance deltas in the given order
async fn add_money<Q>(
    q: &Q,
    (first_id, first_amount): (AccountId, i64),
    (second_id, second_amount): (AccountId, i64),
) -> Result<(Account, Account), StoreError>
where
    Q: Queries + ?Sized,
{
    let first = q
        .add_account_balance(AddAccountBalanceParams {
            id: first_id,
            amount: first_amount,
        })
        .await?;
    let second = q
        .add_account_balance(AddAccountBalanceParams {
            id: second_id,
            amount: second_amount,
        })
        .await?;
    Ok((first, second))
}
