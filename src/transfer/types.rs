//! Transfer request/outcome types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{Account, AccountId, Entry, Transfer};

/// Move `amount` minor units from one account to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Same accounts, opposite direction
    pub fn reversed(&self) -> Self {
        Self::new(self.to_account_id, self.from_account_id, self.amount)
    }

    /// Balance deltas in the order their row locks must be taken.
    ///
    /// Every transfer locks the lower account ID first, so two transfers over
    /// the same pair can never each hold the lock the other is waiting for.
    pub fn lock_order(&self) -> [(AccountId, i64); 2] {
        let debit = (self.from_account_id, -self.amount);
        let credit = (self.to_account_id, self.amount);
        if self.from_account_id < self.to_account_id {
            [debit, credit]
        } else {
            [credit, debit]
        }
    }
}

impl fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.from_account_id, self.to_account_id, self.amount
        )
    }
}

/// Everything one committed transfer wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order_ascending_forward() {
        let req = TransferRequest::new(1, 2, 10);
        assert_eq!(req.lock_order(), [(1, -10), (2, 10)]);
    }

    #[test]
    fn test_lock_order_ascending_reverse() {
        let req = TransferRequest::new(2, 1, 10);
        assert_eq!(req.lock_order(), [(1, 10), (2, -10)]);
    }

    #[test]
    fn test_opposite_directions_share_lock_sequence() {
        let req = TransferRequest::new(7, 3, 25);
        let ids = |r: TransferRequest| r.lock_order().map(|(id, _)| id);
        assert_eq!(ids(req), ids(req.reversed()));
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferRequest::new(1, 2, 10).to_string(), "1 -> 2 (10)");
    }
}
