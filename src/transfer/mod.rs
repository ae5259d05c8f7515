//! Money Transfer Core
//!
//! Atomically moves funds between two accounts and writes the audit trail:
//! one transfer row, a debit and a credit entry, and two balance deltas, all
//! inside one store scope.
//!
//! # Invariants
//!
//! 1. **All-or-nothing**: any failed write rolls the whole scope back
//! 2. **Delta-only balances**: balances change by `balance + delta`, never by overwrite
//! 3. **Ascending lock order**: balance rows are locked lower account ID first,
//!    for every transfer in either direction
//! 4. **No retries**: failures are returned to the caller as-is

pub mod coordinator;
pub mod error;
pub mod types;


pub use coordinator::TransferCoordinator;
pub use error::TransferError;
pub use types::{TransferOutcome, TransferRequest};
