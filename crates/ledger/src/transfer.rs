//! Value movement out of the ledger.
//!
//! The ledger only keeps books; actually handing value to a supplier is an
//! external interaction behind [`ValueTransfer`]. A transfer may call back
//! into the ledger before it returns, so the service commits its own state
//! first and never holds its lock across a transfer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use payables_core::{AccountId, Amount};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The receiving side refused the value.
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// The transfer backend is unusable (e.g. poisoned lock, closed channel).
    #[error("transfer backend unavailable: {0}")]
    Unavailable(String),
}

/// Moves value from the ledger's custody to an account.
///
/// Implementations must either move the whole `amount` and return `Ok`, or
/// move nothing and return an error.
pub trait ValueTransfer: Send + Sync {
    fn transfer(&self, to: AccountId, amount: Amount) -> Result<(), TransferError>;
}

/// In-memory transfer target for tests/dev: credits a wallet per account.
#[derive(Debug, Default)]
pub struct InMemoryTransfer {
    wallets: Mutex<HashMap<AccountId, Amount>>,
}

impl InMemoryTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total value received by `account` so far.
    pub fn received_by(&self, account: &AccountId) -> Result<Amount, TransferError> {
        let wallets = self.wallets()?;
        Ok(wallets.get(account).copied().unwrap_or(Amount::ZERO))
    }

    fn wallets(&self) -> Result<MutexGuard<'_, HashMap<AccountId, Amount>>, TransferError> {
        self.wallets
            .lock()
            .map_err(|_| TransferError::Unavailable("wallet lock poisoned".to_string()))
    }
}

impl ValueTransfer for InMemoryTransfer {
    fn transfer(&self, to: AccountId, amount: Amount) -> Result<(), TransferError> {
        let mut wallets = self.wallets()?;

        let wallet = wallets.entry(to).or_default();
        *wallet = wallet
            .checked_add(amount)
            .map_err(|e| TransferError::Rejected(e.to_string()))?;
        Ok(())
    }
}
