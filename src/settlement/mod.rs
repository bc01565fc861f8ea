//! Value-transfer collaborator.
//!
//! The ledger never moves funds itself; every withdrawal path calls
//! [`Settlement::transfer`], which must either fully succeed or fully fail.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock};

use tracing::trace;

use crate::error::SettlementError;
use crate::ledger::balance::{lock, read, write};
use crate::ledger::{AccountId, Balance};

pub trait Settlement: Send + Sync {
    fn transfer(&self, to: &AccountId, amount: Balance) -> Result<(), SettlementError>;
}

/// In-memory wallets, with an optional set of destinations that refuse funds.
#[derive(Default)]
pub struct MemoryBank {
    wallets: Mutex<BTreeMap<AccountId, Balance>>,
    rejecting: RwLock<BTreeSet<AccountId>>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wallets(wallets: BTreeMap<AccountId, Balance>) -> Self {
        Self {
            wallets: Mutex::new(wallets),
            rejecting: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn reject(&self, account: &AccountId) {
        write(&self.rejecting).insert(account.clone());
    }

    pub fn accept(&self, account: &AccountId) {
        write(&self.rejecting).remove(account);
    }

    pub fn balance(&self, account: &AccountId) -> Balance {
        lock(&self.wallets).get(account).copied().unwrap_or(0)
    }

    pub fn wallets(&self) -> BTreeMap<AccountId, Balance> {
        lock(&self.wallets).clone()
    }

    /// Take `amount` out of a payer's wallet before it is recorded as a payment.
    pub fn debit(&self, account: &AccountId, amount: Balance) -> Result<(), SettlementError> {
        let mut wallets = lock(&self.wallets);
        let balance = wallets.get(account).copied().unwrap_or(0);
        if balance < amount {
            return Err(SettlementError::InsufficientFunds {
                account: account.clone(),
                needed: amount,
                available: balance,
            });
        }
        wallets.insert(account.clone(), balance - amount);
        Ok(())
    }
}

impl Settlement for MemoryBank {
    fn transfer(&self, to: &AccountId, amount: Balance) -> Result<(), SettlementError> {
        if read(&self.rejecting).contains(to) {
            return Err(SettlementError::Rejected(to.clone()));
        }
        *lock(&self.wallets).entry(to.clone()).or_insert(0) += amount;
        trace!(to = %to, amount, "bank transfer");
        Ok(())
    }
}
