//! Ledger bootstrap configuration, read from JSON.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contracts::PolicyKind;
use crate::error::LedgerError;
use crate::ledger::team::TeamRoster;
use crate::ledger::{AccountId, Balance, FeeLedger};
use crate::settlement::MemoryBank;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Team roster; duplicates are dropped, an empty list is rejected.
    pub team: TeamRoster,
    #[serde(default)]
    pub policy: PolicyKind,
    /// Opening wallet balances of the in-memory bank (payers, usually).
    #[serde(default)]
    pub initial_wallets: BTreeMap<AccountId, Balance>,
    /// Destinations whose wallets refuse incoming transfers.
    #[serde(default)]
    pub rejecting: Vec<AccountId>,
}

impl LedgerConfig {
    pub fn from_json(text: &str) -> Result<Self, LedgerError> {
        serde_json::from_str(text).map_err(|e| LedgerError::Config(e.to_string()))
    }

    /// Build a ledger wired to a fresh in-memory bank.
    pub fn build(&self) -> (Arc<FeeLedger>, Arc<MemoryBank>) {
        let bank = Arc::new(MemoryBank::with_wallets(self.initial_wallets.clone()));
        for account in &self.rejecting {
            bank.reject(account);
        }
        let ledger = FeeLedger::new(self.team.clone(), self.policy.build(), bank.clone());
        (Arc::new(ledger), bank)
    }
}
