//! Recipient withdrawals: pull (`claim`) and push (`distribute_all`).

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{LedgerError, SettlementError};
use crate::ledger::balance::Withdrawal;
use crate::ledger::{AccountId, Balance, ContractId, FeeLedger};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub account: AccountId,
    pub amount: Balance,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayout {
    pub account: AccountId,
    pub amount: Balance,
    pub reason: String,
}

/// What a push sweep paid, and which transfers were rejected (and restored).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub paid: Vec<Payout>,
    pub failed: Vec<FailedPayout>,
}

impl DistributionReport {
    pub fn is_empty(&self) -> bool {
        self.paid.is_empty() && self.failed.is_empty()
    }

    pub fn total_paid(&self) -> Balance {
        self.paid.iter().map(|p| p.amount).sum()
    }
}

impl FeeLedger {
    /// Pull the caller's whole balance under `contract`.
    #[instrument(skip(self))]
    pub fn claim(&self, contract: &ContractId, caller: &AccountId) -> Result<Balance, LedgerError> {
        let config = self.configs.get(contract)?;
        if !config.is_recipient(caller) {
            return Err(LedgerError::NotARecipient {
                contract: contract.clone(),
                account: caller.clone(),
            });
        }
        let key = (contract.clone(), caller.clone());
        match self
            .recipients
            .withdraw(&key, |amount| self.settlement.transfer(caller, amount))
        {
            Withdrawal::Paid(amount) => {
                self.record_paid_out(amount);
                info!(recipient = %caller, amount, "recipient fees claimed");
                Ok(amount)
            }
            Withdrawal::Empty => Err(LedgerError::NothingToClaim {
                account: caller.clone(),
            }),
            Withdrawal::Failed { amount, error } => {
                Err(self.transfer_failed(caller, amount, &error))
            }
        }
    }

    /// Push every recipient's balance under `contract`. Zero balances are
    /// skipped; when nothing is owed the sweep is a successful no-op.
    #[instrument(skip(self))]
    pub fn distribute_all(&self, contract: &ContractId) -> Result<DistributionReport, LedgerError> {
        let config = self.configs.get(contract)?;
        let mut report = DistributionReport::default();
        for recipient in &config.recipients {
            let key = (contract.clone(), recipient.clone());
            let outcome = self
                .recipients
                .withdraw(&key, |amount| self.settlement.transfer(recipient, amount));
            self.apply_push(&mut report, recipient, outcome);
        }
        if report.is_empty() {
            debug!("no recipient fees to distribute");
        }
        Ok(report)
    }

    pub(crate) fn apply_push(
        &self,
        report: &mut DistributionReport,
        account: &AccountId,
        outcome: Withdrawal,
    ) {
        match outcome {
            Withdrawal::Paid(amount) => {
                self.record_paid_out(amount);
                info!(account = %account, amount, "fees pushed");
                report.paid.push(Payout {
                    account: account.clone(),
                    amount,
                });
            }
            Withdrawal::Empty => {}
            Withdrawal::Failed { amount, error } => {
                let err = self.transfer_failed(account, amount, &error);
                report.failed.push(FailedPayout {
                    account: account.clone(),
                    amount,
                    reason: err.to_string(),
                });
            }
        }
    }

    pub(crate) fn transfer_failed(
        &self,
        to: &AccountId,
        amount: Balance,
        error: &SettlementError,
    ) -> LedgerError {
        warn!(to = %to, amount, %error, "transfer failed, balance restored");
        LedgerError::TransferFailed {
            to: to.clone(),
            amount,
            reason: error.to_string(),
        }
    }
}
