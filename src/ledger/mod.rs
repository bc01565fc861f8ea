use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::contracts::{ConfigStore, FeeConfig, FeePercentage, WeightPolicy, BPS_DENOMINATOR};
use crate::error::LedgerError;
use crate::settlement::Settlement;

pub mod balance;
pub mod snapshot;
pub mod team;
pub mod withdraw;

use balance::{lock, BalanceBook};
use team::{TeamBalance, TeamRoster};

pub use snapshot::LedgerSnapshot;
pub use withdraw::{DistributionReport, FailedPayout, Payout};

pub type AccountId = String;
pub type ContractId = String;
/// A single payment, in minimal units.
pub type Amount = u64;
/// Accumulated balances and counters; wide enough that credits never overflow.
pub type Balance = u128;

/// Money that entered and left the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub received: Balance,
    pub paid_out: Balance,
}

/// The fee-distribution ledger.
///
/// Owns every balance of one fee graph: one team roster, any number of
/// configured contracts, and their recipients. All methods take `&self`;
/// share it as `Arc<FeeLedger>`.
pub struct FeeLedger {
    roster: TeamRoster,
    configs: ConfigStore,
    recipients: BalanceBook<(ContractId, AccountId)>,
    members: BalanceBook<AccountId>,
    team: Mutex<TeamBalance>,
    totals: Mutex<Totals>,
    settlement: Arc<dyn Settlement>,
}

impl FeeLedger {
    pub fn new(
        roster: TeamRoster,
        policy: Box<dyn WeightPolicy>,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        Self {
            roster,
            configs: ConfigStore::new(policy),
            recipients: BalanceBook::new(),
            members: BalanceBook::new(),
            team: Mutex::new(TeamBalance::default()),
            totals: Mutex::new(Totals::default()),
            settlement,
        }
    }

    pub fn roster(&self) -> &TeamRoster {
        &self.roster
    }

    pub fn policy_name(&self) -> &'static str {
        self.configs.policy_name()
    }

    pub fn create_config(
        &self,
        contract: &ContractId,
        fee: FeePercentage,
        recipients: Vec<AccountId>,
    ) -> Result<Arc<FeeConfig>, LedgerError> {
        self.configs
            .create(contract, (fee.numerator(), fee.denominator()), recipients)
    }

    /// Same as [`create_config`](Self::create_config) with the fee in basis points.
    pub fn create_config_bps(
        &self,
        contract: &ContractId,
        fee_bps: u32,
        recipients: Vec<AccountId>,
    ) -> Result<Arc<FeeConfig>, LedgerError> {
        self.configs
            .create(contract, (u64::from(fee_bps), BPS_DENOMINATOR), recipients)
    }

    /// Same as [`create_config`](Self::create_config) with a textual fee
    /// (`"0.25"`, `"25%"` or `"1/4"`).
    pub fn create_config_str(
        &self,
        contract: &ContractId,
        fee: &str,
        recipients: Vec<AccountId>,
    ) -> Result<Arc<FeeConfig>, LedgerError> {
        // an existing contract wins over a malformed fee
        if self.configs.get(contract).is_ok() {
            return Err(LedgerError::AlreadyConfigured {
                contract: contract.clone(),
            });
        }
        let fraction = FeePercentage::parse_fraction(fee)?;
        self.configs.create(contract, fraction, recipients)
    }

    pub fn get_config(&self, contract: &ContractId) -> Result<Arc<FeeConfig>, LedgerError> {
        self.configs.get(contract)
    }

    pub fn contracts(&self) -> Vec<ContractId> {
        self.configs.contracts()
    }

    pub fn recipient_at(
        &self,
        contract: &ContractId,
        index: usize,
    ) -> Result<AccountId, LedgerError> {
        Ok(self.configs.get(contract)?.recipient(index)?.clone())
    }

    /// Credit an incoming payment for `contract` to the team and its recipients.
    #[instrument(skip(self))]
    pub fn record_payment(&self, contract: &ContractId, amount: Amount) -> Result<(), LedgerError> {
        let config = self.configs.get(contract)?;
        if amount == 0 {
            debug!("zero payment ignored");
            return Ok(());
        }
        let split = config.split(amount);
        {
            let mut team = lock(&self.team);
            team.total_accrued += split.team;
            team.unsplit += split.team;
        }
        for recipient in &config.recipients {
            self.recipients
                .credit(&(contract.clone(), recipient.clone()), split.per_recipient);
        }
        lock(&self.totals).received += Balance::from(amount);
        debug!(
            team = split.team,
            per_recipient = split.per_recipient,
            recipients = config.recipients.len(),
            "payment accrued"
        );
        Ok(())
    }

    /// Withdrawable balance of `account` under `contract`; zero for strangers.
    pub fn recipient_balance(
        &self,
        contract: &ContractId,
        account: &AccountId,
    ) -> Result<Balance, LedgerError> {
        self.configs.get(contract)?;
        Ok(self
            .recipients
            .available(&(contract.clone(), account.clone())))
    }

    pub fn team_total_accrued(&self) -> Balance {
        lock(&self.team).total_accrued
    }

    pub fn team_unsplit(&self) -> Balance {
        lock(&self.team).unsplit
    }

    pub fn team_member_balance(&self, member: &AccountId) -> Balance {
        self.members.available(member)
    }

    pub fn totals(&self) -> Totals {
        *lock(&self.totals)
    }

    pub fn total_received(&self) -> Balance {
        self.totals().received
    }

    pub fn total_paid_out(&self) -> Balance {
        self.totals().paid_out
    }

    /// Verify `owed == received - paid_out`, counting in-flight transfers as owed.
    ///
    /// Only meaningful while no operation is running concurrently.
    pub fn check_conservation(&self) -> Result<(), LedgerError> {
        let owed = self.recipients.total_owed() + self.team_unsplit() + self.members.total_owed();
        let totals = self.totals();
        let held = totals.received.saturating_sub(totals.paid_out);
        if owed != held || totals.paid_out > totals.received {
            return Err(LedgerError::ConservationViolated { owed, held });
        }
        Ok(())
    }

    fn record_paid_out(&self, amount: Balance) {
        lock(&self.totals).paid_out += amount;
    }
}
