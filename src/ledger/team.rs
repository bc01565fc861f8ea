use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::contracts::dedup_preserving_order;
use crate::error::LedgerError;
use crate::ledger::balance::{lock, Withdrawal};
use crate::ledger::withdraw::DistributionReport;
use crate::ledger::{AccountId, Balance, FeeLedger};

/// Fixed, ordered team membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AccountId>", into = "Vec<AccountId>")]
pub struct TeamRoster {
    members: Vec<AccountId>,
}

impl TeamRoster {
    pub fn new(members: Vec<AccountId>) -> Result<Self, LedgerError> {
        let members = dedup_preserving_order(members);
        if members.is_empty() {
            return Err(LedgerError::EmptyTeam);
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &[AccountId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        self.members.iter().any(|m| m == account)
    }

    pub fn ensure_member(&self, account: &AccountId) -> Result<(), LedgerError> {
        if !self.contains(account) {
            return Err(LedgerError::NotTeamMember {
                account: account.clone(),
            });
        }
        Ok(())
    }

    /// Even shares of `amount`; the first `amount % n` members get one unit more.
    pub fn shares(&self, amount: Balance) -> Vec<(AccountId, Balance)> {
        let n = self.members.len() as Balance;
        let base = amount / n;
        let extra = (amount % n) as usize;
        self.members
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.clone(), base + Balance::from(idx < extra)))
            .collect()
    }
}

impl TryFrom<Vec<AccountId>> for TeamRoster {
    type Error = LedgerError;

    fn try_from(members: Vec<AccountId>) -> Result<Self, Self::Error> {
        Self::new(members)
    }
}

impl From<TeamRoster> for Vec<AccountId> {
    fn from(roster: TeamRoster) -> Self {
        roster.members
    }
}

/// Team-side counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamBalance {
    /// Every unit ever credited to the team.
    pub total_accrued: Balance,
    /// Team credit not yet allotted to members.
    pub unsplit: Balance,
}

impl FeeLedger {
    /// Allot the unsplit team balance to members. Returns the amount allotted.
    #[instrument(skip(self))]
    pub fn split(&self, caller: &AccountId) -> Result<Balance, LedgerError> {
        self.roster.ensure_member(caller)?;
        let mut team = lock(&self.team);
        let remainder = team.unsplit;
        if remainder == 0 {
            debug!("nothing to split");
            return Ok(0);
        }
        for (member, share) in self.roster.shares(remainder) {
            self.members.credit(&member, share);
        }
        team.unsplit = 0;
        info!(amount = remainder, members = self.roster.len(), "team balance split");
        Ok(remainder)
    }

    /// Pull the caller's own team allotment.
    #[instrument(skip(self))]
    pub fn claim_team_member_fees(&self, caller: &AccountId) -> Result<Balance, LedgerError> {
        self.roster.ensure_member(caller)?;
        match self
            .members
            .withdraw(caller, |amount| self.settlement.transfer(caller, amount))
        {
            Withdrawal::Paid(amount) => {
                self.record_paid_out(amount);
                info!(member = %caller, amount, "team fees claimed");
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

    /// Split, then push every member's allotment. A failed transfer leaves
    /// that member's balance intact and does not undo the others.
    #[instrument(skip(self))]
    pub fn split_and_distribute_team_fees(
        &self,
        caller: &AccountId,
    ) -> Result<DistributionReport, LedgerError> {
        self.split(caller)?;
        let mut report = DistributionReport::default();
        for member in self.roster.members() {
            let outcome = self
                .members
                .withdraw(member, |amount| self.settlement.transfer(member, amount));
            self.apply_push(&mut report, member, outcome);
        }
        if report.is_empty() {
            debug!("no team fees to distribute");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ledger::tests::{ids, ledger_with};

    #[test]
    fn roster_dedups_and_rejects_empty() {
        let roster = TeamRoster::new(ids(&["b", "a", "b"])).unwrap();
        assert_eq!(roster.members(), ids(&["b", "a"]).as_slice());
        assert_eq!(TeamRoster::new(vec![]).unwrap_err(), LedgerError::EmptyTeam);
        assert!(serde_json::from_str::<TeamRoster>("[]").is_err());
    }

    #[test]
    fn shares_assign_remainder_to_first_members() {
        let roster = TeamRoster::new(ids(&["a", "b", "c"])).unwrap();
        let shares = roster.shares(11);
        assert_eq!(
            shares,
            vec![("a".into(), 4), ("b".into(), 4), ("c".into(), 3)]
        );
    }

    #[test]
    fn split_is_fair_and_idempotent() {
        let (ledger, _) = ledger_with(&["t1", "t2", "t3"]);
        let contract = "c".to_string();
        ledger.create_config_bps(&contract, 4_000, ids(&["r"])).unwrap();
        ledger.record_payment(&contract, 1_000).unwrap();
        assert_eq!(ledger.team_unsplit(), 400);

        assert_eq!(ledger.split(&"t2".into()).unwrap(), 400);
        let first: Vec<_> = ["t1", "t2", "t3"]
            .iter()
            .map(|m| ledger.team_member_balance(&m.to_string()))
            .collect();
        assert_eq!(first, vec![134, 133, 133]);
        assert_eq!(ledger.team_unsplit(), 0);

        assert_eq!(ledger.split(&"t1".into()).unwrap(), 0);
        let second: Vec<_> = ["t1", "t2", "t3"]
            .iter()
            .map(|m| ledger.team_member_balance(&m.to_string()))
            .collect();
        assert_eq!(first, second);
        assert_eq!(ledger.team_total_accrued(), 400);
        ledger.check_conservation().unwrap();
    }

    #[test]
    fn team_operations_require_membership() {
        let (ledger, _) = ledger_with(&["t1"]);
        let outsider = "eve".to_string();
        let expected = LedgerError::NotTeamMember {
            account: outsider.clone(),
        };
        assert_eq!(ledger.split(&outsider).unwrap_err(), expected);
        assert_eq!(
            ledger.split_and_distribute_team_fees(&outsider).unwrap_err(),
            expected
        );
        assert_eq!(ledger.claim_team_member_fees(&outsider).unwrap_err(), expected);
    }

    #[test]
    fn member_claim_then_double_claim() {
        let (ledger, bank) = ledger_with(&["t1", "t2"]);
        let contract = "c".to_string();
        ledger.create_config_bps(&contract, 2_000, ids(&["r"])).unwrap();
        ledger.record_payment(&contract, 500).unwrap();
        ledger.split(&"t1".into()).unwrap();

        assert_eq!(ledger.claim_team_member_fees(&"t1".into()).unwrap(), 50);
        assert_eq!(bank.balance(&"t1".into()), 50);
        assert!(matches!(
            ledger.claim_team_member_fees(&"t1".into()),
            Err(LedgerError::NothingToClaim { .. })
        ));
        assert_eq!(ledger.team_member_balance(&"t2".into()), 50);
        ledger.check_conservation().unwrap();
    }

    #[test]
    fn split_and_distribute_isolates_failed_member() {
        let (ledger, bank) = ledger_with(&["t1", "t2", "t3"]);
        let contract = "c".to_string();
        ledger.create_config_bps(&contract, 3_000, ids(&["r"])).unwrap();
        ledger.record_payment(&contract, 1_000).unwrap();
        bank.reject(&"t2".into());

        let report = ledger.split_and_distribute_team_fees(&"t3".into()).unwrap();
        assert_eq!(report.paid.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].account, "t2");
        assert_eq!(bank.balance(&"t1".into()), 100);
        assert_eq!(bank.balance(&"t3".into()), 100);
        assert_eq!(ledger.team_member_balance(&"t2".into()), 100);
        assert_eq!(ledger.team_member_balance(&"t1".into()), 0);
        ledger.check_conservation().unwrap();

        bank.accept(&"t2".into());
        let report = ledger.split_and_distribute_team_fees(&"t1".into()).unwrap();
        assert_eq!(report.total_paid(), 100);
        assert_eq!(ledger.total_paid_out(), 300);
        // nothing left: a successful no-op
        let report = ledger.split_and_distribute_team_fees(&"t1".into()).unwrap();
        assert!(report.is_empty());
        ledger.check_conservation().unwrap();
    }
}
