//! Scripted replay of ledger operations.
//!
//! A scenario is a JSON array of steps such as
//! `{"type": "claim", "contract": "c1", "caller": "alice", "expect_error": "nothing_to_claim"}`.
//! Every step runs regardless of earlier failures; deviations from the
//! expected outcome are collected and reported at the end.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::ledger::{AccountId, Amount, Balance, ContractId, FeeLedger};
use crate::settlement::MemoryBank;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    CreateConfig {
        contract: ContractId,
        fee: String,
        recipients: Vec<AccountId>,
    },
    RecordPayment {
        contract: ContractId,
        amount: Amount,
        #[serde(default)]
        payer: Option<AccountId>,
    },
    Claim {
        contract: ContractId,
        caller: AccountId,
    },
    DistributeAll {
        contract: ContractId,
    },
    Split {
        caller: AccountId,
    },
    ClaimTeamMemberFees {
        caller: AccountId,
    },
    SplitAndDistributeTeamFees {
        caller: AccountId,
    },
    RecipientAt {
        contract: ContractId,
        index: usize,
    },
    RejectTransfers {
        account: AccountId,
    },
    AcceptTransfers {
        account: AccountId,
    },
    CheckConservation,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::CreateConfig { .. } => "create_config",
            Step::RecordPayment { .. } => "record_payment",
            Step::Claim { .. } => "claim",
            Step::DistributeAll { .. } => "distribute_all",
            Step::Split { .. } => "split",
            Step::ClaimTeamMemberFees { .. } => "claim_team_member_fees",
            Step::SplitAndDistributeTeamFees { .. } => "split_and_distribute_team_fees",
            Step::RecipientAt { .. } => "recipient_at",
            Step::RejectTransfers { .. } => "reject_transfers",
            Step::AcceptTransfers { .. } => "accept_transfers",
            Step::CheckConservation => "check_conservation",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioStep {
    #[serde(flatten)]
    pub step: Step,
    /// Error kind (see [`LedgerError::kind`]) the step must fail with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { value: Value },
    Err { kind: String, message: String },
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StepRecord {
    pub index: usize,
    pub op: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScenarioReport {
    pub records: Vec<StepRecord>,
    pub mismatches: Vec<String>,
}

impl ScenarioReport {
    pub fn ensure_expectations(&self) -> Result<(), LedgerError> {
        if self.mismatches.is_empty() {
            return Ok(());
        }
        Err(LedgerError::Scenario(self.mismatches.join("; ")))
    }
}

pub fn parse_steps(text: &str) -> Result<Vec<ScenarioStep>, LedgerError> {
    serde_json::from_str(text).map_err(|e| LedgerError::Scenario(e.to_string()))
}

pub struct ScenarioRunner<'a> {
    ledger: &'a FeeLedger,
    bank: &'a MemoryBank,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(ledger: &'a FeeLedger, bank: &'a MemoryBank) -> Self {
        Self { ledger, bank }
    }

    pub fn run(&self, steps: &[ScenarioStep]) -> ScenarioReport {
        let mut report = ScenarioReport::default();
        for (index, scripted) in steps.iter().enumerate() {
            let op = scripted.step.name();
            let result = self.apply(&scripted.step);
            let mismatch = match (&result, scripted.expect_error.as_deref()) {
                (Ok(_), None) => None,
                (Err(err), Some(kind)) if err.kind() == kind => None,
                (Ok(_), Some(kind)) => Some(format!("step {index} ({op}): expected {kind}, got ok")),
                (Err(err), expected) => Some(format!(
                    "step {index} ({op}): expected {}, got {}: {err}",
                    expected.unwrap_or("ok"),
                    err.kind()
                )),
            };
            if let Some(m) = mismatch {
                warn!("{m}");
                report.mismatches.push(m);
            }
            let outcome = match result {
                Ok(value) => Outcome::Ok { value },
                Err(err) => Outcome::Err {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                },
            };
            debug!(index, op, ?outcome, "scenario step");
            report.records.push(StepRecord { index, op, outcome });
        }
        report
    }

    fn apply(&self, step: &Step) -> Result<Value, LedgerError> {
        let ledger = self.ledger;
        match step {
            Step::CreateConfig {
                contract,
                fee,
                recipients,
            } => to_value(&*ledger.create_config_str(contract, fee, recipients.clone())?),
            Step::RecordPayment {
                contract,
                amount,
                payer,
            } => {
                ledger.get_config(contract)?;
                if let Some(payer) = payer {
                    let amount = Balance::from(*amount);
                    self.bank
                        .debit(payer, amount)
                        .map_err(|e| LedgerError::FundingFailed {
                            payer: payer.clone(),
                            amount,
                            reason: e.to_string(),
                        })?;
                }
                ledger.record_payment(contract, *amount)?;
                Ok(Value::Null)
            }
            Step::Claim { contract, caller } => to_value(&ledger.claim(contract, caller)?),
            Step::DistributeAll { contract } => to_value(&ledger.distribute_all(contract)?),
            Step::Split { caller } => to_value(&ledger.split(caller)?),
            Step::ClaimTeamMemberFees { caller } => {
                to_value(&ledger.claim_team_member_fees(caller)?)
            }
            Step::SplitAndDistributeTeamFees { caller } => {
                to_value(&ledger.split_and_distribute_team_fees(caller)?)
            }
            Step::RecipientAt { contract, index } => {
                to_value(&ledger.recipient_at(contract, *index)?)
            }
            Step::RejectTransfers { account } => {
                self.bank.reject(account);
                Ok(Value::Null)
            }
            Step::AcceptTransfers { account } => {
                self.bank.accept(account);
                Ok(Value::Null)
            }
            Step::CheckConservation => {
                ledger.check_conservation()?;
                Ok(Value::Null)
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, LedgerError> {
    serde_json::to_value(value).map_err(|e| LedgerError::Scenario(e.to_string()))
}
