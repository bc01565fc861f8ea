//! Fee-distribution ledger.
//!
//! One team, many fee-paying contracts, many recipients per contract. Each
//! incoming payment is split between the team and the contract's recipients by
//! weights fixed when the contract is configured; both sides withdraw either by
//! pull (`claim`) or by push (`distribute_all`, `split_and_distribute_team_fees`).
//!
//! * [`contracts`]: per-contract fee configuration and the weight policy.
//! * [`ledger`]: the owned [`FeeLedger`]: accrual, withdrawals, team splits.
//! * [`settlement`]: the value-transfer collaborator used by every payout.
//! * [`config`] / [`scenario`]: JSON bootstrap and scripted replay used by the CLI.

pub mod config;
pub mod contracts;
pub mod ledger;
pub mod scenario;
pub mod settlement;

mod error;

pub use error::{LedgerError, SettlementError};
pub use ledger::{AccountId, Amount, Balance, ContractId, FeeLedger, LedgerSnapshot};
