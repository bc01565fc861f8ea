use thiserror::Error;

use crate::ledger::{AccountId, Balance, ContractId};

/// Canonical error type returned by every ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A second configuration attempt for the same contract.
    #[error("contract {contract} is already configured")]
    AlreadyConfigured { contract: ContractId },

    /// Fee percentage outside `[0, 0.5)` or unparsable.
    #[error("invalid fee percentage: {0}")]
    InvalidPercentage(String),

    /// Recipient list empty after deduplication.
    #[error("recipient list is empty")]
    EmptyRecipients,

    /// Team roster empty after deduplication.
    #[error("team roster is empty")]
    EmptyTeam,

    #[error("contract {contract} is not configured")]
    NotConfigured { contract: ContractId },

    #[error("{account} is not a recipient of contract {contract}")]
    NotARecipient {
        contract: ContractId,
        account: AccountId,
    },

    #[error("{account} is not a team member")]
    NotTeamMember { account: AccountId },

    #[error("nothing to claim for {account}")]
    NothingToClaim { account: AccountId },

    #[error("index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    /// The settlement collaborator rejected the transfer; the balance was restored.
    #[error("transfer of {amount} to {to} failed: {reason}")]
    TransferFailed {
        to: AccountId,
        amount: Balance,
        reason: String,
    },

    /// The payer's wallet could not cover an incoming payment; nothing was recorded.
    #[error("payer {payer} could not fund {amount}: {reason}")]
    FundingFailed {
        payer: AccountId,
        amount: Balance,
        reason: String,
    },

    #[error("conservation violated: owed {owed}, held {held}")]
    ConservationViolated { owed: Balance, held: Balance },

    #[error("config error: {0}")]
    Config(String),

    #[error("scenario error: {0}")]
    Scenario(String),
}

impl LedgerError {
    /// Stable snake_case name of the error kind, used by scenario expectations.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::AlreadyConfigured { .. } => "already_configured",
            LedgerError::InvalidPercentage(_) => "invalid_percentage",
            LedgerError::EmptyRecipients => "empty_recipients",
            LedgerError::EmptyTeam => "empty_team",
            LedgerError::NotConfigured { .. } => "not_configured",
            LedgerError::NotARecipient { .. } => "not_a_recipient",
            LedgerError::NotTeamMember { .. } => "not_team_member",
            LedgerError::NothingToClaim { .. } => "nothing_to_claim",
            LedgerError::OutOfRange { .. } => "out_of_range",
            LedgerError::TransferFailed { .. } => "transfer_failed",
            LedgerError::FundingFailed { .. } => "funding_failed",
            LedgerError::ConservationViolated { .. } => "conservation_violated",
            LedgerError::Config(_) => "config",
            LedgerError::Scenario(_) => "scenario",
        }
    }
}

/// Failure reported by the value-transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("destination {0} rejects funds")]
    Rejected(AccountId),

    #[error("{account} holds {available}, needs {needed}")]
    InsufficientFunds {
        account: AccountId,
        needed: Balance,
        available: Balance,
    },

    #[error("settlement unavailable: {0}")]
    Unavailable(String),
}
