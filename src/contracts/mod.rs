use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::balance::{read, write};
use crate::ledger::{AccountId, Amount, ContractId};

pub mod policy;

pub use policy::{FeeWeights, PaymentSplit, PolicyKind, WeightPolicy};

pub const BPS_DENOMINATOR: u64 = 10_000;

/// Fee as a reduced fraction `numerator / denominator`, always within `[0, 1/2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFee", into = "RawFee")]
pub struct FeePercentage {
    numerator: u64,
    denominator: u64,
}

/// Unchecked wire form of [`FeePercentage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFee {
    pub numerator: u64,
    pub denominator: u64,
}

impl FeePercentage {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, LedgerError> {
        if denominator == 0 {
            return Err(LedgerError::InvalidPercentage(format!(
                "{numerator}/0 has a zero denominator"
            )));
        }
        if 2 * numerator as u128 >= denominator as u128 {
            return Err(LedgerError::InvalidPercentage(format!(
                "{numerator}/{denominator} is not below 1/2"
            )));
        }
        let g = gcd(numerator, denominator);
        Ok(Self {
            numerator: numerator / g,
            denominator: denominator / g,
        })
    }

    pub fn from_bps(bps: u32) -> Result<Self, LedgerError> {
        Self::new(u64::from(bps), BPS_DENOMINATOR)
    }

    pub fn numerator(self) -> u64 {
        self.numerator
    }

    pub fn denominator(self) -> u64 {
        self.denominator
    }

    /// Parse `"0.25"`, `"25%"` or `"1/4"` into an unreduced, unchecked
    /// `(numerator, denominator)` pair.
    pub fn parse_fraction(text: &str) -> Result<(u64, u64), LedgerError> {
        let text = text.trim();
        let parsed = if let Some((num, den)) = text.split_once('/') {
            parse_digits(num.trim()).zip(parse_digits(den.trim()))
        } else if let Some(pct) = text.strip_suffix('%') {
            parse_decimal(pct.trim()).and_then(|(num, den)| Some((num, den.checked_mul(100)?)))
        } else {
            parse_decimal(text)
        };
        parsed.ok_or_else(|| LedgerError::InvalidPercentage(format!("cannot parse {text:?}")))
    }
}

impl TryFrom<RawFee> for FeePercentage {
    type Error = LedgerError;

    fn try_from(raw: RawFee) -> Result<Self, Self::Error> {
        Self::new(raw.numerator, raw.denominator)
    }
}

impl From<FeePercentage> for RawFee {
    fn from(fee: FeePercentage) -> RawFee {
        RawFee {
            numerator: fee.numerator,
            denominator: fee.denominator,
        }
    }
}

impl FromStr for FeePercentage {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numerator, denominator) = Self::parse_fraction(s)?;
        Self::new(numerator, denominator)
    }
}

impl fmt::Display for FeePercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

fn parse_digits(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// `"12.345"` as `(12_345, 1_000)`; fails when the scale overflows `u64`.
fn parse_decimal(text: &str) -> Option<(u64, u64)> {
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole = if whole.is_empty() { 0 } else { parse_digits(whole)? };
    let frac_value = if frac.is_empty() { 0 } else { parse_digits(frac)? };
    let scale = 10u64.checked_pow(u32::try_from(frac.len()).ok()?)?;
    let numerator = whole.checked_mul(scale)?.checked_add(frac_value)?;
    Some((numerator, scale))
}

/// Order-preserving dedup: a repeated identity keeps only its first position.
pub fn dedup_preserving_order<I>(items: I) -> Vec<AccountId>
where
    I: IntoIterator<Item = AccountId>,
{
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Immutable fee configuration of one contract.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeConfig {
    pub contract: ContractId,
    pub fee: FeePercentage,
    pub recipients: Vec<AccountId>,
    pub weights: FeeWeights,
}

impl FeeConfig {
    pub fn recipient(&self, index: usize) -> Result<&AccountId, LedgerError> {
        self.recipients.get(index).ok_or(LedgerError::OutOfRange {
            index,
            len: self.recipients.len(),
        })
    }

    pub fn is_recipient(&self, account: &AccountId) -> bool {
        self.recipients.iter().any(|r| r == account)
    }

    pub fn split(&self, amount: Amount) -> PaymentSplit {
        self.weights.split(amount, self.recipients.len())
    }
}

/// Per-contract configuration store; every entry is written exactly once.
pub struct ConfigStore {
    policy: Box<dyn WeightPolicy>,
    configs: RwLock<BTreeMap<ContractId, Arc<FeeConfig>>>,
}

impl ConfigStore {
    pub fn new(policy: Box<dyn WeightPolicy>) -> Self {
        Self {
            policy,
            configs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Store the configuration of `contract` from a raw `numerator / denominator`
    /// fee. An existing configuration is reported before the arguments are
    /// looked at.
    pub fn create(
        &self,
        contract: &ContractId,
        (numerator, denominator): (u64, u64),
        recipients: Vec<AccountId>,
    ) -> Result<Arc<FeeConfig>, LedgerError> {
        let mut configs = write(&self.configs);
        if configs.contains_key(contract) {
            return Err(LedgerError::AlreadyConfigured {
                contract: contract.clone(),
            });
        }
        let fee = FeePercentage::new(numerator, denominator)?;
        let recipients = dedup_preserving_order(recipients);
        if recipients.is_empty() {
            return Err(LedgerError::EmptyRecipients);
        }
        let weights = self.policy.weights(fee, recipients.len());
        if !weights.is_conserving(recipients.len()) || !weights.is_below_cap() {
            return Err(LedgerError::InvalidPercentage(format!(
                "policy {} produced unusable weights {weights:?}",
                self.policy.name()
            )));
        }
        let config = Arc::new(FeeConfig {
            contract: contract.clone(),
            fee,
            recipients,
            weights,
        });
        configs.insert(contract.clone(), config.clone());
        info!(
            contract = %contract,
            fee = %fee,
            recipients = config.recipients.len(),
            team_weight = weights.team,
            recipient_weight = weights.recipient,
            total_weight = weights.total,
            "fee config created"
        );
        Ok(config)
    }

    pub fn get(&self, contract: &ContractId) -> Result<Arc<FeeConfig>, LedgerError> {
        read(&self.configs)
            .get(contract)
            .cloned()
            .ok_or_else(|| LedgerError::NotConfigured {
                contract: contract.clone(),
            })
    }

    pub fn contracts(&self) -> Vec<ContractId> {
        read(&self.configs).keys().cloned().collect()
    }
}
