//! Weight policies mapping `(fee, recipient count)` to a conserving weight triple.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::contracts::FeePercentage;
use crate::error::LedgerError;
use crate::ledger::{Amount, Balance};

/// Basis shared by every contract under [`FixedBasisPolicy`].
pub const FIXED_BASIS: u128 = 10_000;

/// `(team, recipient, total)` weights of a contract, fixed at configuration time.
///
/// A conserving triple satisfies `team + recipient * n == total` where `n` is
/// the number of recipients the weights were computed for. `recipient` must
/// fit in a `u64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeWeights {
    pub team: u128,
    pub recipient: u128,
    pub total: u128,
}

/// Result of splitting one payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub team: Balance,
    pub per_recipient: Balance,
}

impl FeeWeights {
    pub fn is_conserving(&self, recipients: usize) -> bool {
        if self.total == 0 || u64::try_from(self.recipient).is_err() {
            return false;
        }
        self.recipient
            .checked_mul(recipients as u128)
            .and_then(|pool| pool.checked_add(self.team))
            .map_or(false, |sum| sum == self.total)
    }

    /// The team share is strictly below one half.
    pub fn is_below_cap(&self) -> bool {
        self.team.checked_mul(2).map_or(false, |team| team < self.total)
    }

    /// Split `amount` between the team and `recipients` equal shares.
    ///
    /// Recipient shares are floored; the team takes whatever is left, so the
    /// outputs always add up to exactly `amount`.
    pub fn split(&self, amount: Amount, recipients: usize) -> PaymentSplit {
        let amount = Balance::from(amount);
        let (total, weight) = (self.total, self.recipient);
        // floor(a * w / t); a % t and w both fit in u64
        let per_recipient = (amount / total) * weight + (amount % total) * weight / total;
        let pool = per_recipient * recipients as Balance;
        PaymentSplit {
            team: amount - pool,
            per_recipient,
        }
    }
}

/// Pluggable policy `F(fee, recipients) -> FeeWeights`.
pub trait WeightPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn weights(&self, fee: FeePercentage, recipients: usize) -> FeeWeights;
}

/// The team receives exactly `fee` of each payment. The basis is the fee
/// denominator times the recipient count, so every weight is a whole number.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactSharePolicy;

impl WeightPolicy for ExactSharePolicy {
    fn name(&self) -> &'static str {
        "exact_share"
    }

    fn weights(&self, fee: FeePercentage, recipients: usize) -> FeeWeights {
        let n = recipients as u128;
        let num = u128::from(fee.numerator());
        let den = u128::from(fee.denominator());
        FeeWeights {
            team: num * n,
            recipient: den - num,
            total: den * n,
        }
    }
}

/// Fixed [`FIXED_BASIS`] for every contract. Recipient weights are floored and
/// the division dust is added to the team weight.
///
/// When the dust would lift the team share to one half or more (large
/// recipient counts, fees close to the cap) the contract gets
/// [`ExactSharePolicy`] weights instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedBasisPolicy;

impl WeightPolicy for FixedBasisPolicy {
    fn name(&self) -> &'static str {
        "fixed_basis"
    }

    fn weights(&self, fee: FeePercentage, recipients: usize) -> FeeWeights {
        let n = recipients.max(1) as u128;
        let num = u128::from(fee.numerator());
        let den = u128::from(fee.denominator());
        // floor(basis * (1 - fee) / n)
        let recipient = FIXED_BASIS * (den - num) / (den * n);
        let team = FIXED_BASIS - recipient * n;
        if team * 2 >= FIXED_BASIS {
            return ExactSharePolicy.weights(fee, recipients);
        }
        FeeWeights {
            team,
            recipient,
            total: FIXED_BASIS,
        }
    }
}

/// Policy selector used by configuration files and the CLI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    ExactShare,
    FixedBasis,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn WeightPolicy> {
        match self {
            PolicyKind::ExactShare => Box::new(ExactSharePolicy),
            PolicyKind::FixedBasis => Box::new(FixedBasisPolicy),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "exact_share" | "exact-share" => Ok(PolicyKind::ExactShare),
            "fixed_basis" | "fixed-basis" => Ok(PolicyKind::FixedBasis),
            other => Err(LedgerError::Config(format!("unknown weight policy {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fee(bps: u32) -> FeePercentage {
        FeePercentage::from_bps(bps).unwrap()
    }

    fn share(w: FeeWeights) -> f64 {
        w.team as f64 / w.total as f64
    }

    #[test]
    fn both_policies_conserve_for_every_count() {
        let policies: [Box<dyn WeightPolicy>; 2] =
            [Box::new(ExactSharePolicy), Box::new(FixedBasisPolicy)];
        let counts = (1..=13).chain([5_000, 5_001, 6_000, 9_999, 10_000, 100_000]);
        for policy in &policies {
            for n in counts.clone() {
                for bps in [0, 1, 250, 3_333, 4_999] {
                    let w = policy.weights(fee(bps), n);
                    assert!(w.is_conserving(n), "{} bps={bps} n={n}", policy.name());
                    assert!(w.is_below_cap(), "{} bps={bps} n={n}: {w:?}", policy.name());
                    assert!(w.recipient > 0, "{} bps={bps} n={n}", policy.name());
                }
            }
        }
    }

    #[test]
    fn fixed_basis_falls_back_when_dust_breaks_the_cap() {
        let w = FixedBasisPolicy.weights(fee(4_999), 6_000);
        assert_eq!(w, ExactSharePolicy.weights(fee(4_999), 6_000));
        assert_eq!(w.recipient, 5_001);
        // 5_001 / 7 = 714 rem 3 would leave the team 5_002 of 10_000
        assert_eq!(FixedBasisPolicy.weights(fee(4_999), 7).total, 70_000);
        // still on the fixed basis when the dust stays under the cap
        assert_eq!(FixedBasisPolicy.weights(fee(4_999), 3).total, FIXED_BASIS);
    }

    #[test]
    fn team_weight_is_monotone_in_fee() {
        for n in [1usize, 3, 7, 5_001, 6_000] {
            let mut last_exact = 0f64;
            let mut last_fixed = 0f64;
            for bps in (0..5_000).step_by(97).chain([4_998, 4_999]) {
                let e_share = share(ExactSharePolicy.weights(fee(bps), n));
                let f_share = share(FixedBasisPolicy.weights(fee(bps), n));
                assert!(e_share >= last_exact, "n={n} bps={bps}");
                assert!(f_share >= last_fixed, "n={n} bps={bps}");
                last_exact = e_share;
                last_fixed = f_share;
            }
        }
    }

    #[test]
    fn exact_share_team_is_the_fee() {
        // 20% is 1/5: basis 5 * 4
        let w = ExactSharePolicy.weights(fee(2_000), 4);
        assert_eq!(w, FeeWeights { team: 4, recipient: 4, total: 20 });
        let split = w.split(1_000, 4);
        assert_eq!(split.team, 200);
        assert_eq!(split.per_recipient, 200);
    }

    #[test]
    fn exact_share_handles_fine_fractions() {
        let fee: FeePercentage = "0.4999999999999999999".parse().unwrap();
        let w = ExactSharePolicy.weights(fee, 3);
        assert!(w.is_conserving(3));
        let split = w.split(u64::MAX, 3);
        assert_eq!(split.team + split.per_recipient * 3, u64::MAX as u128);
        assert_eq!(split.per_recipient, (u64::MAX as u128) * w.recipient / w.total);
    }

    #[test]
    fn fixed_basis_pushes_dust_to_team() {
        let w = FixedBasisPolicy.weights(fee(1_000), 7);
        // 9_000 / 7 = 1_285 rem 5
        assert_eq!(w.recipient, 1_285);
        assert_eq!(w.team, 1_005);
        assert_eq!(w.total, 10_000);
    }

    #[test]
    fn split_never_exceeds_amount() {
        let w = FixedBasisPolicy.weights(fee(4_999), 3);
        for amount in [0u64, 1, 2, 3, 999, 10_001, u32::MAX as u64, u64::MAX] {
            let s = w.split(amount, 3);
            assert_eq!(s.team + s.per_recipient * 3, amount as u128);
        }
    }

    #[test]
    fn policy_kind_parses() {
        assert_eq!("fixed-basis".parse::<PolicyKind>().unwrap(), PolicyKind::FixedBasis);
        assert_eq!("exact_share".parse::<PolicyKind>().unwrap(), PolicyKind::ExactShare);
        assert!("nope".parse::<PolicyKind>().is_err());
    }
}
