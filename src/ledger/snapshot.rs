use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::team::TeamBalance;
use crate::ledger::{balance::lock, AccountId, Balance, ContractId, FeeLedger, Totals};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipientEntry {
    pub contract: ContractId,
    pub account: AccountId,
    pub available: Balance,
    pub in_flight: Balance,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberEntry {
    pub account: AccountId,
    pub available: Balance,
    pub in_flight: Balance,
}

/// Current balances only, in deterministic (key) order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub policy: String,
    pub contracts: Vec<ContractId>,
    pub recipients: Vec<RecipientEntry>,
    pub team_members: Vec<MemberEntry>,
    pub team: TeamBalance,
    pub totals: Totals,
    #[serde(with = "hex32")]
    pub merkle_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn root_hex(&self) -> String {
        hex::encode(self.merkle_root)
    }
}

impl FeeLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        let team = *lock(&self.team);
        let recipients: Vec<RecipientEntry> = self
            .recipients
            .view()
            .into_iter()
            .filter(|v| v.available + v.in_flight > 0)
            .map(|v| RecipientEntry {
                contract: v.key.0,
                account: v.key.1,
                available: v.available,
                in_flight: v.in_flight,
            })
            .collect();
        let team_members: Vec<MemberEntry> = self
            .members
            .view()
            .into_iter()
            .filter(|v| v.available + v.in_flight > 0)
            .map(|v| MemberEntry {
                account: v.key,
                available: v.available,
                in_flight: v.in_flight,
            })
            .collect();
        let merkle_root = compute_merkle_root(&recipients, &team_members, &team);
        LedgerSnapshot {
            policy: self.policy_name().to_string(),
            contracts: self.contracts(),
            recipients,
            team_members,
            team,
            totals: self.totals(),
            merkle_root,
        }
    }
}

fn compute_merkle_root(
    recipients: &[RecipientEntry],
    members: &[MemberEntry],
    team: &TeamBalance,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for entry in recipients {
        let mut hasher = Sha256::new();
        hasher.update(b"recipient");
        hasher.update((entry.contract.len() as u64).to_le_bytes());
        hasher.update(entry.contract.as_bytes());
        hasher.update(entry.account.as_bytes());
        hasher.update((entry.available + entry.in_flight).to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for entry in members {
        let mut hasher = Sha256::new();
        hasher.update(b"member");
        hasher.update(entry.account.as_bytes());
        hasher.update((entry.available + entry.in_flight).to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    let mut hasher = Sha256::new();
    hasher.update(b"team");
    hasher.update(team.total_accrued.to_le_bytes());
    hasher.update(team.unsplit.to_le_bytes());
    leaves.push(hasher.finalize().into());
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"feesplit-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex32 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| D::Error::custom(format!("expected 32 bytes, got {}", bytes.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ledger::tests::{ids, ledger_with};

    #[test]
    fn snapshot_tracks_balances_and_root() {
        let (ledger, _) = ledger_with(&["t1", "t2"]);
        let contract = "c".to_string();
        ledger.create_config_bps(&contract, 1_000, ids(&["a", "b"])).unwrap();
        let empty_root = ledger.snapshot().merkle_root;

        ledger.record_payment(&contract, 2_000).unwrap();
        let snap = ledger.snapshot();
        assert_ne!(snap.merkle_root, empty_root);
        assert_eq!(snap.merkle_root, ledger.snapshot().merkle_root);
        assert_eq!(snap.recipients.len(), 2);
        assert_eq!(snap.team.unsplit, 200);
        assert_eq!(snap.totals.received, 2_000);
        assert!(snap.team_members.is_empty());

        ledger.claim(&contract, &"a".into()).unwrap();
        ledger.split(&"t1".into()).unwrap();
        let snap = ledger.snapshot();
        assert_eq!(snap.recipients.len(), 1);
        assert_eq!(snap.recipients[0].account, "b");
        assert_eq!(snap.team_members.len(), 2);
    }

    #[test]
    fn snapshot_json_roundtrip_uses_hex_root() {
        let (ledger, _) = ledger_with(&["t"]);
        let snap = ledger.snapshot();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["merkle_root"], snap.root_hex());
        let text = serde_json::to_string(&snap).unwrap();
        let back: LedgerSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snap);
    }
}
