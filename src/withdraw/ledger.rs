// Pool account ledger updated after confirmed withdrawals and exits
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::primitives::{Address, BlockNumber, FieldElement, Result, TxHash, U256};
use crate::proof::{Commitment, WithdrawalSecrets};

/// Change note left in the account after a partial withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEntry {
    pub parent_commitment: Commitment,
    /// Remaining balance carried by the new commitment
    pub value: U256,
    pub secrets: WithdrawalSecrets,
    pub block_number: BlockNumber,
    pub tx_hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagequitEntry {
    pub label: FieldElement,
    pub ragequitter: Address,
    pub commitment: FieldElement,
    pub value: U256,
    pub block_number: BlockNumber,
    pub tx_hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntry {
    Withdrawal(WithdrawalEntry),
    Ragequit(RagequitEntry),
}

impl LedgerEntry {
    pub fn label(&self) -> FieldElement {
        match self {
            LedgerEntry::Withdrawal(entry) => entry.parent_commitment.label,
            LedgerEntry::Ragequit(entry) => entry.label,
        }
    }

    pub fn tx_hash(&self) -> TxHash {
        match self {
            LedgerEntry::Withdrawal(entry) => entry.tx_hash,
            LedgerEntry::Ragequit(entry) => entry.tx_hash,
        }
    }
}

/// Account history store
#[async_trait::async_trait]
pub trait AccountLedger: Send + Sync {
    async fn add_withdrawal(&self, entry: WithdrawalEntry) -> Result<()>;

    async fn add_ragequit(&self, entry: RagequitEntry) -> Result<()>;
}

/// In-memory ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.read().await.clone()
    }

    /// Spendable balance of the account identified by `label`, if it has history.
    /// An exited account holds nothing.
    pub async fn balance(&self, label: &FieldElement) -> Option<U256> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .find(|entry| entry.label() == *label)
            .map(|entry| match entry {
                LedgerEntry::Withdrawal(entry) => entry.value,
                LedgerEntry::Ragequit(_) => U256::ZERO,
            })
    }
}

#[async_trait::async_trait]
impl AccountLedger for MemoryLedger {
    async fn add_withdrawal(&self, entry: WithdrawalEntry) -> Result<()> {
        self.entries.write().await.push(LedgerEntry::Withdrawal(entry));
        Ok(())
    }

    async fn add_ragequit(&self, entry: RagequitEntry) -> Result<()> {
        self.entries.write().await.push(LedgerEntry::Ragequit(entry));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment() -> Commitment {
        Commitment {
            hash: FieldElement::from_u64(1),
            label: FieldElement::from_u64(2),
            value: U256::from(10),
        }
    }

    #[tokio::test]
    async fn test_balance_follows_latest_entry() {
        let ledger = MemoryLedger::new();
        let label = commitment().label;
        assert_eq!(ledger.balance(&label).await, None);

        ledger
            .add_withdrawal(WithdrawalEntry {
                parent_commitment: commitment(),
                value: U256::from(7),
                secrets: WithdrawalSecrets {
                    secret: FieldElement::from_u64(3),
                    nullifier: FieldElement::from_u64(4),
                },
                block_number: 10,
                tx_hash: TxHash::repeat_byte(1),
            })
            .await
            .unwrap();
        assert_eq!(ledger.balance(&label).await, Some(U256::from(7)));

        ledger
            .add_ragequit(RagequitEntry {
                label,
                ragequitter: Address::repeat_byte(5),
                commitment: FieldElement::from_u64(9),
                value: U256::from(7),
                block_number: 11,
                tx_hash: TxHash::repeat_byte(2),
            })
            .await
            .unwrap();
        assert_eq!(ledger.balance(&label).await, Some(U256::ZERO));
        assert_eq!(ledger.entries().await.len(), 2);
    }
}
