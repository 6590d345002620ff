// Chain reader and wallet capabilities, receipts and pool events
use serde::{Deserialize, Serialize};

use crate::primitives::{Address, BlockNumber, CapabilityError, ChainId, FieldElement, TxHash, U256};
use crate::proof::ProofBundle;

/// Events emitted by the privacy pool contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolEvent {
    Withdrawn {
        processooor: Address,
        value: U256,
        spent_nullifier: FieldElement,
        new_commitment: FieldElement,
    },
    Ragequit {
        sender: Address,
        commitment: FieldElement,
        label: FieldElement,
        value: U256,
    },
    Deposited {
        depositor: Address,
        commitment: FieldElement,
        label: FieldElement,
        value: U256,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawnEvent {
    pub processooor: Address,
    pub value: U256,
    pub spent_nullifier: FieldElement,
    pub new_commitment: FieldElement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagequitEvent {
    pub sender: Address,
    pub commitment: FieldElement,
    pub label: FieldElement,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    pub events: Vec<PoolEvent>,
}

impl Receipt {
    /// First `Withdrawn` event in the receipt
    pub fn withdrawn(&self) -> Option<WithdrawnEvent> {
        self.events.iter().find_map(|event| match event {
            PoolEvent::Withdrawn {
                processooor,
                value,
                spent_nullifier,
                new_commitment,
            } => Some(WithdrawnEvent {
                processooor: *processooor,
                value: *value,
                spent_nullifier: *spent_nullifier,
                new_commitment: *new_commitment,
            }),
            _ => None,
        })
    }

    /// First `Ragequit` event in the receipt
    pub fn ragequit(&self) -> Option<RagequitEvent> {
        self.events.iter().find_map(|event| match event {
            PoolEvent::Ragequit {
                sender,
                commitment,
                label,
                value,
            } => Some(RagequitEvent {
                sender: *sender,
                commitment: *commitment,
                label: *label,
                value: *value,
            }),
            _ => None,
        })
    }
}

/// Simulated ragequit call ready to be signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagequitCall {
    pub pool: Address,
    pub bundle: ProofBundle,
}

/// Read access to the pool contract and transaction receipts
#[async_trait::async_trait]
pub trait PoolChain: Send + Sync {
    async fn scope(&self, pool: Address) -> Result<FieldElement, CapabilityError>;

    /// Wait until the transaction is mined; `None` if the node has no receipt
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, CapabilityError>;

    /// Dry-run `ragequit`; revert reasons come back in [`CapabilityError::revert`]
    async fn simulate_ragequit(
        &self,
        pool: Address,
        bundle: &ProofBundle,
    ) -> Result<RagequitCall, CapabilityError>;
}

/// Connected wallet
#[async_trait::async_trait]
pub trait WalletClient: Send + Sync {
    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), CapabilityError>;

    async fn send_ragequit(&self, call: &RagequitCall) -> Result<TxHash, CapabilityError>;

    fn address(&self) -> Option<Address>;
}
