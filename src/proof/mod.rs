// Withdrawal proof inputs, outputs and the proving capabilities
pub mod orchestrator;

pub use orchestrator::*;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::primitives::{hash_json, Address, CapabilityError, FieldElement, Result, U256};

/// Groth16 proof in snarkjs layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnarkProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    pub protocol: String,
    pub curve: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub proof: SnarkProof,
    pub public_signals: Vec<String>,
}

/// Withdrawal request bound into the proof context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    /// Entry point allowed to process the withdrawal
    pub processooor: Address,
    pub recipient: Address,
    pub fee_recipient: Address,
    pub relay_fee_bps: u32,
}

impl Withdrawal {
    pub fn new(recipient: Address, entry_point: Address, relayer: Address, fee_bps: u32) -> Self {
        Self {
            processooor: entry_point,
            recipient,
            fee_recipient: relayer,
            relay_fee_bps: fee_bps,
        }
    }
}

/// Spendable note of a pool account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub hash: FieldElement,
    pub label: FieldElement,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAccount {
    pub balance: U256,
    pub last_commitment: Option<Commitment>,
}

impl PoolAccount {
    pub fn commitment(&self) -> Option<&Commitment> {
        self.last_commitment.as_ref()
    }
}

/// Merkle proof as returned by the prover. The index may be unusable
/// (`None` or negative) when the backend could not place the leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMerkleProof {
    pub index: Option<i64>,
    pub siblings: Vec<FieldElement>,
    pub root: FieldElement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: u64,
    pub siblings: Vec<FieldElement>,
    pub root: FieldElement,
}

impl RawMerkleProof {
    /// Replace an unusable leaf index with 0 before it reaches proof input
    pub fn normalize(self, tree: &str) -> MerkleProof {
        let index = match self.index {
            Some(index) if index >= 0 => index as u64,
            other => {
                warn!(tree, index = ?other, "Merkle proof returned an invalid leaf index, using 0");
                0
            }
        };
        MerkleProof {
            index,
            siblings: self.siblings,
            root: self.root,
        }
    }
}

/// One-time secrets for the change commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalSecrets {
    pub secret: FieldElement,
    pub nullifier: FieldElement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalProofInput {
    pub context: FieldElement,
    pub withdrawal_amount: U256,
    pub state_merkle_proof: MerkleProof,
    pub asp_merkle_proof: MerkleProof,
    pub state_root: FieldElement,
    pub state_tree_depth: usize,
    pub asp_root: FieldElement,
    pub asp_tree_depth: usize,
    pub new_secret: FieldElement,
    pub new_nullifier: FieldElement,
}

impl WithdrawalProofInput {
    pub fn new(
        amount: U256,
        state_proof: MerkleProof,
        asp_proof: MerkleProof,
        context: FieldElement,
        secrets: &WithdrawalSecrets,
    ) -> Self {
        Self {
            context,
            withdrawal_amount: amount,
            state_root: state_proof.root,
            state_tree_depth: state_proof.siblings.len(),
            asp_root: asp_proof.root,
            asp_tree_depth: asp_proof.siblings.len(),
            state_merkle_proof: state_proof,
            asp_merkle_proof: asp_proof,
            new_secret: secrets.secret,
            new_nullifier: secrets.nullifier,
        }
    }
}

#[derive(Serialize)]
struct ContextPreimage<'a> {
    withdrawal: &'a Withdrawal,
    scope: String,
}

/// Context value binding a withdrawal request to a pool scope
pub fn withdrawal_context(withdrawal: &Withdrawal, scope: &FieldElement) -> Result<FieldElement> {
    hash_json(&ContextPreimage {
        withdrawal,
        scope: scope.to_decimal(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofPhase {
    LoadingCircuits,
    GeneratingProof,
    VerifyingProof,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProofProgress {
    pub phase: ProofPhase,
    /// 0.0 to 1.0 within the phase
    pub progress: f32,
}

pub type ProgressSender = mpsc::UnboundedSender<ProofProgress>;

/// Verified proof together with the request and secrets it was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWithdrawal {
    pub bundle: ProofBundle,
    pub withdrawal: Withdrawal,
    pub secrets: WithdrawalSecrets,
}

/// Builds merkle inclusion proofs over a leaf set
#[async_trait::async_trait]
pub trait MerkleProver: Send + Sync {
    async fn merkle_proof(
        &self,
        leaves: &[FieldElement],
        leaf: FieldElement,
    ) -> std::result::Result<RawMerkleProof, CapabilityError>;
}

/// Circuit-backed proof generation and verification
#[async_trait::async_trait]
pub trait WithdrawalProver: Send + Sync {
    /// Generate a withdrawal proof, reporting phases on `progress` if given
    async fn prove_withdrawal(
        &self,
        commitment: &Commitment,
        input: &WithdrawalProofInput,
        progress: Option<ProgressSender>,
    ) -> std::result::Result<ProofBundle, CapabilityError>;

    async fn verify_withdrawal(&self, bundle: &ProofBundle) -> std::result::Result<bool, CapabilityError>;

    async fn prove_ragequit(&self, commitment: &Commitment) -> std::result::Result<ProofBundle, CapabilityError>;

    async fn verify_ragequit(&self, bundle: &ProofBundle) -> std::result::Result<bool, CapabilityError>;
}

/// Account key material
pub trait AccountService: Send + Sync {
    fn create_withdrawal_secrets(&self, commitment: &Commitment) -> WithdrawalSecrets;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(index: Option<i64>) -> RawMerkleProof {
        RawMerkleProof {
            index,
            siblings: vec![FieldElement::from_u64(1), FieldElement::from_u64(2)],
            root: FieldElement::from_u64(99),
        }
    }

    #[test]
    fn test_invalid_leaf_index_normalizes_to_zero() {
        assert_eq!(raw(None).normalize("asp").index, 0);
        assert_eq!(raw(Some(-1)).normalize("asp").index, 0);
        assert_eq!(raw(Some(5)).normalize("state").index, 5);
    }

    #[test]
    fn test_context_binds_withdrawal_and_scope() {
        let withdrawal = Withdrawal::new(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            100,
        );
        let scope = FieldElement::from_u64(42);

        let a = withdrawal_context(&withdrawal, &scope).unwrap();
        assert_eq!(a, withdrawal_context(&withdrawal, &scope).unwrap());
        assert_ne!(a, withdrawal_context(&withdrawal, &FieldElement::from_u64(43)).unwrap());

        let mut other = withdrawal.clone();
        other.relay_fee_bps = 101;
        assert_ne!(a, withdrawal_context(&other, &scope).unwrap());
    }

    #[test]
    fn test_proof_input_takes_roots_from_proofs() {
        let secrets = WithdrawalSecrets {
            secret: FieldElement::from_u64(7),
            nullifier: FieldElement::from_u64(8),
        };
        let input = WithdrawalProofInput::new(
            U256::from(3),
            raw(Some(1)).normalize("state"),
            raw(None).normalize("asp"),
            FieldElement::from_u64(5),
            &secrets,
        );
        assert_eq!(input.state_root, FieldElement::from_u64(99));
        assert_eq!(input.asp_tree_depth, 2);
        assert_eq!(input.asp_merkle_proof.index, 0);
        assert_eq!(input.new_nullifier, secrets.nullifier);
    }

    #[test]
    fn test_progress_wire_format() {
        let event = ProofProgress {
            phase: ProofPhase::LoadingCircuits,
            progress: 0.5,
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["phase"], "loading_circuits");
    }
}
