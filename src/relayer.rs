// Relayer wire types and the relayer capability
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::primitives::{Address, CapabilityError, ChainId, Timestamp};
use crate::proof::{SnarkProof, Withdrawal};

/// Signed, time-bound fee quote. Identifies one quote; the signed token is
/// the key for expiry deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeCommitment {
    pub signed_relayer_commitment: String,
    /// Unix time in milliseconds
    pub expiration: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub chain_id: ChainId,
    /// Base units as a decimal string
    pub amount: String,
    pub asset: Address,
    pub recipient: Address,
    pub extra_gas: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthAmount {
    pub eth: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteDetail {
    pub extra_gas_fund_amount: Option<EthAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub fee_commitment: FeeCommitment,
    #[serde(rename = "feeBPS")]
    pub fee_bps: u32,
    #[serde(rename = "baseFeeBPS")]
    pub base_fee_bps: u32,
    #[serde(default)]
    pub detail: Option<QuoteDetail>,
}

impl QuoteResponse {
    pub fn extra_gas_amount_eth(&self) -> Option<String> {
        self.detail
            .as_ref()?
            .extra_gas_fund_amount
            .as_ref()
            .map(|a| a.eth.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub withdrawal: Withdrawal,
    pub proof: SnarkProof,
    pub public_signals: Vec<String>,
    /// Decimal pool scope
    pub scope: String,
    pub chain_id: ChainId,
    pub fee_commitment: FeeCommitment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Third-party relayer: quotes fees and submits withdrawals
#[async_trait]
pub trait RelayerClient: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> std::result::Result<QuoteResponse, CapabilityError>;

    async fn relay(&self, request: &RelayRequest) -> std::result::Result<RelayResponse, CapabilityError>;
}
