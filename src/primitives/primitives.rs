// Core value types shared by quoting, proving and execution
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use super::error::{Result, WithdrawError};

pub type ChainId = u64;
pub type Timestamp = u64;
pub type BlockNumber = u64;

/// Element of the BN254 scalar field, stored big-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldElement(#[serde(with = "hex::serde")] pub [u8; 32]);

impl FieldElement {
    pub fn zero() -> Self {
        FieldElement([0u8; 32])
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_fr(Fr::from(value))
    }

    pub fn from_fr(fr: Fr) -> Self {
        let bytes = fr.into_bigint().to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        FieldElement(out)
    }

    pub fn to_fr(&self) -> Fr {
        Fr::from_be_bytes_mod_order(&self.0)
    }

    /// Parse a base-10 field element, as used for pool scopes and leaves
    pub fn from_decimal(value: &str) -> Result<Self> {
        let fr = Fr::from_str(value.trim())
            .map_err(|_| WithdrawError::InvalidInput(format!("not a field element: {}", value)))?;
        Ok(Self::from_fr(fr))
    }

    pub fn to_decimal(&self) -> String {
        let digits = self.to_fr().to_string();
        if digits.is_empty() {
            "0".to_string()
        } else {
            digits
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for FieldElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

pub use alloy_primitives::{Address, B256, U256};

/// Transaction hash as reported by relayers and receipts
pub type TxHash = B256;

/// Parse a `0x`-prefixed account address. Anything else is not well-formed.
pub fn parse_address(value: &str) -> Result<Address> {
    if !value.starts_with("0x") && !value.starts_with("0X") {
        return Err(WithdrawError::InvalidInput(format!(
            "address missing 0x prefix: {}",
            value
        )));
    }
    value
        .parse::<Address>()
        .map_err(|e| WithdrawError::InvalidInput(format!("malformed address {}: {}", value, e)))
}

pub fn random_tx_hash() -> TxHash {
    B256::from(rand::random::<[u8; 32]>())
}

/// Wall-clock source for quote expiry arithmetic
pub trait Clock: Send + Sync {
    /// Current unix time in milliseconds
    fn now_millis(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Reduce arbitrary bytes into the scalar field (SHA-256 then mod p)
pub fn hash_to_field(data: &[u8]) -> FieldElement {
    let digest = hash_data(data);
    FieldElement::from_fr(Fr::from_be_bytes_mod_order(&digest))
}

pub fn hash_json<T: Serialize>(data: &T) -> Result<FieldElement> {
    let json = serde_json::to_vec(data)?;
    Ok(hash_to_field(&json))
}
