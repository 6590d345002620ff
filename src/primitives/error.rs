// Error types for quoting, proving and withdrawal execution
use thiserror::Error;

use super::primitives::{TxHash, U256};

pub type Result<T> = std::result::Result<T, WithdrawError>;

/// Raw failure signal returned by an external capability
/// (relayer, wallet, chain reader, proof backend).
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    /// Provider error code, e.g. 4001 for a wallet rejection
    pub code: Option<i64>,
    /// Error class name reported by the provider
    pub name: Option<String>,
    pub message: String,
    pub short_message: Option<String>,
    /// Decoded contract revert reason, e.g. `Error: OnlyOriginalDepositor()`
    pub revert: Option<String>,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_revert(mut self, revert: impl Into<String>) -> Self {
        self.revert = Some(revert.into());
        self
    }

    /// Most specific human readable description available
    pub fn summary(&self) -> &str {
        self.revert
            .as_deref()
            .or(self.short_message.as_deref())
            .unwrap_or(&self.message)
    }
}

#[derive(Error, Debug)]
pub enum WithdrawError {
    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{operation} failed: {source}")]
    Capability {
        operation: &'static str,
        #[source]
        source: CapabilityError,
    },

    /// `message` is already the user-facing text; `raw` is what the relayer sent
    #[error("Relayer rejected request: {}", raw.as_deref().unwrap_or("Relay failed"))]
    RelayerRejected {
        message: String,
        raw: Option<String>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Transaction reverted: {message}")]
    Reverted { message: String, raw: String },

    #[error("Proof verification failed")]
    ProofVerificationFailed,

    #[error("No receipt for {tx_hash} within {timeout_secs}s")]
    ReceiptTimeout { tx_hash: TxHash, timeout_secs: u64 },

    #[error("Receipt not found for {0}")]
    ReceiptNotFound(TxHash),

    #[error("{0} event not found in receipt")]
    EventNotFound(String),

    #[error("Withdrawn value {value} exceeds balance {balance}")]
    InsufficientBalance { balance: U256, value: U256 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl WithdrawError {
    pub fn capability(operation: &'static str, source: CapabilityError) -> Self {
        WithdrawError::Capability { operation, source }
    }
}

impl From<serde_json::Error> for WithdrawError {
    fn from(err: serde_json::Error) -> Self {
        WithdrawError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WithdrawError {
    fn from(err: std::io::Error) -> Self {
        WithdrawError::Config(err.to_string())
    }
}
