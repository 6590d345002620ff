// Maps raw relayer, contract and wallet failures onto a closed error taxonomy
use serde::Serialize;

use crate::primitives::{CapabilityError, WithdrawError};

pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again.";
pub const USER_CANCELLED_MESSAGE: &str = "The request was cancelled in your wallet.";

/// Known privacy pool contract errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PoolError {
    InvalidProof,
    InvalidCommitment,
    InvalidProcessooor,
    InvalidTreeDepth,
    InvalidDepositValue,
    ScopeMismatch,
    ContextMismatch,
    UnknownStateRoot,
    IncorrectAspRoot,
    OnlyOriginalDepositor,
}

impl PoolError {
    pub const ALL: [PoolError; 10] = [
        PoolError::InvalidProof,
        PoolError::InvalidCommitment,
        PoolError::InvalidProcessooor,
        PoolError::InvalidTreeDepth,
        PoolError::InvalidDepositValue,
        PoolError::ScopeMismatch,
        PoolError::ContextMismatch,
        PoolError::UnknownStateRoot,
        PoolError::IncorrectAspRoot,
        PoolError::OnlyOriginalDepositor,
    ];

    /// Solidity custom error name as it appears in revert data
    pub fn selector_name(&self) -> &'static str {
        match self {
            PoolError::InvalidProof => "InvalidProof",
            PoolError::InvalidCommitment => "InvalidCommitment",
            PoolError::InvalidProcessooor => "InvalidProcessooor",
            PoolError::InvalidTreeDepth => "InvalidTreeDepth",
            PoolError::InvalidDepositValue => "InvalidDepositValue",
            PoolError::ScopeMismatch => "ScopeMismatch",
            PoolError::ContextMismatch => "ContextMismatch",
            PoolError::UnknownStateRoot => "UnknownStateRoot",
            PoolError::IncorrectAspRoot => "IncorrectASPRoot",
            PoolError::OnlyOriginalDepositor => "OnlyOriginalDepositor",
        }
    }

    /// Revert string in the form relayers report it, e.g. `Error: InvalidProof()`
    pub fn revert_string(&self) -> String {
        format!("Error: {}()", self.selector_name())
    }

    pub fn from_selector_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.selector_name() == name)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            PoolError::InvalidProof => {
                "Failed to verify withdrawal proof. Please regenerate your proof and try again."
            }
            PoolError::InvalidCommitment => {
                "The commitment you are trying to spend does not exist. Please check your transaction history."
            }
            PoolError::InvalidProcessooor => {
                "You are not authorized to perform this withdrawal operation."
            }
            PoolError::InvalidTreeDepth => {
                "Invalid tree depth provided. Please refresh and try again, contact support if error persists."
            }
            PoolError::InvalidDepositValue => {
                "The deposit amount is invalid. Maximum allowed value exceeded."
            }
            PoolError::ScopeMismatch => {
                "Invalid scope provided for this privacy pool. Please refresh and try again, contact support if error persists."
            }
            PoolError::ContextMismatch => {
                "Invalid context provided for this pool and withdrawal. Please refresh and try again, contact support if error persists."
            }
            PoolError::UnknownStateRoot => {
                "The state root is unknown or outdated. Please refresh and try again, contact support if error persists."
            }
            PoolError::IncorrectAspRoot => {
                "The ASP root is unknown or outdated. Please refresh and try again, contact support if error persists."
            }
            PoolError::OnlyOriginalDepositor => {
                "Only the original depositor can ragequit from this commitment."
            }
        }
    }
}

/// Failure taxonomy used for telemetry and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputIneligible,
    UserCancelled,
    RelayerRejected,
    OnChainReverted,
    ProofVerificationFailed,
    Timeout,
    Unclassified,
}

impl FailureKind {
    /// Whether failures of this kind are forwarded to telemetry
    pub fn is_reportable(&self) -> bool {
        !matches!(self, FailureKind::InputIneligible | FailureKind::UserCancelled)
    }
}

/// Find a known pool error in a raw relayer or revert message.
///
/// Tries the canonical `Error: Name()` form first, then any bare `Name()`
/// call in the message.
pub fn classify_revert(message: &str) -> Option<PoolError> {
    if let Some(known) = PoolError::ALL
        .iter()
        .copied()
        .find(|e| message.contains(&e.revert_string()))
    {
        return Some(known);
    }

    first_call_name(message).and_then(PoolError::from_selector_name)
}

/// First `identifier()` occurrence in the message
fn first_call_name(message: &str) -> Option<&str> {
    let idx = message.find("()")?;
    let head = &message[..idx];
    let start = head
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let name = &head[start..];
    (!name.is_empty()).then_some(name)
}

/// User-facing message for a raw relayer/contract error string
pub fn revert_user_message(message: &str) -> &'static str {
    classify_revert(message)
        .map(|e| e.user_message())
        .unwrap_or(GENERIC_ERROR_MESSAGE)
}

const USER_BEHAVIOUR_CODES: [i64; 5] = [4001, 4100, 4200, -32002, -32003];

const USER_BEHAVIOUR_MESSAGES: [&str; 11] = [
    "User rejected the request",
    "User denied",
    "User cancelled",
    "Pop up window failed to open",
    "provider is not defined",
    "No Ethereum provider found",
    "Connection timeout",
    "Request timeout",
    "Transaction cancelled",
    "Chain switching failed",
    "this.provider.disconnect is not a function",
];

/// Wallet interaction failures caused by user behaviour rather than bugs.
/// These are shown to the user but kept out of failure telemetry.
pub fn is_user_behaviour(error: &CapabilityError) -> bool {
    if error.code.map_or(false, |c| USER_BEHAVIOUR_CODES.contains(&c)) {
        return true;
    }
    if error.name.as_deref() == Some("UserRejectedRequestError") {
        return true;
    }
    USER_BEHAVIOUR_MESSAGES
        .iter()
        .any(|m| error.message.contains(m))
}

/// Classify a raw capability failure
pub fn classify_capability(error: &CapabilityError) -> FailureKind {
    if is_user_behaviour(error) {
        return FailureKind::UserCancelled;
    }
    if error.revert.is_some() || classify_revert(error.summary()).is_some() {
        return FailureKind::OnChainReverted;
    }
    FailureKind::Unclassified
}

impl WithdrawError {
    pub fn kind(&self) -> FailureKind {
        match self {
            WithdrawError::MissingData(_) | WithdrawError::InvalidInput(_) => {
                FailureKind::InputIneligible
            }
            WithdrawError::Capability { source, .. } => classify_capability(source),
            WithdrawError::RelayerRejected { .. } => FailureKind::RelayerRejected,
            WithdrawError::Reverted { .. } => FailureKind::OnChainReverted,
            WithdrawError::ProofVerificationFailed => FailureKind::ProofVerificationFailed,
            WithdrawError::ReceiptTimeout { .. } => FailureKind::Timeout,
            WithdrawError::ReceiptNotFound(_)
            | WithdrawError::EventNotFound(_)
            | WithdrawError::InvalidResponse(_)
            | WithdrawError::InsufficientBalance { .. }
            | WithdrawError::Config(_)
            | WithdrawError::Serialization(_) => FailureKind::Unclassified,
        }
    }

    /// Single condensed message suitable for a notification
    pub fn user_message(&self) -> String {
        match self {
            WithdrawError::MissingData(_) | WithdrawError::InvalidInput(_) => self.to_string(),
            WithdrawError::Capability { source, .. } => {
                if is_user_behaviour(source) {
                    return USER_CANCELLED_MESSAGE.to_string();
                }
                revert_user_message(source.summary()).to_string()
            }
            WithdrawError::RelayerRejected { message, .. } => message.clone(),
            WithdrawError::Reverted { message, .. } => message.clone(),
            WithdrawError::ProofVerificationFailed => PoolError::InvalidProof.user_message().to_string(),
            WithdrawError::ReceiptTimeout { .. } => {
                "The transaction was not confirmed in time. Please check the explorer and try again.".to_string()
            }
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::TxHash;

    #[test]
    fn test_known_revert_strings_map_to_messages() {
        assert_eq!(
            revert_user_message("Error: InvalidProof()"),
            "Failed to verify withdrawal proof. Please regenerate your proof and try again."
        );
        assert_eq!(
            classify_revert("execution reverted: Error: IncorrectASPRoot()"),
            Some(PoolError::IncorrectAspRoot)
        );
        for error in PoolError::ALL {
            assert_eq!(classify_revert(&error.revert_string()), Some(error));
        }
        println!("✅ Known pool errors classified");
    }

    #[test]
    fn test_bare_function_name_is_recognised() {
        assert_eq!(
            classify_revert("reverted with custom error ScopeMismatch()"),
            Some(PoolError::ScopeMismatch)
        );
        assert_eq!(classify_revert("reverted: SomethingElse()"), None);
    }

    #[test]
    fn test_unknown_message_falls_back_to_generic() {
        assert_eq!(revert_user_message("nonce too low"), GENERIC_ERROR_MESSAGE);
        assert_eq!(revert_user_message(""), GENERIC_ERROR_MESSAGE);
        assert_eq!(revert_user_message("()"), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_wallet_user_behaviour_detection() {
        assert!(is_user_behaviour(&CapabilityError::new("denied").with_code(4001)));
        assert!(is_user_behaviour(&CapabilityError::new("x").with_code(-32002)));
        assert!(is_user_behaviour(
            &CapabilityError::new("oops").with_name("UserRejectedRequestError")
        ));
        assert!(is_user_behaviour(&CapabilityError::new(
            "MetaMask Tx Signature: User denied transaction signature."
        )));
        assert!(is_user_behaviour(&CapabilityError::new("Pop up window failed to open")));
        assert!(!is_user_behaviour(&CapabilityError::new("insufficient funds for gas")));
    }

    #[test]
    fn test_error_kinds() {
        let cancelled = WithdrawError::capability(
            "switch chain",
            CapabilityError::new("User rejected the request."),
        );
        assert_eq!(cancelled.kind(), FailureKind::UserCancelled);
        assert!(!cancelled.kind().is_reportable());
        assert_eq!(cancelled.user_message(), USER_CANCELLED_MESSAGE);

        let reverted = WithdrawError::capability(
            "simulate ragequit",
            CapabilityError::new("simulation failed").with_revert("Error: OnlyOriginalDepositor()"),
        );
        assert_eq!(reverted.kind(), FailureKind::OnChainReverted);
        assert_eq!(
            reverted.user_message(),
            "Only the original depositor can ragequit from this commitment."
        );

        let contract = WithdrawError::Reverted {
            message: PoolError::ScopeMismatch.user_message().to_string(),
            raw: "Error: ScopeMismatch()".to_string(),
        };
        assert_eq!(contract.kind(), FailureKind::OnChainReverted);
        assert_eq!(contract.user_message(), PoolError::ScopeMismatch.user_message());

        let timeout = WithdrawError::ReceiptTimeout { tx_hash: TxHash::repeat_byte(1), timeout_secs: 300 };
        assert_eq!(timeout.kind(), FailureKind::Timeout);
        assert!(timeout.kind().is_reportable());

        assert_eq!(WithdrawError::MissingData("proof".into()).kind(), FailureKind::InputIneligible);
        assert_eq!(WithdrawError::ProofVerificationFailed.kind(), FailureKind::ProofVerificationFailed);
        assert_eq!(
            WithdrawError::capability("relay", CapabilityError::new("socket hang up")).kind(),
            FailureKind::Unclassified
        );
    }
}
