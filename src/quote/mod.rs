// Fee quote lifecycle: parameter throttling, fetching, countdown and expiry
pub mod lifecycle;
pub mod throttle;

pub use lifecycle::*;
pub use throttle::*;

use serde::{Deserialize, Serialize};

use crate::primitives::{parse_address, Address, ChainId, U256};
use crate::relayer::{FeeCommitment, QuoteRequest};

/// Quote as seen by readers. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteState {
    pub quote_commitment: Option<FeeCommitment>,
    pub fee_bps: Option<u32>,
    pub base_fee_bps: Option<u32>,
    pub extra_gas_amount_eth: Option<String>,
    pub extra_gas: bool,
    /// Whole seconds left before the commitment expires
    pub countdown: u64,
    pub is_expired: bool,
}

impl QuoteState {
    pub fn empty(extra_gas: bool) -> Self {
        Self {
            extra_gas,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.quote_commitment.is_some() && self.countdown > 0 && !self.is_expired
    }

    pub fn signed_commitment(&self) -> Option<&str> {
        self.quote_commitment
            .as_ref()
            .map(|c| c.signed_relayer_commitment.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuotePhase {
    Idle,
    Fetching,
    Valid,
    Expired,
}

/// Stable snapshot of the user's withdrawal inputs that drive quoting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteParameters {
    pub chain_id: Option<ChainId>,
    /// Withdrawal amount in base units
    pub amount: U256,
    pub asset: Option<Address>,
    /// Raw recipient as typed; must parse as an address
    pub recipient: String,
    /// Address of the selected relayer
    pub relayer: Option<Address>,
    pub extra_gas: bool,
}

impl QuoteParameters {
    pub fn recipient_address(&self) -> Option<Address> {
        if self.recipient.is_empty() {
            return None;
        }
        parse_address(&self.recipient).ok()
    }

    pub fn can_request_quote(&self) -> bool {
        !self.amount.is_zero()
            && self.recipient_address().is_some()
            && self.relayer.is_some()
            && self.asset.is_some()
            && self.chain_id.is_some()
    }

    /// Equal in everything that invalidates an existing quote
    pub fn same_target(&self, other: &QuoteParameters) -> bool {
        self.chain_id == other.chain_id
            && self.amount == other.amount
            && self.asset == other.asset
            && self.recipient == other.recipient
            && self.relayer == other.relayer
    }

    pub fn to_request(&self) -> Option<QuoteRequest> {
        if !self.can_request_quote() {
            return None;
        }
        Some(QuoteRequest {
            chain_id: self.chain_id?,
            amount: self.amount.to_string(),
            asset: self.asset?,
            recipient: self.recipient_address()?,
            extra_gas: self.extra_gas,
        })
    }
}
