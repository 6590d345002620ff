// Relay submission, confirmation and ledger update for withdrawals and exits
pub mod executor;
pub mod exit;
pub mod ledger;

pub use executor::*;
pub use exit::*;
pub use ledger::*;

use std::time::Duration;

use crate::config::AppConfig;

/// Receipt wait bound for withdrawal transactions
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSettings {
    /// Skip every network and chain call and fake a successful transaction
    pub test_mode: bool,
    pub receipt_timeout: Duration,
    /// Pause before a faked transaction is declared successful
    pub mock_delay: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            test_mode: false,
            receipt_timeout: RECEIPT_TIMEOUT,
            mock_delay: Duration::from_millis(2000),
        }
    }
}

impl From<&AppConfig> for ExecutionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            test_mode: config.test_mode,
            receipt_timeout: config.receipt_timeout(),
            mock_delay: config.mock_delay(),
        }
    }
}
