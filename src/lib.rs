// Privacy pool withdrawal orchestration
// Fee quoting, withdrawal proof assembly and relayed/ragequit execution

pub mod primitives;
pub mod classifier;
pub mod telemetry;
pub mod config;
pub mod relayer;
pub mod chain;
pub mod quote;
pub mod proof;
pub mod withdraw;
pub mod mock;

// Re-export key types for easy access
pub use primitives::{
    primitives::*,
    error::*,
    units::*,
};

pub use classifier::{FailureKind, PoolError};
pub use config::{AppConfig, ChainConfig, PoolInfo, RelayerConfig};
pub use quote::{
    QuoteLifecycleManager, QuoteParameters, QuotePhase, QuoteState, ThrottleGate,
    QUOTE_THROTTLE_INTERVAL,
};
pub use proof::{
    Commitment, PoolAccount, PreparedWithdrawal, ProofBundle, ProofOrchestrator, ProofProgress,
    ProofRequest, ProofStrategy,
};
pub use withdraw::{
    ExecutionRequest, ExecutionSettings, MemoryLedger, RagequitRequest, WithdrawalExecutor,
    WithdrawalOutcome,
};
