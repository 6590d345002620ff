// Relayed withdrawal: submit, wait for the receipt, decode and record
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{AccountLedger, ExecutionSettings, WithdrawalEntry};
use crate::chain::{PoolChain, Receipt, WalletClient};
use crate::classifier::revert_user_message;
use crate::config::PoolInfo;
use crate::primitives::{random_tx_hash, Address, BlockNumber, Result, TxHash, WithdrawError, U256};
use crate::proof::orchestrator::scope_for;
use crate::proof::{Commitment, PoolAccount, PreparedWithdrawal};
use crate::relayer::{FeeCommitment, RelayRequest, RelayerClient};
use crate::telemetry::{context, report_failure, Breadcrumb, Notifier, Operation, TelemetrySink};

/// Inputs for a relayed withdrawal, collected from the session
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub pool_account: Option<PoolAccount>,
    /// Verified proof, withdrawal request and change secrets
    pub prepared: Option<PreparedWithdrawal>,
    pub recipient: Option<Address>,
    pub relayer_address: Option<Address>,
    pub fee_commitment: Option<FeeCommitment>,
}

impl ExecutionRequest {
    pub fn commitment(&self) -> Option<&Commitment> {
        self.pool_account.as_ref()?.commitment()
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.prepared.is_none() {
            missing.push("proof");
        }
        if self.commitment().is_none() {
            missing.push("commitment");
        }
        if self.recipient.is_none() {
            missing.push("recipient");
        }
        if self.relayer_address.is_none() {
            missing.push("relayer address");
        }
        if self.fee_commitment.is_none() {
            missing.push("fee commitment");
        }
        missing
    }

    fn presence(&self) -> Map<String, Value> {
        let prepared = self.prepared.is_some();
        context([
            ("has_proof", json!(prepared)),
            ("has_withdrawal", json!(prepared)),
            ("has_new_secret_keys", json!(prepared)),
            ("has_pool_account", json!(self.pool_account.is_some())),
            ("has_commitment", json!(self.commitment().is_some())),
            ("has_fee_commitment", json!(self.fee_commitment.is_some())),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalOutcome {
    pub tx_hash: TxHash,
    /// `None` for faked transactions
    pub block_number: Option<BlockNumber>,
    pub withdrawn: Option<U256>,
    pub entry: Option<WithdrawalEntry>,
}

/// Step of the current operation, and what is known so far, for failure reports
pub(crate) struct Attempt {
    pub step: &'static str,
    pub context: Map<String, Value>,
}

impl Attempt {
    pub fn new(step: &'static str, context: Map<String, Value>) -> Self {
        Self { step, context }
    }
}

pub struct WithdrawalExecutor {
    pub(crate) relayer: Arc<dyn RelayerClient>,
    pub(crate) chain: Arc<dyn PoolChain>,
    pub(crate) wallet: Arc<dyn WalletClient>,
    pub(crate) ledger: Arc<dyn AccountLedger>,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) settings: ExecutionSettings,
}

impl WithdrawalExecutor {
    pub fn new(
        relayer: Arc<dyn RelayerClient>,
        chain: Arc<dyn PoolChain>,
        wallet: Arc<dyn WalletClient>,
        ledger: Arc<dyn AccountLedger>,
        telemetry: Arc<dyn TelemetrySink>,
        notifier: Arc<dyn Notifier>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            relayer,
            chain,
            wallet,
            ledger,
            telemetry,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> ExecutionSettings {
        self.settings
    }

    /// Submit a prepared withdrawal through the relayer and record the
    /// resulting change note. Failures are reported and notified once.
    pub async fn withdraw(&self, pool: &PoolInfo, request: &ExecutionRequest) -> Result<WithdrawalOutcome> {
        let mut attempt = Attempt::new("withdrawal_execution", request.presence());

        let result = if self.settings.test_mode {
            self.fake_withdrawal(request).await
        } else {
            self.execute_withdrawal(pool, request, &mut attempt).await
        };

        if let Err(err) = &result {
            self.report(Operation::Withdraw, pool, &attempt, err);
        }
        result
    }

    async fn execute_withdrawal(
        &self,
        pool: &PoolInfo,
        request: &ExecutionRequest,
        attempt: &mut Attempt,
    ) -> Result<WithdrawalOutcome> {
        let missing = request.missing();
        if !missing.is_empty() {
            return Err(WithdrawError::MissingData(missing.join(", ")));
        }
        let (Some(account), Some(commitment), Some(prepared), Some(recipient), Some(relayer), Some(fee_commitment)) = (
            request.pool_account.as_ref(),
            request.commitment(),
            request.prepared.as_ref(),
            request.recipient,
            request.relayer_address,
            request.fee_commitment.as_ref(),
        ) else {
            return Err(WithdrawError::MissingData("withdrawal inputs".into()));
        };

        if prepared.withdrawal.recipient != recipient || prepared.withdrawal.fee_recipient != relayer {
            return Err(WithdrawError::InvalidInput(
                "proof was generated for a different recipient or relayer".into(),
            ));
        }

        self.wallet
            .switch_chain(pool.chain_id)
            .await
            .map_err(|e| WithdrawError::capability("switch chain", e))?;

        let scope = self
            .chain
            .scope(pool.address)
            .await
            .map_err(|e| WithdrawError::capability("read pool scope", e))?;
        attempt.context.insert("pool_scope".into(), json!(scope.to_decimal()));

        let relay = RelayRequest {
            withdrawal: prepared.withdrawal.clone(),
            proof: prepared.bundle.proof.clone(),
            public_signals: prepared.bundle.public_signals.clone(),
            scope: scope.to_decimal(),
            chain_id: pool.chain_id,
            fee_commitment: fee_commitment.clone(),
        };

        attempt.step = "relayer_execution";
        info!(pool = %pool.address, chain_id = pool.chain_id, "📡 Submitting withdrawal to relayer");
        let response = self
            .relayer
            .relay(&relay)
            .await
            .map_err(|e| WithdrawError::capability("relay withdrawal", e))?;

        if !response.success {
            attempt.context.insert("relayer_error".into(), json!(response.error));
            attempt.context.insert("relayer_success".into(), json!(false));
            return Err(WithdrawError::RelayerRejected {
                message: revert_user_message(response.error.as_deref().unwrap_or_default()).to_string(),
                raw: response.error,
            });
        }
        attempt.step = "withdrawal_execution";

        let tx_hash: TxHash = response
            .tx_hash
            .as_deref()
            .ok_or_else(|| WithdrawError::InvalidResponse("relay response does not have tx hash".into()))?
            .parse::<TxHash>()
            .map_err(|e| WithdrawError::InvalidResponse(format!("malformed tx hash: {}", e)))?;
        info!(%tx_hash, "⏳ Withdrawal relayed, waiting for confirmation");

        let receipt = self.await_receipt(tx_hash).await?;
        let event = receipt
            .withdrawn()
            .ok_or_else(|| WithdrawError::EventNotFound("Withdrawn".into()))?;
        debug!(new_commitment = %event.new_commitment, spent_nullifier = %event.spent_nullifier,
            "Decoded Withdrawn event");

        let remaining = account
            .balance
            .checked_sub(event.value)
            .ok_or(WithdrawError::InsufficientBalance {
                balance: account.balance,
                value: event.value,
            })?;

        let entry = WithdrawalEntry {
            parent_commitment: commitment.clone(),
            value: remaining,
            secrets: prepared.secrets.clone(),
            block_number: receipt.block_number,
            tx_hash,
        };
        self.ledger.add_withdrawal(entry.clone()).await?;

        self.telemetry.breadcrumb(&Breadcrumb {
            operation: Operation::Withdraw,
            message: "Withdrawal successful".to_string(),
            data: context([
                ("transaction_hash", json!(tx_hash.to_string())),
                ("block_number", json!(receipt.block_number.to_string())),
                ("value", json!(event.value.to_string())),
            ]),
        });
        info!(%tx_hash, block = receipt.block_number, value = %event.value, remaining = %remaining,
            "✅ Withdrawal confirmed");

        Ok(WithdrawalOutcome {
            tx_hash,
            block_number: Some(receipt.block_number),
            withdrawn: Some(event.value),
            entry: Some(entry),
        })
    }

    async fn fake_withdrawal(&self, request: &ExecutionRequest) -> Result<WithdrawalOutcome> {
        if request.commitment().is_none() {
            return Err(WithdrawError::MissingData("commitment".into()));
        }
        let tx_hash = random_tx_hash();
        info!(%tx_hash, "🧪 Test mode: faking withdrawal transaction");
        tokio::time::sleep(self.settings.mock_delay).await;

        Ok(WithdrawalOutcome {
            tx_hash,
            block_number: None,
            withdrawn: None,
            entry: None,
        })
    }

    /// Wait for the receipt under the configured bound
    pub(crate) async fn await_receipt(&self, tx_hash: TxHash) -> Result<Receipt> {
        let timeout = self.settings.receipt_timeout;
        match tokio::time::timeout(timeout, self.chain.wait_for_receipt(tx_hash)).await {
            Err(_) => Err(WithdrawError::ReceiptTimeout {
                tx_hash,
                timeout_secs: timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(WithdrawError::capability("wait for receipt", e)),
            Ok(Ok(None)) => Err(WithdrawError::ReceiptNotFound(tx_hash)),
            Ok(Ok(Some(receipt))) => Ok(receipt),
        }
    }

    pub(crate) fn report(&self, operation: Operation, pool: &PoolInfo, attempt: &Attempt, err: &WithdrawError) {
        let mut scope = scope_for(operation, pool);
        scope.test_mode = self.settings.test_mode;
        report_failure(
            self.telemetry.as_ref(),
            self.notifier.as_ref(),
            &scope,
            attempt.step,
            err,
            attempt.context.clone(),
        );
    }
}
