// Ragequit: the original depositor exits a commitment without relayer or ASP
use serde_json::json;
use tracing::info;

use super::executor::Attempt;
use super::{RagequitEntry, WithdrawalExecutor};
use crate::classifier::revert_user_message;
use crate::config::PoolInfo;
use crate::primitives::{random_tx_hash, BlockNumber, CapabilityError, Result, TxHash, WithdrawError};
use crate::proof::{PoolAccount, ProofBundle};
use crate::telemetry::{context, Breadcrumb, Operation};

#[derive(Debug, Clone, Default)]
pub struct RagequitRequest {
    pub pool_account: Option<PoolAccount>,
    /// Verified ragequit proof
    pub proof: Option<ProofBundle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagequitOutcome {
    pub tx_hash: TxHash,
    pub block_number: Option<BlockNumber>,
    pub entry: Option<RagequitEntry>,
}

impl WithdrawalExecutor {
    /// Exit the account's last commitment: simulate, send from the wallet,
    /// wait for the receipt and record the `Ragequit` event.
    pub async fn ragequit(&self, pool: &PoolInfo, request: &RagequitRequest) -> Result<RagequitOutcome> {
        let mut attempt = Attempt::new(
            "ragequit_execution",
            context([
                ("has_proof", json!(request.proof.is_some())),
                ("has_pool_account", json!(request.pool_account.is_some())),
                ("wallet_connected", json!(self.wallet.address().is_some())),
            ]),
        );

        let result = self.execute_ragequit(pool, request, &mut attempt).await;
        if let Err(err) = &result {
            self.report(Operation::Ragequit, pool, &attempt, err);
        }
        result
    }

    async fn execute_ragequit(
        &self,
        pool: &PoolInfo,
        request: &RagequitRequest,
        attempt: &mut Attempt,
    ) -> Result<RagequitOutcome> {
        let proof = request
            .proof
            .as_ref()
            .ok_or_else(|| WithdrawError::MissingData("ragequit proof".into()))?;
        let commitment = request
            .pool_account
            .as_ref()
            .and_then(PoolAccount::commitment)
            .ok_or_else(|| WithdrawError::MissingData("pool account commitment".into()))?;

        if self.settings.test_mode {
            let tx_hash = random_tx_hash();
            info!(%tx_hash, "🧪 Test mode: faking ragequit transaction");
            tokio::time::sleep(self.settings.mock_delay).await;
            return Ok(RagequitOutcome {
                tx_hash,
                block_number: None,
                entry: None,
            });
        }

        self.wallet
            .switch_chain(pool.chain_id)
            .await
            .map_err(|e| WithdrawError::capability("switch chain", e))?;

        attempt.step = "contract_simulation";
        attempt.context.insert("contract_function".into(), json!("ragequit"));
        let call = self
            .chain
            .simulate_ragequit(pool.address, proof)
            .await
            .map_err(simulation_error)?;

        attempt.step = "ragequit_execution";
        let tx_hash = self
            .wallet
            .send_ragequit(&call)
            .await
            .map_err(|e| WithdrawError::capability("send ragequit", e))?;
        info!(%tx_hash, label = %commitment.label, "⏳ Ragequit sent, waiting for confirmation");

        let receipt = self.await_receipt(tx_hash).await?;
        let event = receipt
            .ragequit()
            .ok_or_else(|| WithdrawError::EventNotFound("Ragequit".into()))?;

        let entry = RagequitEntry {
            label: event.label,
            ragequitter: event.sender,
            commitment: event.commitment,
            value: event.value,
            block_number: receipt.block_number,
            tx_hash,
        };
        self.ledger.add_ragequit(entry.clone()).await?;

        self.telemetry.breadcrumb(&Breadcrumb {
            operation: Operation::Ragequit,
            message: "Ragequit successful".to_string(),
            data: context([
                ("transaction_hash", json!(tx_hash.to_string())),
                ("block_number", json!(receipt.block_number.to_string())),
                ("value", json!(event.value.to_string())),
            ]),
        });
        info!(%tx_hash, block = receipt.block_number, value = %event.value, "✅ Ragequit confirmed");

        Ok(RagequitOutcome {
            tx_hash,
            block_number: Some(receipt.block_number),
            entry: Some(entry),
        })
    }
}

/// A decoded revert from the dry run is a contract rejection, anything else
/// is a failure of the chain reader itself
fn simulation_error(error: CapabilityError) -> WithdrawError {
    match error.revert {
        Some(raw) => WithdrawError::Reverted {
            message: revert_user_message(&raw).to_string(),
            raw,
        },
        None => WithdrawError::capability("simulate ragequit", error),
    }
}
