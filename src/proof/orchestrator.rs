// Builds a verified withdrawal proof from a pool account, tree snapshots and fee terms
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    withdrawal_context, AccountService, Commitment, MerkleProver, PoolAccount, PreparedWithdrawal,
    ProgressSender, ProofBundle, ProofPhase, ProofProgress, Withdrawal, WithdrawalProofInput,
    WithdrawalProver,
};
use crate::chain::PoolChain;
use crate::config::PoolInfo;
use crate::primitives::{Address, FieldElement, Result, WithdrawError, U256};
use crate::telemetry::{context, report_failure, Notifier, Operation, OperationScope, TelemetrySink};

/// How progress events are obtained while proving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProofStrategy {
    /// A worker task runs its own proof purely for progress events while the
    /// authoritative proof is computed alongside; the worker's result is dropped
    #[default]
    ParallelProgress,
    /// One computation with the progress channel threaded through it
    SingleComputation,
}

/// Everything the proof needs. Fields are optional so that absent inputs
/// can be reported by name instead of failing somewhere downstream.
#[derive(Clone, Default)]
pub struct ProofRequest {
    pub pool_account: Option<PoolAccount>,
    pub recipient: Option<Address>,
    pub asp_leaves: Option<Vec<FieldElement>>,
    pub state_leaves: Option<Vec<FieldElement>>,
    /// On-chain address of the selected relayer
    pub relayer_address: Option<Address>,
    pub fee_bps: Option<u32>,
    pub account_service: Option<Arc<dyn AccountService>>,
    /// Withdrawal amount in base units
    pub amount: U256,
}

impl ProofRequest {
    pub fn commitment(&self) -> Option<&Commitment> {
        self.pool_account.as_ref()?.commitment()
    }

    /// Names of the required inputs that are absent
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.pool_account.is_none() {
            missing.push("pool account");
        }
        if self.recipient.is_none() {
            missing.push("recipient");
        }
        if self.commitment().is_none() {
            missing.push("commitment");
        }
        if self.asp_leaves.is_none() {
            missing.push("ASP leaves");
        }
        if self.state_leaves.is_none() {
            missing.push("state tree leaves");
        }
        if self.relayer_address.is_none() {
            missing.push("relayer address");
        }
        if self.fee_bps.is_none() {
            missing.push("fee rate");
        }
        if self.account_service.is_none() {
            missing.push("account service");
        }
        missing
    }

    fn presence(&self) -> Map<String, Value> {
        context([
            ("has_pool_account", json!(self.pool_account.is_some())),
            ("has_commitment", json!(self.commitment().is_some())),
            ("has_asp_leaves", json!(self.asp_leaves.is_some())),
            ("has_state_leaves", json!(self.state_leaves.is_some())),
            ("has_selected_relayer", json!(self.relayer_address.is_some())),
            ("amount", json!(self.amount.to_string())),
        ])
    }
}

#[derive(Default)]
struct Checkpoints {
    has_pool_scope: bool,
    merkle_proof_generated: bool,
}

pub struct ProofOrchestrator {
    chain: Arc<dyn PoolChain>,
    merkle: Arc<dyn MerkleProver>,
    prover: Arc<dyn WithdrawalProver>,
    telemetry: Arc<dyn TelemetrySink>,
    notifier: Arc<dyn Notifier>,
    strategy: ProofStrategy,
}

impl ProofOrchestrator {
    pub fn new(
        chain: Arc<dyn PoolChain>,
        merkle: Arc<dyn MerkleProver>,
        prover: Arc<dyn WithdrawalProver>,
        telemetry: Arc<dyn TelemetrySink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            chain,
            merkle,
            prover,
            telemetry,
            notifier,
            strategy: ProofStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ProofStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> ProofStrategy {
        self.strategy
    }

    /// Produce a verified withdrawal proof.
    ///
    /// Progress events are sent on `progress`; a final `VerifyingProof` 1.0
    /// event follows successful verification. Any failure is reported and
    /// surfaced as a notification before being returned.
    pub async fn generate_withdrawal_proof(
        &self,
        pool: &PoolInfo,
        request: &ProofRequest,
        progress: Option<ProgressSender>,
    ) -> Result<PreparedWithdrawal> {
        let mut checkpoints = Checkpoints::default();

        match self.build(pool, request, progress, &mut checkpoints).await {
            Ok(prepared) => Ok(prepared),
            Err(err) => {
                let mut extra = request.presence();
                extra.insert("has_pool_scope".into(), json!(checkpoints.has_pool_scope));
                extra.insert(
                    "merkle_proof_generated".into(),
                    json!(checkpoints.merkle_proof_generated),
                );
                extra.insert("proof_verified".into(), json!(false));

                report_failure(
                    self.telemetry.as_ref(),
                    self.notifier.as_ref(),
                    &scope_for(Operation::Withdraw, pool),
                    "proof_generation",
                    &err,
                    extra,
                );
                Err(err)
            }
        }
    }

    async fn build(
        &self,
        pool: &PoolInfo,
        request: &ProofRequest,
        progress: Option<ProgressSender>,
        checkpoints: &mut Checkpoints,
    ) -> Result<PreparedWithdrawal> {
        let missing = request.missing();
        if !missing.is_empty() {
            return Err(WithdrawError::MissingData(missing.join(", ")));
        }
        let (
            Some(commitment),
            Some(recipient),
            Some(asp_leaves),
            Some(state_leaves),
            Some(relayer),
            Some(fee_bps),
            Some(accounts),
        ) = (
            request.commitment(),
            request.recipient,
            request.asp_leaves.as_deref(),
            request.state_leaves.as_deref(),
            request.relayer_address,
            request.fee_bps,
            request.account_service.as_ref(),
        )
        else {
            return Err(WithdrawError::MissingData("proof inputs".into()));
        };

        if request.amount.is_zero() || request.amount > commitment.value {
            return Err(WithdrawError::InvalidInput(format!(
                "withdrawal amount {} not within commitment value {}",
                request.amount, commitment.value
            )));
        }

        let withdrawal = Withdrawal::new(recipient, pool.entry_point_address, relayer, fee_bps);

        let scope = self
            .chain
            .scope(pool.address)
            .await
            .map_err(|e| WithdrawError::capability("read pool scope", e))?;
        checkpoints.has_pool_scope = true;
        debug!(pool = %pool.address, scope = %scope, "Resolved pool scope");

        let (state_proof, asp_proof) = futures::try_join!(
            self.merkle.merkle_proof(state_leaves, commitment.hash),
            self.merkle.merkle_proof(asp_leaves, commitment.label),
        )
        .map_err(|e| WithdrawError::capability("build merkle proof", e))?;
        let state_proof = state_proof.normalize("state");
        let asp_proof = asp_proof.normalize("asp");

        let context = withdrawal_context(&withdrawal, &scope)?;
        let secrets = accounts.create_withdrawal_secrets(commitment);

        let input = WithdrawalProofInput::new(request.amount, state_proof, asp_proof, context, &secrets);
        checkpoints.merkle_proof_generated = true;

        info!(amount = %request.amount, strategy = ?self.strategy, "🔐 Generating withdrawal proof");
        let bundle = self.compute(commitment, &input, progress.clone()).await?;

        let verified = self
            .prover
            .verify_withdrawal(&bundle)
            .await
            .map_err(|e| WithdrawError::capability("verify withdrawal proof", e))?;
        if !verified {
            warn!("Withdrawal proof failed verification, discarding");
            return Err(WithdrawError::ProofVerificationFailed);
        }

        if let Some(progress) = progress {
            let _ = progress.send(ProofProgress {
                phase: ProofPhase::VerifyingProof,
                progress: 1.0,
            });
        }
        info!("✅ Withdrawal proof generated and verified");

        Ok(PreparedWithdrawal {
            bundle,
            withdrawal,
            secrets,
        })
    }

    /// Run the proving strategy; only the authoritative result is returned
    async fn compute(
        &self,
        commitment: &Commitment,
        input: &WithdrawalProofInput,
        progress: Option<ProgressSender>,
    ) -> Result<ProofBundle> {
        let authoritative = match self.strategy {
            ProofStrategy::SingleComputation => {
                self.prover.prove_withdrawal(commitment, input, progress).await
            }
            ProofStrategy::ParallelProgress => {
                let mut worker = {
                    let prover = Arc::clone(&self.prover);
                    let commitment = commitment.clone();
                    let input = input.clone();
                    AbortOnDrop(tokio::spawn(async move {
                        prover.prove_withdrawal(&commitment, &input, progress).await
                    }))
                };

                let (worker, authoritative) = tokio::join!(
                    &mut worker.0,
                    self.prover.prove_withdrawal(commitment, input, None)
                );

                match worker {
                    Ok(Ok(_discarded)) => debug!("Progress worker finished"),
                    Ok(Err(e)) => warn!("Progress worker failed: {}", e),
                    Err(e) => warn!("Progress worker panicked or was cancelled: {}", e),
                }
                authoritative
            }
        };

        authoritative.map_err(|e| WithdrawError::capability("generate withdrawal proof", e))
    }

    /// Produce and verify the proof for a unilateral exit of the account's
    /// last commitment.
    pub async fn generate_ragequit_proof(
        &self,
        pool: &PoolInfo,
        pool_account: Option<&PoolAccount>,
    ) -> Result<ProofBundle> {
        let result = self.build_ragequit(pool_account).await;

        if let Err(err) = &result {
            report_failure(
                self.telemetry.as_ref(),
                self.notifier.as_ref(),
                &scope_for(Operation::Ragequit, pool),
                "proof_generation",
                err,
                context([("has_pool_account", json!(pool_account.is_some()))]),
            );
        }
        result
    }

    async fn build_ragequit(&self, pool_account: Option<&PoolAccount>) -> Result<ProofBundle> {
        let commitment = pool_account
            .and_then(PoolAccount::commitment)
            .ok_or_else(|| WithdrawError::MissingData("pool account commitment".into()))?;

        info!(label = %commitment.label, "🔐 Generating ragequit proof");
        let bundle = self
            .prover
            .prove_ragequit(commitment)
            .await
            .map_err(|e| WithdrawError::capability("generate ragequit proof", e))?;

        let verified = self
            .prover
            .verify_ragequit(&bundle)
            .await
            .map_err(|e| WithdrawError::capability("verify ragequit proof", e))?;
        if !verified {
            return Err(WithdrawError::ProofVerificationFailed);
        }
        Ok(bundle)
    }
}

/// Stops the progress worker when proving is abandoned midway
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) fn scope_for(operation: Operation, pool: &PoolInfo) -> OperationScope {
    OperationScope {
        operation,
        chain_id: Some(pool.chain_id),
        pool_address: Some(pool.address),
        entry_point: Some(pool.entry_point_address),
        test_mode: false,
    }
}
