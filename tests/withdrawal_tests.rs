// End-to-end withdrawal and ragequit flows over the in-process capabilities

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use privacy_pool_withdraw::classifier::{PoolError, GENERIC_ERROR_MESSAGE, USER_CANCELLED_MESSAGE};
use privacy_pool_withdraw::config::SEPOLIA_CHAIN_ID;
use privacy_pool_withdraw::mock::*;
use privacy_pool_withdraw::proof::ProofPhase;
use privacy_pool_withdraw::relayer::{FeeCommitment, RelayResponse};
use privacy_pool_withdraw::telemetry::NotificationKind;
use privacy_pool_withdraw::*;

struct Fixture {
    pool: PoolInfo,
    relayer: Arc<MockRelayer>,
    chain: Arc<MockChain>,
    wallet: Arc<MockWallet>,
    prover: Arc<MockProver>,
    ledger: Arc<MemoryLedger>,
    telemetry: Arc<RecordingTelemetry>,
    notifier: Arc<RecordingNotifier>,
    account: PoolAccount,
    recipient: Address,
    relayer_address: Address,
    depositor: Address,
}

impl Fixture {
    fn new() -> Self {
        let config = AppConfig::with_builtin_chains(true).unwrap();
        let pool = config.pool(SEPOLIA_CHAIN_ID, "ETH").cloned().unwrap();
        let scope = FieldElement::from_decimal(&pool.scope).unwrap();
        let clock = Arc::new(MockClock::new(1_760_000_000_000));
        let depositor = Address::repeat_byte(0xd0);

        let commitment = Commitment {
            hash: hash_to_field(b"commitment"),
            label: hash_to_field(b"label"),
            value: U256::from(10),
        };

        Self {
            pool,
            relayer: Arc::new(MockRelayer::new(clock)),
            chain: Arc::new(MockChain::new(scope)),
            wallet: Arc::new(MockWallet::new(depositor)),
            prover: Arc::new(MockProver::default()),
            ledger: Arc::new(MemoryLedger::new()),
            telemetry: Arc::new(RecordingTelemetry::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            account: PoolAccount {
                balance: U256::from(10),
                last_commitment: Some(commitment),
            },
            recipient: parse_address("0x1234567890abcdef1234567890abcdef12345678").unwrap(),
            relayer_address: Address::repeat_byte(0x22),
            depositor,
        }
    }

    fn commitment(&self) -> Commitment {
        self.account.last_commitment.clone().unwrap()
    }

    fn orchestrator(&self) -> ProofOrchestrator {
        ProofOrchestrator::new(
            self.chain.clone(),
            Arc::new(ListMerkleProver),
            self.prover.clone(),
            self.telemetry.clone(),
            self.notifier.clone(),
        )
    }

    fn executor(&self, settings: ExecutionSettings) -> WithdrawalExecutor {
        WithdrawalExecutor::new(
            self.relayer.clone(),
            self.chain.clone(),
            self.wallet.clone(),
            self.ledger.clone(),
            self.telemetry.clone(),
            self.notifier.clone(),
            settings,
        )
    }

    fn proof_request(&self, amount: u64) -> ProofRequest {
        let commitment = self.commitment();
        ProofRequest {
            pool_account: Some(self.account.clone()),
            recipient: Some(self.recipient),
            asp_leaves: Some(vec![hash_to_field(b"other label"), commitment.label]),
            state_leaves: Some(vec![
                hash_to_field(b"a"),
                commitment.hash,
                hash_to_field(b"b"),
            ]),
            relayer_address: Some(self.relayer_address),
            fee_bps: Some(150),
            account_service: Some(Arc::new(KeyedAccountService::new(hash_to_field(b"master")))),
            amount: U256::from(amount),
        }
    }

    async fn prepared(&self, amount: u64) -> PreparedWithdrawal {
        self.orchestrator()
            .generate_withdrawal_proof(&self.pool, &self.proof_request(amount), None)
            .await
            .unwrap()
    }

    fn execution_request(&self, prepared: Option<PreparedWithdrawal>) -> ExecutionRequest {
        ExecutionRequest {
            pool_account: Some(self.account.clone()),
            prepared,
            recipient: Some(self.recipient),
            relayer_address: Some(self.relayer_address),
            fee_commitment: Some(FeeCommitment {
                signed_relayer_commitment: "0xfeed".to_string(),
                expiration: 1_760_000_300_000,
            }),
        }
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<ProofProgress>) -> Vec<ProofProgress> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_withdrawal_records_remaining_balance() {
    let f = Fixture::new();
    let prepared = f.prepared(3).await;
    f.chain.set_events(vec![MockChain::withdrawn_event(U256::from(3))]);

    let outcome = f
        .executor(ExecutionSettings::default())
        .withdraw(&f.pool, &f.execution_request(Some(prepared.clone())))
        .await
        .unwrap();

    assert_eq!(outcome.withdrawn, Some(U256::from(3)));
    assert_eq!(outcome.block_number, Some(f.chain.block_number()));
    let entry = outcome.entry.unwrap();
    assert_eq!(entry.value, U256::from(7));
    assert_eq!(entry.parent_commitment, f.commitment());
    assert_eq!(entry.secrets, prepared.secrets);
    assert_eq!(entry.tx_hash, outcome.tx_hash);
    assert_eq!(f.ledger.balance(&f.commitment().label).await, Some(U256::from(7)));

    let relays = f.relayer.relays();
    assert_eq!(relays.len(), 1);
    assert_eq!(relays[0].withdrawal, prepared.withdrawal);
    assert_eq!(relays[0].public_signals, prepared.bundle.public_signals);
    assert_eq!(relays[0].chain_id, SEPOLIA_CHAIN_ID);
    assert_eq!(
        relays[0].scope,
        FieldElement::from_decimal(&f.pool.scope).unwrap().to_decimal()
    );
    assert_eq!(f.wallet.chain_id(), Some(SEPOLIA_CHAIN_ID));

    let crumbs = f.telemetry.breadcrumbs();
    assert!(crumbs.iter().any(|c| c.message == "Withdrawal successful"));
    assert!(f.telemetry.failures().is_empty());

    println!("✅ Withdrawal confirmed, remaining balance recorded");
}

#[tokio::test]
async fn test_unknown_asp_index_is_normalized() {
    let f = Fixture::new();
    let mut request = f.proof_request(3);
    request.asp_leaves = Some(vec![hash_to_field(b"x"), hash_to_field(b"y")]);

    f.orchestrator()
        .generate_withdrawal_proof(&f.pool, &request, None)
        .await
        .unwrap();

    let input = f.prover.last_input().unwrap();
    assert_eq!(input.asp_merkle_proof.index, 0);
    assert_eq!(input.state_merkle_proof.index, 1);
    assert_eq!(input.state_tree_depth, input.state_merkle_proof.siblings.len());
    assert_eq!(input.asp_root, input.asp_merkle_proof.root);
    assert_eq!(input.withdrawal_amount, U256::from(3));
}

#[tokio::test]
async fn test_progress_events_end_with_verified() {
    let f = Fixture::new();
    let (tx, rx) = mpsc::unbounded_channel();

    let orchestrator = f.orchestrator();
    assert_eq!(orchestrator.strategy(), ProofStrategy::ParallelProgress);
    orchestrator
        .generate_withdrawal_proof(&f.pool, &f.proof_request(3), Some(tx))
        .await
        .unwrap();

    let events = drain(rx).await;
    assert!(events.iter().any(|e| e.phase == ProofPhase::LoadingCircuits));
    assert!(events.iter().any(|e| e.phase == ProofPhase::GeneratingProof));
    let last = events.last().unwrap();
    assert_eq!(last.phase, ProofPhase::VerifyingProof);
    assert_eq!(last.progress, 1.0);

    // Progress worker plus the authoritative computation
    assert_eq!(f.prover.withdrawal_calls(), 2);
    assert_eq!(f.prover.verify_calls(), 1);
}

#[tokio::test]
async fn test_single_computation_proves_once() {
    let f = Fixture::new();
    let (tx, rx) = mpsc::unbounded_channel();

    f.orchestrator()
        .with_strategy(ProofStrategy::SingleComputation)
        .generate_withdrawal_proof(&f.pool, &f.proof_request(3), Some(tx))
        .await
        .unwrap();

    let events = drain(rx).await;
    assert_eq!(f.prover.withdrawal_calls(), 1);
    assert!(events.len() > 1);
    assert_eq!(events.last().map(|e| e.progress), Some(1.0));
}

#[tokio::test]
async fn test_rejected_proof_never_reaches_relayer() {
    let f = Fixture::new();
    f.prover.reject_proofs(true);

    let err = f
        .orchestrator()
        .generate_withdrawal_proof(&f.pool, &f.proof_request(3), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::ProofVerificationFailed));

    let failures = f.telemetry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step, "proof_generation");
    assert_eq!(failures[0].kind, FailureKind::ProofVerificationFailed);
    assert_eq!(failures[0].context["has_pool_scope"], true);
    assert_eq!(failures[0].context["merkle_proof_generated"], true);
    assert_eq!(failures[0].context["proof_verified"], false);
    assert_eq!(
        f.notifier
            .count(NotificationKind::Error, PoolError::InvalidProof.user_message()),
        1
    );

    // Without a proof the executor stops before contacting anyone
    let err = f
        .executor(ExecutionSettings::default())
        .withdraw(&f.pool, &f.execution_request(None))
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::MissingData(ref m) if m.contains("proof")));
    assert!(f.relayer.relays().is_empty());
    assert_eq!(f.wallet.switches(), 0);
}

#[tokio::test]
async fn test_missing_inputs_are_named_and_not_reported() {
    let f = Fixture::new();
    let mut request = f.proof_request(3);
    request.recipient = None;
    request.asp_leaves = None;

    let err = f
        .orchestrator()
        .generate_withdrawal_proof(&f.pool, &request, None)
        .await
        .unwrap_err();

    match err {
        WithdrawError::MissingData(message) => {
            assert!(message.contains("recipient"));
            assert!(message.contains("ASP leaves"));
            assert!(!message.contains("commitment"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(f.telemetry.failures().is_empty());
    assert_eq!(f.notifier.notifications().len(), 1);
    assert_eq!(f.notifier.notifications()[0].kind, NotificationKind::Warning);
    assert_eq!(f.prover.withdrawal_calls(), 0);
}

#[tokio::test]
async fn test_amount_above_commitment_value_is_rejected() {
    let f = Fixture::new();
    let err = f
        .orchestrator()
        .generate_withdrawal_proof(&f.pool, &f.proof_request(11), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::InvalidInput(_)));
    assert_eq!(f.prover.withdrawal_calls(), 0);
}

#[tokio::test]
async fn test_known_relayer_error_is_mapped() {
    let f = Fixture::new();
    let prepared = f.prepared(3).await;
    f.relayer.set_relay_response(RelayResponse {
        success: false,
        tx_hash: None,
        error: Some("Error: InvalidProof()".to_string()),
    });

    let err = f
        .executor(ExecutionSettings::default())
        .withdraw(&f.pool, &f.execution_request(Some(prepared)))
        .await
        .unwrap_err();

    let expected = PoolError::InvalidProof.user_message();
    match &err {
        WithdrawError::RelayerRejected { message, raw } => {
            assert_eq!(message, expected);
            assert_eq!(raw.as_deref(), Some("Error: InvalidProof()"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let failures = f.telemetry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step, "relayer_execution");
    assert_eq!(failures[0].kind, FailureKind::RelayerRejected);
    assert_eq!(f.notifier.count(NotificationKind::Error, expected), 1);
    assert!(f.ledger.entries().await.is_empty());
}

#[tokio::test]
async fn test_unknown_relayer_error_gets_generic_message() {
    let f = Fixture::new();
    let prepared = f.prepared(3).await;
    f.relayer.set_relay_response(RelayResponse {
        success: false,
        tx_hash: None,
        error: Some("nonce too low".to_string()),
    });

    let err = f
        .executor(ExecutionSettings::default())
        .withdraw(&f.pool, &f.execution_request(Some(prepared)))
        .await
        .unwrap_err();

    assert_eq!(err.user_message(), GENERIC_ERROR_MESSAGE);
    assert_eq!(f.notifier.count(NotificationKind::Error, GENERIC_ERROR_MESSAGE), 1);
}

#[tokio::test(start_paused = true)]
async fn test_receipt_wait_is_bounded() {
    let f = Fixture::new();
    let prepared = f.prepared(3).await;
    f.chain.set_events(vec![MockChain::withdrawn_event(U256::from(3))]);
    f.chain.set_receipt_delay(Duration::from_secs(301));

    let start = Instant::now();
    let err = f
        .executor(ExecutionSettings::default())
        .withdraw(&f.pool, &f.execution_request(Some(prepared)))
        .await
        .unwrap_err();

    assert!(matches!(err, WithdrawError::ReceiptTimeout { timeout_secs: 300, .. }));
    assert_eq!(Instant::now() - start, Duration::from_secs(300));
    assert_eq!(f.telemetry.failures()[0].kind, FailureKind::Timeout);
    assert!(f.ledger.entries().await.is_empty());
}

#[tokio::test]
async fn test_missing_receipt_or_event_fails() {
    let f = Fixture::new();
    let prepared = f.prepared(3).await;
    let executor = f.executor(ExecutionSettings::default());

    f.chain.drop_receipts(true);
    let err = executor
        .withdraw(&f.pool, &f.execution_request(Some(prepared.clone())))
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::ReceiptNotFound(_)));

    f.chain.drop_receipts(false);
    let err = executor
        .withdraw(&f.pool, &f.execution_request(Some(prepared.clone())))
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::EventNotFound(ref name) if name == "Withdrawn"));

    f.chain.set_events(vec![MockChain::withdrawn_event(U256::from(11))]);
    let err = executor
        .withdraw(&f.pool, &f.execution_request(Some(prepared)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WithdrawError::InsufficientBalance { balance, value }
            if balance == U256::from(10) && value == U256::from(11)
    ));

    assert_eq!(f.telemetry.failures().len(), 3);
    assert!(f.ledger.entries().await.is_empty());
}

#[tokio::test]
async fn test_wallet_cancellation_is_informational() {
    let f = Fixture::new();
    let prepared = f.prepared(3).await;
    f.wallet.fail_switch(Some(
        CapabilityError::new("User rejected the request.").with_code(4001),
    ));

    let err = f
        .executor(ExecutionSettings::default())
        .withdraw(&f.pool, &f.execution_request(Some(prepared)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::UserCancelled);
    assert!(f.telemetry.failures().is_empty());
    assert_eq!(f.notifier.count(NotificationKind::Info, USER_CANCELLED_MESSAGE), 1);
    assert!(f.relayer.relays().is_empty());
}

#[tokio::test]
async fn test_proof_for_other_recipient_is_refused() {
    let f = Fixture::new();
    let prepared = f.prepared(3).await;
    let mut request = f.execution_request(Some(prepared));
    request.recipient = Some(Address::repeat_byte(0x99));

    let err = f
        .executor(ExecutionSettings::default())
        .withdraw(&f.pool, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::InvalidInput(_)));
    assert!(f.relayer.relays().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_test_mode_fakes_the_transaction() {
    let f = Fixture::new();
    let settings = ExecutionSettings {
        test_mode: true,
        ..ExecutionSettings::default()
    };
    let executor = f.executor(settings);

    let start = Instant::now();
    let outcome = executor
        .withdraw(&f.pool, &f.execution_request(None))
        .await
        .unwrap();
    assert_eq!(Instant::now() - start, Duration::from_secs(2));
    assert_eq!(outcome.block_number, None);
    assert_eq!(outcome.entry, None);
    assert!(f.relayer.relays().is_empty());
    assert_eq!(f.wallet.switches(), 0);

    let mut without_account = f.execution_request(None);
    without_account.pool_account = None;
    let err = executor.withdraw(&f.pool, &without_account).await.unwrap_err();
    assert!(matches!(err, WithdrawError::MissingData(_)));
}

#[tokio::test]
async fn test_ragequit_exits_the_commitment() {
    let f = Fixture::new();
    let proof = f
        .orchestrator()
        .generate_ragequit_proof(&f.pool, Some(&f.account))
        .await
        .unwrap();
    assert_eq!(f.prover.ragequit_calls(), 1);

    f.chain
        .set_events(vec![MockChain::ragequit_event(f.depositor, &f.commitment())]);
    let outcome = f
        .executor(ExecutionSettings::default())
        .ragequit(
            &f.pool,
            &RagequitRequest {
                pool_account: Some(f.account.clone()),
                proof: Some(proof),
            },
        )
        .await
        .unwrap();

    let entry = outcome.entry.unwrap();
    assert_eq!(entry.value, U256::from(10));
    assert_eq!(entry.ragequitter, f.depositor);
    assert_eq!(entry.label, f.commitment().label);
    assert_eq!(f.ledger.balance(&f.commitment().label).await, Some(U256::ZERO));
    assert!(f
        .telemetry
        .breadcrumbs()
        .iter()
        .any(|c| c.message == "Ragequit successful"));
    assert!(f.relayer.relays().is_empty());

    println!("✅ Ragequit confirmed without the relayer");
}

#[tokio::test]
async fn test_ragequit_by_non_depositor_reverts_in_simulation() {
    let f = Fixture::new();
    let proof = f
        .orchestrator()
        .generate_ragequit_proof(&f.pool, Some(&f.account))
        .await
        .unwrap();
    f.chain.fail_simulation(Some(
        CapabilityError::new("execution reverted").with_revert("Error: OnlyOriginalDepositor()"),
    ));

    let err = f
        .executor(ExecutionSettings::default())
        .ragequit(
            &f.pool,
            &RagequitRequest {
                pool_account: Some(f.account.clone()),
                proof: Some(proof),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::OnChainReverted);
    assert!(matches!(
        &err,
        WithdrawError::Reverted { raw, .. } if raw == "Error: OnlyOriginalDepositor()"
    ));
    let failures = f.telemetry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step, "contract_simulation");
    assert_eq!(
        f.notifier.count(
            NotificationKind::Error,
            PoolError::OnlyOriginalDepositor.user_message()
        ),
        1
    );
    assert!(f.ledger.entries().await.is_empty());
}

#[tokio::test]
async fn test_ragequit_requires_a_commitment() {
    let f = Fixture::new();
    let empty = PoolAccount {
        balance: U256::ZERO,
        last_commitment: None,
    };

    let err = f
        .orchestrator()
        .generate_ragequit_proof(&f.pool, Some(&empty))
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::MissingData(_)));
    assert_eq!(f.prover.ragequit_calls(), 0);

    let err = f
        .executor(ExecutionSettings::default())
        .ragequit(&f.pool, &RagequitRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::MissingData(_)));
    assert!(f.telemetry.failures().is_empty());
}
