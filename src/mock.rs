// Deterministic in-process capabilities for test mode, the CLI demo and tests
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::chain::{PoolChain, PoolEvent, RagequitCall, Receipt, WalletClient};
use crate::primitives::{
    hash_data, hash_to_field, random_tx_hash, Address, BlockNumber, CapabilityError, ChainId, Clock,
    FieldElement, Timestamp, TxHash, U256,
};
use crate::proof::{
    AccountService, Commitment, MerkleProver, ProgressSender, ProofBundle, ProofPhase, ProofProgress,
    RawMerkleProof, SnarkProof, WithdrawalProofInput, WithdrawalProver, WithdrawalSecrets,
};
use crate::relayer::{
    EthAmount, FeeCommitment, QuoteDetail, QuoteRequest, QuoteResponse, RelayRequest, RelayResponse,
    RelayerClient,
};
use crate::telemetry::{Breadcrumb, FailureReport, Notification, NotificationKind, Notifier, TelemetrySink};

type CapResult<T> = std::result::Result<T, CapabilityError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wall clock that advances with tokio time, so paused tests control it
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    start_millis: Timestamp,
}

impl MockClock {
    pub fn new(start_millis: Timestamp) -> Self {
        Self {
            origin: Instant::now(),
            start_millis,
        }
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> Timestamp {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.start_millis + elapsed.as_millis() as Timestamp
    }
}

/// Relayer quoting a fixed fee with a fixed time to live
pub struct MockRelayer {
    clock: Arc<dyn Clock>,
    quote_ttl: Duration,
    fee_bps: u32,
    base_fee_bps: u32,
    latency: Duration,
    quote_calls: AtomicUsize,
    quote_failure: Mutex<Option<CapabilityError>>,
    quotes: Mutex<Vec<QuoteRequest>>,
    relay_response: Mutex<Option<RelayResponse>>,
    relays: Mutex<Vec<RelayRequest>>,
}

impl MockRelayer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            quote_ttl: Duration::from_secs(300),
            fee_bps: 150,
            base_fee_bps: 100,
            latency: Duration::ZERO,
            quote_calls: AtomicUsize::new(0),
            quote_failure: Mutex::new(None),
            quotes: Mutex::new(Vec::new()),
            relay_response: Mutex::new(None),
            relays: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.quote_ttl = ttl;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_fees(mut self, fee_bps: u32, base_fee_bps: u32) -> Self {
        self.fee_bps = fee_bps;
        self.base_fee_bps = base_fee_bps;
        self
    }

    pub fn fail_quotes(&self, failure: Option<CapabilityError>) {
        *lock(&self.quote_failure) = failure;
    }

    /// Answer every relay with `response` instead of a success
    pub fn set_relay_response(&self, response: RelayResponse) {
        *lock(&self.relay_response) = Some(response);
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn quote_requests(&self) -> Vec<QuoteRequest> {
        lock(&self.quotes).clone()
    }

    pub fn relays(&self) -> Vec<RelayRequest> {
        lock(&self.relays).clone()
    }
}

#[async_trait::async_trait]
impl RelayerClient for MockRelayer {
    async fn quote(&self, request: &QuoteRequest) -> CapResult<QuoteResponse> {
        let call = self.quote_calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.quotes).push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(failure) = lock(&self.quote_failure).clone() {
            return Err(failure);
        }

        let token = hash_data(format!("{}:{}:{}:{}", call, request.chain_id, request.amount, request.extra_gas).as_bytes());
        let expiration = self.clock.now_millis() + self.quote_ttl.as_millis() as Timestamp;
        debug!(call, expiration, "Mock relayer issuing quote");

        Ok(QuoteResponse {
            fee_commitment: FeeCommitment {
                signed_relayer_commitment: format!("0x{}", hex::encode(token)),
                expiration,
            },
            fee_bps: self.fee_bps,
            base_fee_bps: self.base_fee_bps,
            detail: request.extra_gas.then(|| QuoteDetail {
                extra_gas_fund_amount: Some(EthAmount {
                    eth: "0.001".to_string(),
                }),
            }),
        })
    }

    async fn relay(&self, request: &RelayRequest) -> CapResult<RelayResponse> {
        lock(&self.relays).push(request.clone());
        if let Some(response) = lock(&self.relay_response).clone() {
            return Ok(response);
        }
        Ok(RelayResponse {
            success: true,
            tx_hash: Some(random_tx_hash().to_string()),
            error: None,
        })
    }
}

/// Chain whose receipts carry a configurable set of events
pub struct MockChain {
    scope: FieldElement,
    block_number: BlockNumber,
    events: Mutex<Vec<PoolEvent>>,
    receipt_delay: Mutex<Duration>,
    drop_receipts: AtomicBool,
    simulate_failure: Mutex<Option<CapabilityError>>,
}

impl MockChain {
    pub fn new(scope: FieldElement) -> Self {
        Self {
            scope,
            block_number: 8_600_000,
            events: Mutex::new(Vec::new()),
            receipt_delay: Mutex::new(Duration::ZERO),
            drop_receipts: AtomicBool::new(false),
            simulate_failure: Mutex::new(None),
        }
    }

    pub fn set_events(&self, events: Vec<PoolEvent>) {
        *lock(&self.events) = events;
    }

    /// Delay before a receipt becomes available
    pub fn set_receipt_delay(&self, delay: Duration) {
        *lock(&self.receipt_delay) = delay;
    }

    pub fn drop_receipts(&self, drop: bool) {
        self.drop_receipts.store(drop, Ordering::SeqCst);
    }

    pub fn fail_simulation(&self, failure: Option<CapabilityError>) {
        *lock(&self.simulate_failure) = failure;
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    pub fn withdrawn_event(value: U256) -> PoolEvent {
        PoolEvent::Withdrawn {
            processooor: Address::ZERO,
            value,
            spent_nullifier: hash_to_field(b"spent"),
            new_commitment: hash_to_field(b"change"),
        }
    }

    pub fn ragequit_event(sender: Address, commitment: &Commitment) -> PoolEvent {
        PoolEvent::Ragequit {
            sender,
            commitment: commitment.hash,
            label: commitment.label,
            value: commitment.value,
        }
    }
}

#[async_trait::async_trait]
impl PoolChain for MockChain {
    async fn scope(&self, _pool: Address) -> CapResult<FieldElement> {
        Ok(self.scope)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> CapResult<Option<Receipt>> {
        let delay = *lock(&self.receipt_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.drop_receipts.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Receipt {
            tx_hash,
            block_number: self.block_number,
            events: lock(&self.events).clone(),
        }))
    }

    async fn simulate_ragequit(&self, pool: Address, bundle: &ProofBundle) -> CapResult<RagequitCall> {
        if let Some(failure) = lock(&self.simulate_failure).clone() {
            return Err(failure);
        }
        Ok(RagequitCall {
            pool,
            bundle: bundle.clone(),
        })
    }
}

pub struct MockWallet {
    address: Option<Address>,
    chain_id: Mutex<Option<ChainId>>,
    switches: AtomicUsize,
    switch_failure: Mutex<Option<CapabilityError>>,
    send_failure: Mutex<Option<CapabilityError>>,
}

impl MockWallet {
    pub fn new(address: Address) -> Self {
        Self {
            address: Some(address),
            chain_id: Mutex::new(None),
            switches: AtomicUsize::new(0),
            switch_failure: Mutex::new(None),
            send_failure: Mutex::new(None),
        }
    }

    pub fn fail_switch(&self, failure: Option<CapabilityError>) {
        *lock(&self.switch_failure) = failure;
    }

    pub fn fail_send(&self, failure: Option<CapabilityError>) {
        *lock(&self.send_failure) = failure;
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        *lock(&self.chain_id)
    }

    /// Number of actual chain changes
    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl WalletClient for MockWallet {
    async fn switch_chain(&self, chain_id: ChainId) -> CapResult<()> {
        if let Some(failure) = lock(&self.switch_failure).clone() {
            return Err(failure);
        }
        let mut current = lock(&self.chain_id);
        if *current != Some(chain_id) {
            *current = Some(chain_id);
            self.switches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send_ragequit(&self, _call: &RagequitCall) -> CapResult<TxHash> {
        if let Some(failure) = lock(&self.send_failure).clone() {
            return Err(failure);
        }
        Ok(random_tx_hash())
    }

    fn address(&self) -> Option<Address> {
        self.address
    }
}

fn hash_pair(left: &FieldElement, right: &FieldElement) -> FieldElement {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    hash_to_field(&data)
}

/// Binary SHA-256 tree over the leaves in the given order, zero padded.
/// A leaf that is not in the set yields no index.
#[derive(Debug, Default)]
pub struct ListMerkleProver;

#[async_trait::async_trait]
impl MerkleProver for ListMerkleProver {
    async fn merkle_proof(&self, leaves: &[FieldElement], leaf: FieldElement) -> CapResult<RawMerkleProof> {
        if leaves.is_empty() {
            return Err(CapabilityError::new("cannot build a merkle proof over an empty tree"));
        }
        let found = leaves.iter().position(|l| *l == leaf);
        let mut position = found.unwrap_or(0);

        let mut level: Vec<FieldElement> = leaves.to_vec();
        let mut siblings = Vec::new();
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                level.push(FieldElement::zero());
            }
            siblings.push(level[position ^ 1]);
            level = level.chunks(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
            position /= 2;
        }

        Ok(RawMerkleProof {
            index: found.map(|i| i as i64),
            siblings,
            root: level[0],
        })
    }
}

/// Proof backend producing deterministic bundles and reporting phases
pub struct MockProver {
    step_delay: Duration,
    reject_proofs: AtomicBool,
    generation_failure: Mutex<Option<CapabilityError>>,
    last_input: Mutex<Option<WithdrawalProofInput>>,
    withdrawal_calls: AtomicUsize,
    ragequit_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl Default for MockProver {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl MockProver {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            reject_proofs: AtomicBool::new(false),
            generation_failure: Mutex::new(None),
            last_input: Mutex::new(None),
            withdrawal_calls: AtomicUsize::new(0),
            ragequit_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Make verification report every proof as invalid
    pub fn reject_proofs(&self, reject: bool) {
        self.reject_proofs.store(reject, Ordering::SeqCst);
    }

    pub fn fail_generation(&self, failure: Option<CapabilityError>) {
        *lock(&self.generation_failure) = failure;
    }

    /// Input of the most recent withdrawal proof request
    pub fn last_input(&self) -> Option<WithdrawalProofInput> {
        lock(&self.last_input).clone()
    }

    pub fn withdrawal_calls(&self) -> usize {
        self.withdrawal_calls.load(Ordering::SeqCst)
    }

    pub fn ragequit_calls(&self) -> usize {
        self.ragequit_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    async fn step(&self, progress: &Option<ProgressSender>, phase: ProofPhase, ratio: f32) {
        if let Some(progress) = progress {
            let _ = progress.send(ProofProgress { phase, progress: ratio });
        }
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }

    fn bundle(seed: &[u8], public_signals: Vec<String>) -> ProofBundle {
        let point = |tag: &str| {
            let mut data = seed.to_vec();
            data.extend_from_slice(tag.as_bytes());
            hash_to_field(&data).to_decimal()
        };
        ProofBundle {
            proof: SnarkProof {
                pi_a: vec![point("a0"), point("a1"), "1".to_string()],
                pi_b: vec![
                    vec![point("b00"), point("b01")],
                    vec![point("b10"), point("b11")],
                    vec!["1".to_string(), "0".to_string()],
                ],
                pi_c: vec![point("c0"), point("c1"), "1".to_string()],
                protocol: "groth16".to_string(),
                curve: "bn128".to_string(),
            },
            public_signals,
        }
    }
}

#[async_trait::async_trait]
impl WithdrawalProver for MockProver {
    async fn prove_withdrawal(
        &self,
        commitment: &Commitment,
        input: &WithdrawalProofInput,
        progress: Option<ProgressSender>,
    ) -> CapResult<ProofBundle> {
        self.withdrawal_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_input) = Some(input.clone());

        self.step(&progress, ProofPhase::LoadingCircuits, 0.0).await;
        self.step(&progress, ProofPhase::LoadingCircuits, 1.0).await;
        if let Some(failure) = lock(&self.generation_failure).clone() {
            return Err(failure);
        }
        self.step(&progress, ProofPhase::GeneratingProof, 0.0).await;
        self.step(&progress, ProofPhase::GeneratingProof, 0.5).await;
        self.step(&progress, ProofPhase::GeneratingProof, 1.0).await;
        self.step(&progress, ProofPhase::VerifyingProof, 0.0).await;

        let seed = serde_json::to_vec(input).map_err(|e| CapabilityError::new(e.to_string()))?;
        let signals = vec![
            input.new_nullifier.to_decimal(),
            commitment.hash.to_decimal(),
            input.withdrawal_amount.to_string(),
            input.state_root.to_decimal(),
            input.state_tree_depth.to_string(),
            input.asp_root.to_decimal(),
            input.asp_tree_depth.to_string(),
            input.context.to_decimal(),
        ];
        Ok(Self::bundle(&seed, signals))
    }

    async fn verify_withdrawal(&self, _bundle: &ProofBundle) -> CapResult<bool> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.reject_proofs.load(Ordering::SeqCst))
    }

    async fn prove_ragequit(&self, commitment: &Commitment) -> CapResult<ProofBundle> {
        self.ragequit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = lock(&self.generation_failure).clone() {
            return Err(failure);
        }
        let signals = vec![
            commitment.hash.to_decimal(),
            hash_to_field(commitment.hash.as_bytes()).to_decimal(),
            commitment.value.to_string(),
            commitment.label.to_decimal(),
        ];
        Ok(Self::bundle(commitment.hash.as_bytes(), signals))
    }

    async fn verify_ragequit(&self, _bundle: &ProofBundle) -> CapResult<bool> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.reject_proofs.load(Ordering::SeqCst))
    }
}

/// Derives withdrawal secrets from a master key and the spent commitment
#[derive(Debug, Clone)]
pub struct KeyedAccountService {
    master_key: FieldElement,
}

impl KeyedAccountService {
    pub fn new(master_key: FieldElement) -> Self {
        Self { master_key }
    }

    fn derive(&self, commitment: &Commitment, tag: &[u8]) -> FieldElement {
        let mut data = Vec::with_capacity(96 + tag.len());
        data.extend_from_slice(self.master_key.as_bytes());
        data.extend_from_slice(commitment.label.as_bytes());
        data.extend_from_slice(commitment.hash.as_bytes());
        data.extend_from_slice(tag);
        hash_to_field(&data)
    }
}

impl AccountService for KeyedAccountService {
    fn create_withdrawal_secrets(&self, commitment: &Commitment) -> WithdrawalSecrets {
        WithdrawalSecrets {
            secret: self.derive(commitment, b"secret"),
            nullifier: self.derive(commitment, b"nullifier"),
        }
    }
}

/// Telemetry sink that keeps everything it receives
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    failures: Mutex<Vec<FailureReport>>,
    breadcrumbs: Mutex<Vec<Breadcrumb>>,
}

impl RecordingTelemetry {
    pub fn failures(&self) -> Vec<FailureReport> {
        lock(&self.failures).clone()
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        lock(&self.breadcrumbs).clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn capture_failure(&self, report: &FailureReport) {
        lock(&self.failures).push(report.clone());
    }

    fn breadcrumb(&self, crumb: &Breadcrumb) {
        lock(&self.breadcrumbs).push(crumb.clone());
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn count(&self, kind: NotificationKind, message: &str) -> usize {
        lock(&self.notifications)
            .iter()
            .filter(|n| n.kind == kind && n.message == message)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        lock(&self.notifications).push(Notification {
            kind,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u64) -> Vec<FieldElement> {
        (1..=n).map(FieldElement::from_u64).collect()
    }

    #[tokio::test]
    async fn test_merkle_proof_path_rebuilds_root() {
        let prover = ListMerkleProver;
        let leaves = leaves(5);
        let proof = prover.merkle_proof(&leaves, FieldElement::from_u64(4)).await.unwrap();
        assert_eq!(proof.index, Some(3));
        assert_eq!(proof.siblings.len(), 3);

        let mut node = FieldElement::from_u64(4);
        let mut index = 3usize;
        for sibling in &proof.siblings {
            node = if index % 2 == 0 {
                hash_pair(&node, sibling)
            } else {
                hash_pair(sibling, &node)
            };
            index /= 2;
        }
        assert_eq!(node, proof.root);
    }

    #[tokio::test]
    async fn test_unknown_leaf_has_no_index() {
        let proof = ListMerkleProver
            .merkle_proof(&leaves(3), FieldElement::from_u64(42))
            .await
            .unwrap();
        assert_eq!(proof.index, None);
        assert!(ListMerkleProver.merkle_proof(&[], FieldElement::zero()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_clock_follows_tokio_time() {
        let clock = MockClock::new(1_000);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(clock.now_millis(), 4_000);
    }

    #[tokio::test]
    async fn test_wallet_switch_is_idempotent() {
        let wallet = MockWallet::new(Address::repeat_byte(1));
        wallet.switch_chain(11155111).await.unwrap();
        wallet.switch_chain(11155111).await.unwrap();
        assert_eq!(wallet.switches(), 1);
        assert_eq!(wallet.chain_id(), Some(11155111));
    }
}
