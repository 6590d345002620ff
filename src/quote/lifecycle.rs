// Quote state machine: Idle -> Fetching -> Valid -> Expired, with manual and
// extra-gas driven refetches
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::throttle::ThrottleGate;
use super::{QuoteParameters, QuotePhase, QuoteState};
use crate::primitives::{Clock, SystemClock};
use crate::relayer::{QuoteResponse, RelayerClient};
use crate::telemetry::{NotificationKind, Notifier};

pub const QUOTE_EXPIRED_MESSAGE: &str = "Quote has expired. Please request a new quote.";

const TICK: Duration = Duration::from_secs(1);

/// Owns the quote state and its countdown timer. Readers get snapshots via
/// [`QuoteLifecycleManager::subscribe`]; nothing else mutates the state.
#[derive(Clone)]
pub struct QuoteLifecycleManager {
    shared: Arc<Shared>,
}

struct Shared {
    relayer: Arc<dyn RelayerClient>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    /// Single-flight guard: ticket of the request in flight, 0 when idle
    in_flight: AtomicU64,
    next_ticket: AtomicU64,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<QuoteState>,
}

struct Inner {
    state: QuoteState,
    params: QuoteParameters,
    previous_extra_gas: bool,
    /// Commitment whose expiry has already been announced
    expiry_notified: Option<String>,
    /// Bumped on every reset; responses from an older generation are dropped
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

enum Trigger {
    None,
    Fetch,
}

impl QuoteLifecycleManager {
    pub fn new(relayer: Arc<dyn RelayerClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(relayer, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        relayer: Arc<dyn RelayerClient>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state_tx, _) = watch::channel(QuoteState::default());
        Self {
            shared: Arc::new(Shared {
                relayer,
                notifier,
                clock,
                in_flight: AtomicU64::new(0),
                next_ticket: AtomicU64::new(1),
                inner: Mutex::new(Inner {
                    state: QuoteState::default(),
                    params: QuoteParameters::default(),
                    previous_extra_gas: false,
                    expiry_notified: None,
                    generation: 0,
                    timer: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteState> {
        self.shared.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> QuoteState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn is_quote_valid(&self) -> bool {
        self.shared.state_tx.borrow().is_valid()
    }

    pub fn is_fetching(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) != 0
    }

    pub fn phase(&self) -> QuotePhase {
        if self.is_fetching() {
            return QuotePhase::Fetching;
        }
        let state = self.shared.state_tx.borrow();
        if state.is_expired {
            QuotePhase::Expired
        } else if state.is_valid() {
            QuotePhase::Valid
        } else {
            QuotePhase::Idle
        }
    }

    /// Whether the most recently applied parameters allow a quote request
    pub async fn can_request_quote(&self) -> bool {
        self.shared.inner.lock().await.params.can_request_quote()
    }

    /// Evaluate the automatic fetch triggers for a new parameter snapshot
    pub async fn update_parameters(&self, params: QuoteParameters) {
        let trigger = {
            let mut inner = self.shared.inner.lock().await;
            let eligible = params.can_request_quote();
            let material = !inner.params.same_target(&params);
            inner.params = params;
            let extra_gas = inner.params.extra_gas;

            if !eligible {
                if inner.state != QuoteState::empty(extra_gas) {
                    debug!("Quote inputs no longer eligible, resetting quote");
                }
                self.shared.reset_locked(&mut inner);
                Trigger::None
            } else if material {
                debug!("Quote inputs changed, invalidating current quote");
                self.shared.reset_locked(&mut inner);
                inner.previous_extra_gas = extra_gas;
                Trigger::Fetch
            } else if inner.state.quote_commitment.is_some()
                && !inner.state.is_expired
                && inner.previous_extra_gas != extra_gas
            {
                // Silent refresh: keep the current quote until the new one lands
                inner.previous_extra_gas = extra_gas;
                inner.state.extra_gas = extra_gas;
                self.shared.publish(&inner);
                Trigger::Fetch
            } else if inner.state.quote_commitment.is_none() && !inner.state.is_expired {
                inner.previous_extra_gas = extra_gas;
                inner.state.extra_gas = extra_gas;
                Trigger::Fetch
            } else {
                inner.state.extra_gas = extra_gas;
                self.shared.publish(&inner);
                Trigger::None
            }
        };

        if let Trigger::Fetch = trigger {
            self.fetch_quote().await;
        }
    }

    /// Request a quote for the current parameters.
    ///
    /// Returns `false` without doing anything while another request is in
    /// flight. Failures reset the quote and notify the user; there is no
    /// automatic retry.
    pub async fn fetch_quote(&self) -> bool {
        let shared = &self.shared;
        let ticket = shared.next_ticket.fetch_add(1, Ordering::Relaxed);
        if shared
            .in_flight
            .compare_exchange(0, ticket, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Quote request already in flight, dropping");
            return false;
        }

        loop {
            let (request, generation) = {
                let inner = shared.inner.lock().await;
                match inner.params.to_request() {
                    Some(request) => (request, inner.generation),
                    None => break,
                }
            };

            debug!(chain_id = request.chain_id, amount = %request.amount, extra_gas = request.extra_gas,
                "Requesting fee quote");
            let result = shared.relayer.quote(&request).await;

            let mut inner = shared.inner.lock().await;
            if inner.generation != generation {
                debug!("Discarding quote for outdated parameters");
                let still_owner = shared.in_flight.load(Ordering::Acquire) == ticket;
                if still_owner
                    && inner.params.can_request_quote()
                    && inner.state.quote_commitment.is_none()
                    && !inner.state.is_expired
                {
                    continue;
                }
                break;
            }

            // Extra gas toggled while this request was out: the response was
            // signed for the other setting
            if result.is_ok()
                && inner.params.extra_gas != request.extra_gas
                && shared.in_flight.load(Ordering::Acquire) == ticket
            {
                debug!(requested = request.extra_gas, current = inner.params.extra_gas,
                    "Extra gas changed during quote request, refetching");
                continue;
            }

            match result {
                Ok(response) => self.apply_quote(&mut inner, response, request.extra_gas),
                Err(err) => {
                    error!("Quote request failed: {}", err);
                    shared.notifier.notify(
                        NotificationKind::Error,
                        &format!("Failed to get quote: {}", err.summary()),
                    );
                    shared.reset_locked(&mut inner);
                }
            }
            break;
        }

        // A manual retry may have taken over the guard meanwhile
        let _ = shared
            .in_flight
            .compare_exchange(ticket, 0, Ordering::AcqRel, Ordering::Acquire);
        true
    }

    /// Manual recovery after expiry: drop any stuck request, reset and refetch
    pub async fn request_new_quote(&self) {
        self.shared.in_flight.store(0, Ordering::Release);
        let eligible = {
            let mut inner = self.shared.inner.lock().await;
            self.shared.reset_locked(&mut inner);
            inner.previous_extra_gas = inner.params.extra_gas;
            inner.params.can_request_quote()
        };
        if eligible {
            self.fetch_quote().await;
        }
    }

    /// Feed raw parameter changes through a [`ThrottleGate`] into the manager
    pub fn spawn_parameter_feed(
        &self,
        mut params: watch::Receiver<QuoteParameters>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut gate = ThrottleGate::new(interval);
            let initial = params.borrow_and_update().clone();
            if let Some(snapshot) = gate.observe(initial, Instant::now()) {
                manager.update_parameters(snapshot).await;
            }

            loop {
                let deadline = gate.next_deadline();
                tokio::select! {
                    changed = params.changed() => {
                        if changed.is_err() {
                            debug!("Parameter source closed, stopping quote feed");
                            break;
                        }
                        let value = params.borrow_and_update().clone();
                        if let Some(snapshot) = gate.observe(value, Instant::now()) {
                            manager.update_parameters(snapshot).await;
                        }
                    }
                    _ = sleep_until_deadline(deadline) => {
                        if let Some(snapshot) = gate.poll(Instant::now()) {
                            manager.update_parameters(snapshot).await;
                        }
                    }
                }
            }
        })
    }

    fn apply_quote(&self, inner: &mut Inner, response: QuoteResponse, extra_gas: bool) {
        let shared = &self.shared;
        let now = shared.clock.now_millis();
        let remaining = response.fee_commitment.expiration.saturating_sub(now) / 1000;

        info!(fee_bps = response.fee_bps, base_fee_bps = response.base_fee_bps, remaining,
            "💱 Received fee quote");

        inner.state = QuoteState {
            extra_gas_amount_eth: response.extra_gas_amount_eth(),
            quote_commitment: Some(response.fee_commitment),
            fee_bps: Some(response.fee_bps),
            base_fee_bps: Some(response.base_fee_bps),
            extra_gas,
            countdown: remaining,
            is_expired: false,
        };
        inner.expiry_notified = None;

        if remaining == 0 {
            warn!("Relayer returned an already expired quote");
            shared.expire_locked(inner);
        }
        shared.publish(inner);
        Shared::arm_timer(shared, inner);
    }
}

impl Shared {
    fn publish(&self, inner: &Inner) {
        self.state_tx.send_replace(inner.state.clone());
    }

    fn reset_locked(&self, inner: &mut Inner) {
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.state = QuoteState::empty(inner.params.extra_gas);
        self.publish(inner);
    }

    /// Mark the quote expired and announce it once per commitment
    fn expire_locked(&self, inner: &mut Inner) {
        inner.state.countdown = 0;
        inner.state.is_expired = true;

        let Some(quote_id) = inner.state.signed_commitment().map(str::to_owned) else {
            return;
        };
        if inner.expiry_notified.as_deref() != Some(quote_id.as_str()) {
            inner.expiry_notified = Some(quote_id);
            info!("⌛ Fee quote expired");
            self.notifier.notify(NotificationKind::Warning, QUOTE_EXPIRED_MESSAGE);
        }
    }

    /// Replace the countdown task for the current commitment
    fn arm_timer(this: &Arc<Shared>, inner: &mut Inner) {
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        if !inner.state.is_valid() {
            return;
        }
        let Some(quote_id) = inner.state.signed_commitment().map(str::to_owned) else {
            return;
        };
        let weak = Arc::downgrade(this);
        let start = inner.state.countdown;
        inner.timer = Some(tokio::spawn(run_countdown(weak, quote_id, start)));
    }
}

async fn run_countdown(shared: Weak<Shared>, quote_id: String, mut remaining: u64) {
    let mut ticker = tokio::time::interval_at(Instant::now() + TICK, TICK);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut inner = shared.inner.lock().await;
        if inner.state.is_expired || inner.state.signed_commitment() != Some(quote_id.as_str()) {
            return;
        }

        remaining = remaining.saturating_sub(1);
        inner.state.countdown = remaining;

        if remaining == 0 {
            inner.timer = None;
            shared.expire_locked(&mut inner);
            shared.publish(&inner);
            return;
        }
        shared.publish(&inner);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
