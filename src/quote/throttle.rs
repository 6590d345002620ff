// Coalesces bursts of parameter changes into stable snapshots at a bounded rate
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between two snapshots handed to the quote manager
pub const QUOTE_THROTTLE_INTERVAL: Duration = Duration::from_secs(20);

/// Leading/trailing-edge throttle over explicit instants.
///
/// The first change after an idle interval is released immediately. Changes
/// arriving inside the interval replace each other as a single pending value
/// that is released once the interval since the last release has elapsed.
#[derive(Debug, Clone)]
pub struct ThrottleGate<T> {
    interval: Duration,
    last_emitted: Option<T>,
    last_emit_at: Option<Instant>,
    pending: Option<T>,
}

impl<T: Clone + PartialEq> ThrottleGate<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: None,
            last_emit_at: None,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a newly observed value; returns it if it may be released now
    pub fn observe(&mut self, value: T, now: Instant) -> Option<T> {
        if self.last_emitted.as_ref() == Some(&value) {
            // Burst ended where it started
            self.pending = None;
            return None;
        }

        match self.last_emit_at {
            Some(at) if now.saturating_duration_since(at) < self.interval => {
                self.pending = Some(value);
                None
            }
            _ => Some(self.emit(value, now)),
        }
    }

    /// Release the pending value if its window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let due = self.next_deadline()?;
        if now < due {
            return None;
        }
        let value = self.pending.take()?;
        Some(self.emit(value, now))
    }

    /// When the pending value becomes releasable, if there is one
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(match self.last_emit_at {
            Some(at) => at + self.interval,
            None => Instant::now(),
        })
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_emitted(&self) -> Option<&T> {
        self.last_emitted.as_ref()
    }

    fn emit(&mut self, value: T, now: Instant) -> T {
        self.pending = None;
        self.last_emit_at = Some(now);
        self.last_emitted = Some(value.clone());
        value
    }
}
