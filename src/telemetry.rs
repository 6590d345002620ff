// User notifications and failure telemetry
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::classifier::FailureKind;
use crate::primitives::{Address, ChainId, WithdrawError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

/// Channel through which the user sees errors, warnings and status
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, message: &str);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Error => error!(target: "notification", "{}", message),
            NotificationKind::Warning => warn!(target: "notification", "{}", message),
            NotificationKind::Info => info!(target: "notification", "{}", message),
        }
    }
}

/// Forwards notifications to a receiver, e.g. a UI loop
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        // A dropped receiver only means nobody is listening any more
        let _ = self.sender.send(Notification {
            kind,
            message: message.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Quote,
    Withdraw,
    Ragequit,
}

/// Failure enriched with the operation metadata
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub operation: Operation,
    pub step: &'static str,
    pub kind: FailureKind,
    pub error: String,
    pub chain_id: Option<ChainId>,
    pub pool_address: Option<Address>,
    pub entry_point: Option<Address>,
    pub test_mode: bool,
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Breadcrumb {
    pub operation: Operation,
    pub message: String,
    pub data: Map<String, Value>,
}

/// Error reporting backend
pub trait TelemetrySink: Send + Sync {
    fn capture_failure(&self, report: &FailureReport);
    fn breadcrumb(&self, crumb: &Breadcrumb);
}

/// Emits reports as structured tracing events
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn capture_failure(&self, report: &FailureReport) {
        let context = Value::Object(report.context.clone());
        error!(
            operation = ?report.operation,
            step = report.step,
            kind = ?report.kind,
            chain_id = ?report.chain_id,
            pool = ?report.pool_address.map(|a| a.to_string()),
            test_mode = report.test_mode,
            %context,
            "{}",
            report.error
        );
    }

    fn breadcrumb(&self, crumb: &Breadcrumb) {
        let data = Value::Object(crumb.data.clone());
        info!(operation = ?crumb.operation, %data, "{}", crumb.message);
    }
}

/// Shared metadata attached to every failure of one operation
#[derive(Debug, Clone)]
pub struct OperationScope {
    pub operation: Operation,
    pub chain_id: Option<ChainId>,
    pub pool_address: Option<Address>,
    pub entry_point: Option<Address>,
    pub test_mode: bool,
}

/// Builds a JSON context map from `(key, value)` pairs
pub fn context<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Enrich, forward and condense a failure at an orchestration boundary.
///
/// Reportable kinds reach the telemetry sink; every failure produces exactly
/// one user notification. Wallet cancellations are shown as info only.
pub fn report_failure(
    telemetry: &dyn TelemetrySink,
    notifier: &dyn Notifier,
    scope: &OperationScope,
    step: &'static str,
    err: &WithdrawError,
    extra: Map<String, Value>,
) {
    let kind = err.kind();

    if kind.is_reportable() {
        let report = FailureReport {
            operation: scope.operation,
            step,
            kind,
            error: err.to_string(),
            chain_id: scope.chain_id,
            pool_address: scope.pool_address,
            entry_point: scope.entry_point,
            test_mode: scope.test_mode,
            context: extra,
        };
        telemetry.capture_failure(&report);
    } else {
        warn!(step, kind = ?kind, "Not reporting expected failure: {}", err);
    }

    let notification_kind = match kind {
        FailureKind::UserCancelled => NotificationKind::Info,
        FailureKind::InputIneligible => NotificationKind::Warning,
        _ => NotificationKind::Error,
    };
    notifier.notify(notification_kind, &err.user_message());
}
