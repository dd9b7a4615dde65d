use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{reconcile::ReconciliationReport, utils::format_money};

/// How many low-accuracy members an alert names before summarising.
const NAMED_MEMBERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    VenueUnbalanced,
    LowAccuracyRate,
    LowMemberAccuracy,
    PartialData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

/// Conditions in `report` an operator should hear about. `threshold` is
/// a percentage.
pub fn alerts_for(report: &ReconciliationReport, threshold: f64) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if !report.aggregate.is_balanced {
        alerts.push(Alert {
            kind: AlertKind::VenueUnbalanced,
            message: report
                .aggregate
                .explanation
                .clone()
                .unwrap_or_else(|| format!("Venue difference {}", format_money(report.aggregate.difference))),
        });
    }

    let rate = report.summary.accuracy_percent();
    if rate < threshold {
        alerts.push(Alert {
            kind: AlertKind::LowAccuracyRate,
            message: format!(
                "Accuracy rate {:.1}% is below {:.1}% ({} of {} members balanced)",
                rate, threshold, report.summary.balanced_count, report.summary.total_entities
            ),
        });
    }

    let member_threshold = Decimal::from_f64(threshold).unwrap_or(Decimal::ONE_HUNDRED);
    let low: Vec<String> = report
        .aggregate
        .unbalanced
        .iter()
        .filter(|e| e.balance_accuracy < member_threshold)
        .map(|e| format!("{} ({}%, {})", e.entity.id, e.balance_accuracy, format_money(e.difference)))
        .collect();
    if !low.is_empty() {
        let mut message = format!("{} members below {:.1}% accuracy: ", low.len(), threshold);
        message.push_str(&low.iter().take(NAMED_MEMBERS).cloned().collect::<Vec<_>>().join(", "));
        if low.len() > NAMED_MEMBERS {
            message.push_str(&format!(" and {} more", low.len() - NAMED_MEMBERS));
        }
        alerts.push(Alert {
            kind: AlertKind::LowMemberAccuracy,
            message,
        });
    }

    if report.is_partial() {
        alerts.push(Alert {
            kind: AlertKind::PartialData,
            message: format!(
                "Run used partial data: {} members incomplete, {} run-level fetch issues",
                report.summary.partial_count,
                report.diagnostics.len()
            ),
        });
    }

    alerts
}

/// Delivery channel for run outcomes. Called by the binary, never by the
/// reconcilers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_report(&self, report: &ReconciliationReport);

    async fn notify_alert(&self, alert: &Alert);

    async fn notify_error(&self, message: &str);
}

/// Writes notifications to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_report(&self, report: &ReconciliationReport) {
        info!(
            "Reconciliation {}..{}: {}/{} members balanced, venue difference {}",
            report.since,
            report.until,
            report.summary.balanced_count,
            report.summary.total_entities,
            format_money(report.aggregate.difference)
        );
    }

    async fn notify_alert(&self, alert: &Alert) {
        warn!("[{:?}] {}", alert.kind, alert.message);
    }

    async fn notify_error(&self, message: &str) {
        error!("Reconciliation failed: {}", message);
    }
}

/// Send the report summary followed by every alert.
pub async fn dispatch(notifier: &dyn Notifier, report: &ReconciliationReport, threshold: f64) -> usize {
    notifier.notify_report(report).await;
    let alerts = alerts_for(report, threshold);
    for alert in &alerts {
        notifier.notify_alert(alert).await;
    }
    alerts.len()
}
