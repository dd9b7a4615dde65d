pub mod aggregate;
pub mod entity;
pub mod report;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub use aggregate::{AggregateReconciler, AggregateReconciliation, Roster};
pub use entity::{EntityReconciler, EntityReconciliation, FetchIssue, PageSizes};
pub use report::{ReconciliationReport, ReportSummary};

/// Differences strictly below one cent count as balanced.
pub const EPSILON: Decimal = dec!(0.01);

pub fn within_tolerance(difference: Decimal) -> bool {
    difference.abs() < EPSILON
}
