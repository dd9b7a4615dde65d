use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::reconcile::{
    aggregate::AggregateReconciliation,
    entity::{EntityReconciliation, FetchIssue},
};

/// Headline counters over the per-member results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_entities: usize,
    pub balanced_count: usize,
    pub unbalanced_count: usize,
    pub partial_count: usize,
    pub unparsed_entry_count: usize,
    /// `balanced / total` in `0.0..=1.0`; zero for an empty run.
    pub accuracy_rate: f64,
    pub total_abs_difference: Decimal,
    pub average_abs_difference: Decimal,
}

impl ReportSummary {
    pub fn from_entities(entities: &[EntityReconciliation]) -> Self {
        let total_entities = entities.len();
        let balanced_count = entities.iter().filter(|e| e.is_balanced).count();
        let total_abs_difference: Decimal = entities.iter().map(|e| e.difference.abs()).sum();

        let (accuracy_rate, average_abs_difference) = if total_entities == 0 {
            (0.0, Decimal::ZERO)
        } else {
            (
                balanced_count as f64 / total_entities as f64,
                (total_abs_difference / Decimal::from(total_entities)).round_dp(2),
            )
        };

        ReportSummary {
            total_entities,
            balanced_count,
            unbalanced_count: total_entities - balanced_count,
            partial_count: entities.iter().filter(|e| e.is_partial()).count(),
            unparsed_entry_count: entities.iter().map(|e| e.unparsed_entries.len()).sum(),
            accuracy_rate,
            total_abs_difference,
            average_abs_difference,
        }
    }

    pub fn accuracy_percent(&self) -> f64 {
        self.accuracy_rate * 100.0
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub generated_at: DateTime<Utc>,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub summary: ReportSummary,
    pub aggregate: AggregateReconciliation,
    pub entities: Vec<EntityReconciliation>,
    /// Run-level fetch problems (roster, turnover). Per-member problems live
    /// on each entity.
    pub diagnostics: Vec<FetchIssue>,
}

impl ReconciliationReport {
    pub fn new(
        since: NaiveDate,
        until: NaiveDate,
        entities: Vec<EntityReconciliation>,
        aggregate: AggregateReconciliation,
        diagnostics: Vec<FetchIssue>,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            since,
            until,
            summary: ReportSummary::from_entities(&entities),
            aggregate,
            entities,
            diagnostics,
        }
    }

    /// The `n` unbalanced members with the largest absolute difference.
    pub fn top_unbalanced(&self, n: usize) -> &[EntityReconciliation] {
        let unbalanced = &self.aggregate.unbalanced;
        &unbalanced[..n.min(unbalanced.len())]
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityReconciliation> {
        self.entities.iter().find(|e| e.entity.id == entity_id)
    }

    /// True when any input of the run was incomplete.
    pub fn is_partial(&self) -> bool {
        !self.diagnostics.is_empty() || self.summary.partial_count > 0 || !self.aggregate.turnover_complete
    }
}
