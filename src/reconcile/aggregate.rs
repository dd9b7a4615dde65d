use chrono::NaiveDate;
use futures::stream::{self, StreamExt, TryStreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::{
    error::{ReconcileError, Result},
    models::{BalanceSnapshot, Entity, TurnoverLine},
    platform::{
        endpoints::{self, TURNOVER},
        types::{CardRow, TurnoverRow},
        PageWalk, Pager,
    },
    reconcile::{
        entity::{EntityReconciler, EntityReconciliation, FetchIssue},
        report::ReconciliationReport,
        within_tolerance,
    },
    utils::format_money,
};

const PROGRESS_EVERY: usize = 10;

/// Every member holding at least one card, with their cards, in listing order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub members: Vec<(Entity, Vec<BalanceSnapshot>)>,
    pub complete: bool,
    pub diagnostics: Vec<FetchIssue>,
}

impl Roster {
    /// Group card snapshots by owning member, keeping first-seen order.
    pub fn from_cards(cards: impl IntoIterator<Item = BalanceSnapshot>) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut members: Vec<(Entity, Vec<BalanceSnapshot>)> = Vec::new();

        for card in cards {
            match index.get(&card.entity_id) {
                Some(&i) => members[i].1.push(card),
                None => {
                    index.insert(card.entity_id.clone(), members.len());
                    let entity = Entity {
                        id: card.entity_id.clone(),
                        name: card.holder_name.clone(),
                        contact: card.holder_contact.clone(),
                    };
                    members.push((entity, vec![card]));
                }
            }
        }

        Roster {
            members,
            complete: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Venue-wide verdict: turnover sales against balances plus net consumption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReconciliation {
    pub roster_size: usize,
    pub reconciled_count: usize,
    pub total_sales_amount: Decimal,
    pub total_member_balance: Decimal,
    pub total_net_consumption: Decimal,
    pub total_gross_consumption: Decimal,
    pub total_cancelled_amount: Decimal,
    /// Sum of members' top-ups since the start date.
    pub total_purchase: Decimal,
    /// `total_purchase - total_sales_amount`; non-zero means the two sources disagree.
    pub purchase_difference: Decimal,
    pub difference: Decimal,
    pub is_balanced: bool,
    pub turnover_complete: bool,
    pub turnover_lines: Vec<TurnoverLine>,
    /// Unbalanced members, largest absolute difference first.
    pub unbalanced: Vec<EntityReconciliation>,
    pub explanation: Option<String>,
}

impl AggregateReconciliation {
    /// Fold per-member results and the turnover summary. Without a complete
    /// turnover summary the venue is never reported balanced.
    pub fn fold(
        results: &[EntityReconciliation],
        turnover: &[TurnoverLine],
        turnover_complete: bool,
        roster_size: usize,
    ) -> Self {
        let total_sales_amount: Decimal = turnover.iter().map(TurnoverLine::total).sum();
        let total_member_balance: Decimal = results.iter().map(|r| r.current_balance).sum();
        let total_net_consumption: Decimal = results.iter().map(|r| r.net_consumption).sum();
        let total_gross_consumption: Decimal = results.iter().map(|r| r.gross_consumption).sum();
        let total_cancelled_amount: Decimal = results.iter().map(|r| r.cancelled_amount).sum();
        let total_purchase: Decimal = results.iter().map(|r| r.total_purchase).sum();

        let difference = total_sales_amount - (total_member_balance + total_net_consumption);
        let is_balanced = turnover_complete && within_tolerance(difference);

        let mut unbalanced: Vec<EntityReconciliation> =
            results.iter().filter(|r| !r.is_balanced).cloned().collect();
        unbalanced.sort_by(|a, b| {
            b.difference
                .abs()
                .cmp(&a.difference.abs())
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });

        let explanation = if is_balanced {
            None
        } else if !turnover_complete {
            Some(format!(
                "Turnover summary unavailable; member balances {} plus net consumption {} could not be checked against sales",
                format_money(total_member_balance),
                format_money(total_net_consumption)
            ))
        } else {
            let member_gap: Decimal = unbalanced.iter().map(|r| r.difference).sum();
            let likely_cause = if difference > Decimal::ZERO {
                "turnover exceeds balances plus consumption; most likely consumption records or members missing from the roster"
            } else {
                "balances plus consumption exceed turnover; most likely payment records missing from the turnover source"
            };
            Some(format!(
                "Sales {} vs balances {} + net consumption {}: gap {}, {}. {} members unbalanced, summing to {}",
                format_money(total_sales_amount),
                format_money(total_member_balance),
                format_money(total_net_consumption),
                format_money(difference),
                likely_cause,
                unbalanced.len(),
                format_money(member_gap)
            ))
        };

        AggregateReconciliation {
            roster_size,
            reconciled_count: results.len(),
            total_sales_amount,
            total_member_balance,
            total_net_consumption,
            total_gross_consumption,
            total_cancelled_amount,
            total_purchase,
            purchase_difference: total_purchase - total_sales_amount,
            difference,
            is_balanced,
            turnover_complete,
            turnover_lines: turnover.to_vec(),
            unbalanced,
            explanation,
        }
    }
}

/// Reconciles every member of the store, then the venue as a whole.
pub struct AggregateReconciler {
    entities: EntityReconciler,
    roster_pager: Pager,
    concurrency: usize,
}

impl AggregateReconciler {
    pub fn new(entities: EntityReconciler, roster_page_delay: Duration, concurrency: usize) -> Self {
        let roster_pager = entities.pager().with_page_delay(roster_page_delay);
        Self {
            entities,
            roster_pager,
            concurrency: concurrency.max(1),
        }
    }

    pub fn entities(&self) -> &EntityReconciler {
        &self.entities
    }

    /// Walk the card listing and group it into members. An empty roster
    /// aborts the run; a truncated one is recorded and used as-is.
    pub async fn fetch_roster(&self) -> Result<Roster> {
        let walk = self.entities.fetch_card_rows(&self.roster_pager).await?;
        let diagnostics = FetchIssue::from_walk("card roster", &walk);
        let complete = walk.complete;

        let mut roster = Roster::from_cards(walk.records.into_iter().filter_map(CardRow::into_snapshot));
        roster.complete = complete;
        roster.diagnostics = diagnostics;

        if roster.is_empty() {
            return Err(ReconcileError::EmptyRoster);
        }
        if !roster.complete {
            warn!("Card roster is incomplete, continuing with {} members", roster.len());
        }
        info!("Roster: {} members", roster.len());
        Ok(roster)
    }

    pub async fn fetch_turnover(&self, since: NaiveDate, until: NaiveDate) -> Result<PageWalk<TurnoverLine>> {
        let walk: PageWalk<TurnoverRow> = self
            .entities
            .pager()
            .fetch_single(
                &TURNOVER,
                &endpoints::turnover_params(self.entities.store_id(), since, until),
            )
            .await?;
        Ok(walk.map(TurnoverLine::from))
    }

    /// Reconcile every roster member, at most `concurrency` at a time.
    /// Results keep roster order.
    pub async fn reconcile_members(&self, roster: &Roster, since: NaiveDate) -> Result<Vec<EntityReconciliation>> {
        let total = roster.len();
        let mut processed = 0usize;

        let results: Vec<Option<EntityReconciliation>> = stream::iter(roster.members.iter())
            .map(|(entity, cards)| self.entities.reconcile_entity(entity, cards, since))
            .buffered(self.concurrency)
            .inspect(|_| {
                processed += 1;
                if processed % PROGRESS_EVERY == 0 || processed == total {
                    info!("Reconciled {}/{} members", processed, total);
                }
            })
            .try_collect()
            .await?;

        Ok(results.into_iter().flatten().collect())
    }

    /// Run a full reconciliation from `since` up to today and assemble the
    /// report. Balances are live snapshots, so the turnover window always
    /// ends today to cover the same records as the member walks.
    pub async fn run(&self, since: NaiveDate) -> Result<ReconciliationReport> {
        let until = chrono::Local::now().date_naive();
        let started = Instant::now();
        info!(
            "Reconciling store {} from {} to {}",
            self.entities.store_id(),
            since,
            until
        );

        let roster = self.fetch_roster().await?;
        let results = self.reconcile_members(&roster, since).await?;

        let turnover = self.fetch_turnover(since, until).await?;
        let mut diagnostics = roster.diagnostics.clone();
        diagnostics.extend(FetchIssue::from_walk("turnover", &turnover));
        if !turnover.complete {
            warn!("Turnover summary unavailable, venue total cannot be balanced");
        }

        let aggregate =
            AggregateReconciliation::fold(&results, &turnover.records, turnover.complete, roster.len());
        let report = ReconciliationReport::new(since, until, results, aggregate, diagnostics);

        info!(
            "Reconciliation finished in {:.1}s: {}/{} balanced, venue difference {}",
            started.elapsed().as_secs_f64(),
            report.summary.balanced_count,
            report.summary.total_entities,
            report.aggregate.difference
        );
        Ok(report)
    }

    /// Venue-wide verdict from `since` up to today.
    pub async fn reconcile_all(&self, since: NaiveDate) -> Result<AggregateReconciliation> {
        Ok(self.run(since).await?.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ConsumptionTally, LedgerParser};
    use crate::platform::client::MockListingApi;
    use crate::reconcile::entity::PageSizes;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    fn snapshot(card: &str, entity: &str, value: Decimal) -> BalanceSnapshot {
        BalanceSnapshot {
            card_id: card.to_string(),
            entity_id: entity.to_string(),
            card_kind: "4".to_string(),
            card_name: "Stored Value".to_string(),
            value,
            reported_purchase_total: Decimal::ZERO,
            holder_name: format!("member {}", entity),
            holder_contact: String::new(),
        }
    }

    fn result(entity: &str, balance: Decimal, net: Decimal, difference: Decimal) -> EntityReconciliation {
        let tally = ConsumptionTally {
            gross_consumption: net,
            ..Default::default()
        };
        let payments = Vec::new();
        let mut r = EntityReconciliation::compute(
            &Entity {
                id: entity.to_string(),
                name: String::new(),
                contact: String::new(),
            },
            &[snapshot("c", entity, balance)],
            payments,
            tally,
            vec![],
        );
        r.difference = difference;
        r.is_balanced = within_tolerance(difference);
        r
    }

    fn line(sales: Decimal, renewals: Decimal) -> TurnoverLine {
        TurnoverLine {
            card_id: "1".to_string(),
            card_name: "Stored Value".to_string(),
            sales_count: 1,
            sales_amount: sales,
            renewal_count: 0,
            renewal_amount: renewals,
        }
    }

    #[test]
    fn test_roster_groups_cards_by_member() {
        let roster = Roster::from_cards(vec![
            snapshot("c1", "7", dec!(10)),
            snapshot("c2", "8", dec!(5)),
            snapshot("c3", "7", dec!(1)),
        ]);
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.members[0].0.id, "7");
        assert_eq!(roster.members[0].1.len(), 2);
        assert_eq!(roster.members[1].0.id, "8");
    }

    #[test]
    fn test_fold_balanced_venue() {
        let results = vec![
            result("1", dec!(200), dec!(300), dec!(0)),
            result("2", dec!(100), dec!(400), dec!(0)),
        ];
        let agg = AggregateReconciliation::fold(&results, &[line(dec!(800), dec!(200))], true, 2);
        assert_eq!(agg.total_sales_amount, dec!(1000));
        assert_eq!(agg.total_member_balance, dec!(300));
        assert_eq!(agg.total_net_consumption, dec!(700));
        assert_eq!(agg.difference, Decimal::ZERO);
        assert!(agg.is_balanced);
        assert!(agg.unbalanced.is_empty());
        assert!(agg.explanation.is_none());
    }

    #[test]
    fn test_unbalanced_sorted_by_magnitude_then_id() {
        let results = vec![
            result("b", dec!(0), dec!(0), dec!(4)),
            result("c", dec!(0), dec!(0), dec!(-188)),
            result("a", dec!(0), dec!(0), dec!(-4)),
            result("d", dec!(0), dec!(0), dec!(0.001)),
        ];
        let agg = AggregateReconciliation::fold(&results, &[line(dec!(10), dec!(0))], true, 4);
        let ids: Vec<&str> = agg.unbalanced.iter().map(|r| r.entity.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(agg.explanation.unwrap().contains("3 members unbalanced"));
    }

    #[test]
    fn test_missing_turnover_never_balanced() {
        let agg = AggregateReconciliation::fold(&[], &[], false, 0);
        assert_eq!(agg.difference, Decimal::ZERO);
        assert!(!agg.is_balanced);
        assert!(agg.explanation.unwrap().contains("unavailable"));
    }

    fn reconciler(api: MockListingApi) -> AggregateReconciler {
        let pager = Pager::new(Arc::new(api), Duration::from_secs(10), Duration::ZERO);
        let entities = EntityReconciler::new(
            pager,
            LedgerParser::new("2").unwrap(),
            "1517",
            PageSizes::default(),
        );
        AggregateReconciler::new(entities, Duration::ZERO, 2)
    }

    #[tokio::test]
    async fn test_empty_roster_aborts() {
        let mut api = MockListingApi::new();
        api.expect_post()
            .times(1)
            .returning(|_, _| Ok(json!({ "orsuccess": "0", "Msg": "没有数据" })));

        let err = reconciler(api).fetch_roster().await.unwrap_err();
        assert!(matches!(err, ReconcileError::EmptyRoster));
    }

    #[tokio::test]
    async fn test_turnover_failure_is_incomplete_not_error() {
        let mut api = MockListingApi::new();
        api.expect_post()
            .times(1)
            .returning(|_, _| Err(ReconcileError::Status(502)));

        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let walk = reconciler(api).fetch_turnover(day, day).await.unwrap();
        assert!(!walk.complete);
        assert!(walk.records.is_empty());
    }
}
