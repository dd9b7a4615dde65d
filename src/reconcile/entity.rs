use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::{ReconcileError, Result},
    ledger::{ConsumptionTally, LedgerParser},
    models::{BalanceSnapshot, Entity, LedgerEntry, PaymentRecord},
    platform::{
        endpoints::{self, CARD_BALANCES, LEDGER, PAYMENTS},
        types::{CardRow, LedgerRow, PaymentRow},
        PageWalk, Pager,
    },
    reconcile::within_tolerance,
    utils::{is_on_or_after, mask_contact},
};

/// Something that went wrong while collecting one entity's data. The
/// reconciliation still stands, computed from what was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchIssue {
    pub source: String,
    pub detail: String,
}

impl FetchIssue {
    pub fn new(source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            detail: detail.into(),
        }
    }

    /// Issues raised by a page walk, if any.
    pub fn from_walk<T>(source: &str, walk: &PageWalk<T>) -> Vec<FetchIssue> {
        let mut issues = Vec::new();
        if let Some(cause) = &walk.truncated_by {
            issues.push(FetchIssue::new(source, format!("truncated: {}", cause)));
        }
        if walk.skipped > 0 {
            issues.push(FetchIssue::new(
                source,
                format!("{} undecodable rows skipped", walk.skipped),
            ));
        }
        issues
    }
}

/// The reconciliation verdict for one member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReconciliation {
    pub entity: Entity,
    pub card_count: usize,
    pub card_names: Vec<String>,
    pub total_purchase: Decimal,
    pub current_balance: Decimal,
    pub gross_consumption: Decimal,
    pub cancelled_amount: Decimal,
    pub net_consumption: Decimal,
    pub calculated_balance: Decimal,
    pub difference: Decimal,
    pub is_balanced: bool,
    /// `(calculated - |difference|) / calculated` as a percentage.
    pub balance_accuracy: Decimal,
    pub payment_count: usize,
    pub consumption_count: usize,
    pub cancellation_count: usize,
    pub fallback_count: usize,
    pub ledger_entries_examined: usize,
    pub payments: Vec<PaymentRecord>,
    pub unparsed_entries: Vec<LedgerEntry>,
    pub diagnostics: Vec<FetchIssue>,
}

impl EntityReconciliation {
    /// Derive the verdict from already-fetched data. Pure: identical inputs
    /// give identical output.
    pub fn compute(
        entity: &Entity,
        cards: &[BalanceSnapshot],
        payments: Vec<PaymentRecord>,
        tally: ConsumptionTally,
        diagnostics: Vec<FetchIssue>,
    ) -> Self {
        let total_purchase: Decimal = payments.iter().map(|p| p.amount).sum();
        let current_balance: Decimal = cards.iter().map(|c| c.value).sum();
        let net_consumption = tally.net_consumption();
        let calculated_balance = total_purchase - net_consumption;
        let difference = calculated_balance - current_balance;

        let balance_accuracy = if calculated_balance > Decimal::ZERO {
            ((calculated_balance - difference.abs()) / calculated_balance * Decimal::ONE_HUNDRED)
                .round_dp(2)
        } else {
            Decimal::ONE_HUNDRED
        };

        EntityReconciliation {
            entity: Entity {
                id: entity.id.clone(),
                name: entity.name.clone(),
                contact: mask_contact(&entity.contact),
            },
            card_count: cards.len(),
            card_names: cards.iter().map(|c| c.card_name.clone()).collect(),
            total_purchase,
            current_balance,
            gross_consumption: tally.gross_consumption,
            cancelled_amount: tally.cancelled_amount,
            net_consumption,
            calculated_balance,
            difference,
            is_balanced: within_tolerance(difference),
            balance_accuracy,
            payment_count: payments.len(),
            consumption_count: tally.consumption_count,
            cancellation_count: tally.cancellation_count,
            fallback_count: tally.fallback_count,
            ledger_entries_examined: tally.examined,
            payments,
            unparsed_entries: tally.unparsed,
            diagnostics,
        }
    }

    /// True when some of this entity's data could not be fetched.
    pub fn is_partial(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Page sizes per listing endpoint.
#[derive(Debug, Clone, Copy)]
pub struct PageSizes {
    pub cards: usize,
    pub payments: usize,
    pub ledger: usize,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            cards: 100,
            payments: 50,
            ledger: 100,
        }
    }
}

/// Reconciles a single member: balances vs. top-ups minus net consumption.
pub struct EntityReconciler {
    pager: Pager,
    parser: LedgerParser,
    store_id: String,
    page_sizes: PageSizes,
}

impl EntityReconciler {
    pub fn new(pager: Pager, parser: LedgerParser, store_id: &str, page_sizes: PageSizes) -> Self {
        Self {
            pager,
            parser,
            store_id: store_id.to_string(),
            page_sizes,
        }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Walk the store's whole membership-card listing.
    pub async fn fetch_card_rows(&self, pager: &Pager) -> Result<PageWalk<CardRow>> {
        pager
            .fetch_all_pages(
                &CARD_BALANCES,
                &endpoints::card_listing_params(&self.store_id),
                self.page_sizes.cards,
            )
            .await
    }

    /// Reconcile one member by id, fetching their cards first.
    ///
    /// Returns `None` when the member holds no membership card. If the card
    /// listing was cut short before any of their cards turned up, that is
    /// `IncompleteListing` rather than a definite absence.
    pub async fn reconcile(
        &self,
        entity_id: &str,
        since: NaiveDate,
    ) -> Result<Option<EntityReconciliation>> {
        let walk = self.fetch_card_rows(&self.pager).await?;
        let mut issues = FetchIssue::from_walk("card balances", &walk);

        let cards: Vec<BalanceSnapshot> = walk
            .records
            .into_iter()
            .filter(|row| row.belongs_to(entity_id))
            .filter_map(CardRow::into_snapshot)
            .collect();

        let Some(first) = cards.first() else {
            if !walk.complete {
                warn!(
                    "No cards found for member {} but the card listing was truncated",
                    entity_id
                );
                return Err(ReconcileError::IncompleteListing {
                    entity_id: entity_id.to_string(),
                    reason: walk.truncated_by.unwrap_or_default(),
                });
            }
            info!("Member {} holds no membership card, nothing to reconcile", entity_id);
            return Ok(None);
        };

        let entity = Entity {
            id: entity_id.to_string(),
            name: first.holder_name.clone(),
            contact: first.holder_contact.clone(),
        };

        let mut result = self.reconcile_entity(&entity, &cards, since).await?;
        if let Some(r) = result.as_mut() {
            issues.append(&mut r.diagnostics);
            r.diagnostics = issues;
        }
        Ok(result)
    }

    /// Reconcile a member whose cards are already known.
    pub async fn reconcile_entity(
        &self,
        entity: &Entity,
        cards: &[BalanceSnapshot],
        since: NaiveDate,
    ) -> Result<Option<EntityReconciliation>> {
        if cards.is_empty() {
            return Ok(None);
        }

        let mut diagnostics = Vec::new();

        let payments = self.fetch_payments(&entity.id, since, &mut diagnostics).await?;
        let entries = self.fetch_ledger(&entity.id, cards, since, &mut diagnostics).await?;
        let tally = ConsumptionTally::fold(&self.parser, &entries);

        let result = EntityReconciliation::compute(entity, cards, payments, tally, diagnostics);

        debug!(
            "Member {} ({}): purchase {} balance {} net {} difference {}{}",
            result.entity.id,
            result.entity.name,
            result.total_purchase,
            result.current_balance,
            result.net_consumption,
            result.difference,
            if result.is_partial() { " [partial]" } else { "" }
        );
        if !result.unparsed_entries.is_empty() {
            warn!(
                "Member {}: {} ledger entries could not be parsed",
                result.entity.id,
                result.unparsed_entries.len()
            );
        }

        Ok(Some(result))
    }

    async fn fetch_payments(
        &self,
        entity_id: &str,
        since: NaiveDate,
        diagnostics: &mut Vec<FetchIssue>,
    ) -> Result<Vec<PaymentRecord>> {
        let walk: PageWalk<PaymentRow> = self
            .pager
            .fetch_all_pages(
                &PAYMENTS,
                &endpoints::payment_params(&self.store_id, entity_id),
                self.page_sizes.payments,
            )
            .await?;
        diagnostics.extend(FetchIssue::from_walk("payments", &walk));

        let mut payments: Vec<PaymentRecord> = walk
            .records
            .into_iter()
            .map(|row| row.into_record(entity_id))
            .filter(|p| is_on_or_after(p.timestamp, since))
            .collect();
        // Stable: ties keep the platform's insertion order.
        payments.sort_by_key(|p| p.timestamp);
        Ok(payments)
    }

    async fn fetch_ledger(
        &self,
        entity_id: &str,
        cards: &[BalanceSnapshot],
        since: NaiveDate,
        diagnostics: &mut Vec<FetchIssue>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();

        for card in cards {
            let walk: PageWalk<LedgerRow> = self
                .pager
                .fetch_all_pages(
                    &LEDGER,
                    &endpoints::ledger_params(entity_id, &card.card_id),
                    self.page_sizes.ledger,
                )
                .await?;
            diagnostics.extend(FetchIssue::from_walk(
                &format!("ledger (card {})", card.card_id),
                &walk,
            ));

            entries.extend(
                walk.records
                    .into_iter()
                    .map(|row| row.into_entry(entity_id, &card.card_id))
                    .filter(|e| is_on_or_after(e.timestamp, since)),
            );
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderKind;
    use crate::platform::client::MockListingApi;
    use crate::utils::parse_platform_timestamp;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn entity() -> Entity {
        Entity {
            id: "42".to_string(),
            name: "Li Si".to_string(),
            contact: "13812345678".to_string(),
        }
    }

    fn card(id: &str, value: Decimal) -> BalanceSnapshot {
        BalanceSnapshot {
            card_id: id.to_string(),
            entity_id: "42".to_string(),
            card_kind: "4".to_string(),
            card_name: "Stored Value".to_string(),
            value,
            reported_purchase_total: Decimal::ZERO,
            holder_name: "Li Si".to_string(),
            holder_contact: "13812345678".to_string(),
        }
    }

    fn payment(amount: Decimal) -> PaymentRecord {
        PaymentRecord {
            id: "p".to_string(),
            entity_id: "42".to_string(),
            amount,
            timestamp: parse_platform_timestamp("2025/6/1"),
            raw_timestamp: "2025/6/1".to_string(),
            order_ref: String::new(),
            order_kind: OrderKind::FirstPurchase,
            card_name: String::new(),
            note: String::new(),
        }
    }

    fn ledger(id: &str, narrative: &str) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            entity_id: "42".to_string(),
            card_id: "c1".to_string(),
            kind_code: "2".to_string(),
            narrative: narrative.to_string(),
            declared_amount: None,
            timestamp: parse_platform_timestamp("2025/6/2 10:00:00"),
            raw_timestamp: String::new(),
            operator: String::new(),
        }
    }

    fn tally(entries: &[LedgerEntry]) -> ConsumptionTally {
        ConsumptionTally::fold(&LedgerParser::new("2").unwrap(), entries)
    }

    #[test]
    fn test_scenario_single_card_unbalanced() {
        let result = EntityReconciliation::compute(
            &entity(),
            &[card("c1", dec!(12.00))],
            vec![payment(dec!(100.00))],
            tally(&[ledger("1", "【本次金额】 为 84.00")]),
            vec![],
        );
        assert_eq!(result.total_purchase, dec!(100.00));
        assert_eq!(result.net_consumption, dec!(84.00));
        assert_eq!(result.calculated_balance, dec!(16.00));
        assert_eq!(result.difference, dec!(4.00));
        assert!(!result.is_balanced);
        assert_eq!(result.entity.contact, "138****5678");
    }

    #[test]
    fn test_scenario_cancellation_nets_out() {
        let result = EntityReconciliation::compute(
            &entity(),
            &[card("c1", dec!(226.00))],
            vec![payment(dec!(500.00)), payment(dec!(300.00))],
            tally(&[
                ledger("1", "【本次金额】 为 480"),
                ledger("2", "【撤回金额】 为 94.00"),
            ]),
            vec![],
        );
        assert_eq!(result.net_consumption, dec!(386.00));
        assert_eq!(result.calculated_balance, dec!(414.00));
        assert_eq!(result.difference, dec!(188.00));
        assert!(!result.is_balanced);
        assert_eq!(result.payment_count, 2);
        assert_eq!(result.consumption_count, 1);
        assert_eq!(result.cancellation_count, 1);
    }

    #[test]
    fn test_balance_equation_and_tolerance() {
        let result = EntityReconciliation::compute(
            &entity(),
            &[card("c1", dec!(10.00)), card("c2", dec!(5.995))],
            vec![payment(dec!(100))],
            tally(&[ledger("1", "【本次金额】 为 84")]),
            vec![],
        );
        assert_eq!(result.current_balance, dec!(15.995));
        assert_eq!(result.calculated_balance, result.total_purchase - result.net_consumption);
        assert_eq!(result.difference, dec!(0.005));
        assert!(result.is_balanced);
        assert_eq!(result.card_count, 2);
    }

    #[test]
    fn test_exactly_one_cent_is_unbalanced() {
        let result = EntityReconciliation::compute(
            &entity(),
            &[card("c1", dec!(15.99))],
            vec![payment(dec!(16))],
            tally(&[]),
            vec![],
        );
        assert_eq!(result.difference, dec!(0.01));
        assert!(!result.is_balanced);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let build = || {
            EntityReconciliation::compute(
                &entity(),
                &[card("c1", dec!(12))],
                vec![payment(dec!(100))],
                tally(&[ledger("1", "【本次金额】 为 84"), ledger("2", "??")]),
                vec![FetchIssue::new("payments", "truncated")],
            )
        };
        assert_eq!(build(), build());
        assert!(build().is_partial());
    }

    #[test]
    fn test_accuracy_when_calculated_not_positive() {
        let result = EntityReconciliation::compute(
            &entity(),
            &[card("c1", dec!(0))],
            vec![],
            tally(&[ledger("1", "【本次金额】 为 20")]),
            vec![],
        );
        assert_eq!(result.calculated_balance, dec!(-20));
        assert_eq!(result.balance_accuracy, Decimal::ONE_HUNDRED);
    }

    fn reconciler(api: MockListingApi) -> EntityReconciler {
        EntityReconciler::new(
            Pager::new(Arc::new(api), Duration::from_secs(10), Duration::ZERO),
            LedgerParser::new("2").unwrap(),
            "1517",
            PageSizes::default(),
        )
    }

    fn ok(data: Value) -> Result<Value> {
        Ok(json!({ "orsuccess": "1", "data": data }))
    }

    #[tokio::test]
    async fn test_reconcile_filters_by_since_date() {
        let mut api = MockListingApi::new();
        api.expect_post().returning(|path, _| {
            if path == PAYMENTS.path {
                ok(json!([
                    { "ID": "old", "Amount": "999", "CreateTime": "2025/5/1" },
                    { "ID": "new", "Amount": "100", "CreateTime": "2025/6/1 09:00:00" }
                ]))
            } else if path == LEDGER.path {
                ok(json!([
                    { "ID": "l1", "Hypetype": "2", "Hypeinfo": "【本次金额】 为 84", "addTime": "2025/6/3 10:00:00" },
                    { "ID": "l0", "Hypetype": "2", "Hypeinfo": "【本次金额】 为 500", "addTime": "2025/4/3 10:00:00" }
                ]))
            } else {
                Err(ReconcileError::Status(404))
            }
        });

        let since = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let result = reconciler(api)
            .reconcile_entity(&entity(), &[card("c1", dec!(12))], since)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.total_purchase, dec!(100));
        assert_eq!(result.net_consumption, dec!(84));
        assert_eq!(result.difference, dec!(4));
        assert!(!result.is_partial());
    }

    #[tokio::test]
    async fn test_reconcile_without_cards_is_absent() {
        let mut api = MockListingApi::new();
        api.expect_post()
            .times(1)
            .returning(|_, _| ok(json!([{ "ID": "c9", "vid": "7", "Amount": "1" }])));

        let since = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let result = reconciler(api).reconcile("42", since).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_truncated_card_listing_is_not_absence() {
        let mut api = MockListingApi::new();
        api.expect_post().times(2).returning(|_, body| {
            if body["pages"] == 1 {
                let rows: Vec<Value> = (0..100)
                    .map(|i| json!({ "ID": format!("c{}", i), "vid": "7", "Amount": "1" }))
                    .collect();
                ok(Value::Array(rows))
            } else {
                Err(ReconcileError::Status(502))
            }
        });

        let since = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let err = reconciler(api).reconcile("42", since).await.unwrap_err();
        match err {
            ReconcileError::IncompleteListing { entity_id, reason } => {
                assert_eq!(entity_id, "42");
                assert!(reason.contains("page 2"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_ledger_is_partial_not_fatal() {
        let mut api = MockListingApi::new();
        api.expect_post().returning(|path, _| {
            if path == PAYMENTS.path {
                ok(json!([{ "ID": "p", "Amount": "50", "CreateTime": "2025/6/1" }]))
            } else {
                Err(ReconcileError::Timeout(Duration::from_secs(10)))
            }
        });

        let since = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let result = reconciler(api)
            .reconcile_entity(&entity(), &[card("c1", dec!(50))], since)
            .await
            .unwrap()
            .unwrap();

        assert!(result.is_partial());
        assert!(result.is_balanced);
        assert!(result.diagnostics[0].source.contains("ledger"));
    }

    #[tokio::test]
    async fn test_auth_rejection_propagates() {
        let mut api = MockListingApi::new();
        api.expect_post()
            .returning(|_, _| Ok(json!({ "orsuccess": "-99", "Msg": "expired" })));

        let since = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let err = reconciler(api)
            .reconcile_entity(&entity(), &[card("c1", dec!(50))], since)
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }
}
