use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    error::{ReconcileError, Result},
    models::LedgerEntry,
};

/// Marker preceding the amount charged by a consumption entry.
pub const THIS_TIME_AMOUNT_MARKER: &str = "【本次金额】";
/// Marker preceding the amount returned by a cancelled consumption.
pub const WITHDRAWN_AMOUNT_MARKER: &str = "【撤回金额】";

/// A signed monetary fact extracted from one ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonetaryFact {
    Consumption(Decimal),
    Cancellation(Decimal),
    Unparsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactKind {
    Consumption,
    Cancellation,
}

impl MonetaryFact {
    fn of(kind: FactKind, amount: Decimal) -> Self {
        match kind {
            FactKind::Consumption => MonetaryFact::Consumption(amount),
            FactKind::Cancellation => MonetaryFact::Cancellation(amount),
        }
    }

    /// Unsigned amount; zero for `Unparsed`.
    pub fn amount(&self) -> Decimal {
        match self {
            MonetaryFact::Consumption(a) | MonetaryFact::Cancellation(a) => *a,
            MonetaryFact::Unparsed => Decimal::ZERO,
        }
    }

    /// Contribution to net consumption: cancellations count negative.
    pub fn signed_amount(&self) -> Decimal {
        match self {
            MonetaryFact::Consumption(a) => *a,
            MonetaryFact::Cancellation(a) => -*a,
            MonetaryFact::Unparsed => Decimal::ZERO,
        }
    }
}

/// One strategy for pulling a fact out of a ledger entry.
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, entry: &LedgerEntry) -> Option<MonetaryFact>;

    /// Whether this matcher reads the declared amount instead of the narrative.
    fn is_fallback(&self) -> bool {
        false
    }
}

/// Finds `<marker> 为 <decimal>` anywhere in the narrative.
pub struct MarkerMatcher {
    name: &'static str,
    pattern: Regex,
    kind: FactKind,
}

impl MarkerMatcher {
    pub fn new(name: &'static str, marker: &str, kind: FactKind) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"{}\s*(?:为|:|：)?\s*(\d+(?:\.\d+)?)",
            regex::escape(marker)
        ))
        .map_err(|e| ReconcileError::Other(anyhow::anyhow!("bad marker pattern: {}", e)))?;
        Ok(Self { name, pattern, kind })
    }
}

impl Matcher for MarkerMatcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extract(&self, entry: &LedgerEntry) -> Option<MonetaryFact> {
        let caps = self.pattern.captures(&entry.narrative)?;
        let amount = Decimal::from_str(caps.get(1)?.as_str()).ok()?;
        Some(MonetaryFact::of(self.kind, amount))
    }
}

/// Falls back to the entry's declared payment amount when it is positive.
pub struct DeclaredAmountMatcher;

impl Matcher for DeclaredAmountMatcher {
    fn name(&self) -> &'static str {
        "declared amount"
    }

    fn extract(&self, entry: &LedgerEntry) -> Option<MonetaryFact> {
        entry
            .declared_amount
            .filter(|amount| *amount > Decimal::ZERO)
            .map(MonetaryFact::Consumption)
    }

    fn is_fallback(&self) -> bool {
        true
    }
}

/// Ordered list of matchers; the first one to produce a fact wins, so an
/// entry is never counted twice.
pub struct LedgerParser {
    kind_code: String,
    matchers: Vec<Box<dyn Matcher>>,
}

impl LedgerParser {
    /// Parser for entries of `kind_code` with the platform's two narrative
    /// markers followed by the declared-amount fallback.
    pub fn new(kind_code: impl Into<String>) -> Result<Self> {
        Ok(Self::with_matchers(
            kind_code,
            vec![
                Box::new(MarkerMatcher::new(
                    "this-time amount",
                    THIS_TIME_AMOUNT_MARKER,
                    FactKind::Consumption,
                )?),
                Box::new(MarkerMatcher::new(
                    "withdrawn amount",
                    WITHDRAWN_AMOUNT_MARKER,
                    FactKind::Cancellation,
                )?),
                Box::new(DeclaredAmountMatcher),
            ],
        ))
    }

    pub fn with_matchers(kind_code: impl Into<String>, matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self {
            kind_code: kind_code.into(),
            matchers,
        }
    }

    /// Only consumption-class entries are parsed; everything else is ignored.
    pub fn in_scope(&self, entry: &LedgerEntry) -> bool {
        entry.kind_code.trim() == self.kind_code
    }

    pub fn parse(&self, entry: &LedgerEntry) -> MonetaryFact {
        self.parse_detailed(entry).0
    }

    /// Like `parse`, also returning the matcher that produced the fact.
    pub fn parse_detailed(&self, entry: &LedgerEntry) -> (MonetaryFact, Option<&dyn Matcher>) {
        for matcher in &self.matchers {
            if let Some(fact) = matcher.extract(entry) {
                return (fact, Some(&**matcher));
            }
        }
        (MonetaryFact::Unparsed, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(narrative: &str, declared: Option<Decimal>) -> LedgerEntry {
        LedgerEntry {
            id: "1".to_string(),
            entity_id: "42".to_string(),
            card_id: "c1".to_string(),
            kind_code: "2".to_string(),
            narrative: narrative.to_string(),
            declared_amount: declared,
            timestamp: None,
            raw_timestamp: String::new(),
            operator: String::new(),
        }
    }

    fn parser() -> LedgerParser {
        LedgerParser::new("2").unwrap()
    }

    #[test]
    fn test_this_time_marker() {
        let fact = parser().parse(&entry("会员 消课 【本次金额】 为 480", None));
        assert_eq!(fact, MonetaryFact::Consumption(dec!(480)));
    }

    #[test]
    fn test_withdrawn_marker() {
        let fact = parser().parse(&entry("撤销消课 【撤回金额】 为 94.00", Some(dec!(94))));
        assert_eq!(fact, MonetaryFact::Cancellation(dec!(94.00)));
        assert_eq!(fact.signed_amount(), dec!(-94));
    }

    #[test]
    fn test_marker_whitespace_tolerance() {
        let p = parser();
        assert_eq!(
            p.parse(&entry("【本次金额】为12.5", None)),
            MonetaryFact::Consumption(dec!(12.5))
        );
        assert_eq!(
            p.parse(&entry("【本次金额】   为\t 7", None)),
            MonetaryFact::Consumption(dec!(7))
        );
    }

    #[test]
    fn test_both_markers_counts_consumption_once() {
        let p = parser();
        let (fact, matcher) = p.parse_detailed(&entry(
            "【撤回金额】 为 94.00; 【本次金额】 为 480",
            Some(dec!(10)),
        ));
        assert_eq!(fact, MonetaryFact::Consumption(dec!(480)));
        assert_eq!(matcher.unwrap().name(), "this-time amount");
    }

    #[test]
    fn test_declared_amount_fallback() {
        let p = parser();
        let (fact, matcher) = p.parse_detailed(&entry("manual adjustment", Some(dec!(87.50))));
        assert_eq!(fact, MonetaryFact::Consumption(dec!(87.50)));
        assert!(matcher.unwrap().is_fallback());
    }

    #[test]
    fn test_unparsed_without_fallback() {
        let p = parser();
        let fact = p.parse(&entry("manual adjustment", None));
        assert_eq!(fact, MonetaryFact::Unparsed);
        assert_eq!(fact.amount(), Decimal::ZERO);
        assert_eq!(p.parse(&entry("", Some(dec!(0)))), MonetaryFact::Unparsed);
        assert_eq!(p.parse(&entry("", Some(dec!(-3)))), MonetaryFact::Unparsed);
    }

    #[test]
    fn test_marker_without_number_falls_through() {
        let fact = parser().parse(&entry("【本次金额】 为 --", Some(dec!(30))));
        assert_eq!(fact, MonetaryFact::Consumption(dec!(30)));
    }

    #[test]
    fn test_in_scope_kind_code() {
        let p = parser();
        let mut e = entry("【本次金额】 为 480", None);
        assert!(p.in_scope(&e));
        e.kind_code = "0".to_string();
        assert!(!p.in_scope(&e));
    }

    #[test]
    fn test_custom_matcher_order() {
        let p = LedgerParser::with_matchers("2", vec![Box::new(DeclaredAmountMatcher)]);
        let fact = p.parse(&entry("【本次金额】 为 480", Some(dec!(5))));
        assert_eq!(fact, MonetaryFact::Consumption(dec!(5)));
    }
}
