use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::debug;

use crate::{
    ledger::parser::{LedgerParser, MonetaryFact},
    models::LedgerEntry,
};

/// Gross consumption, cancellations and audit counters for one set of
/// ledger entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumptionTally {
    pub gross_consumption: Decimal,
    pub cancelled_amount: Decimal,
    pub consumption_count: usize,
    pub cancellation_count: usize,
    /// Consumptions that came from the declared amount, not the narrative.
    pub fallback_count: usize,
    /// In-scope entries that yielded no fact. Kept for manual audit.
    pub unparsed: Vec<LedgerEntry>,
    /// In-scope entries examined (after de-duplication).
    pub examined: usize,
    /// Entries with an out-of-scope kind code.
    pub ignored: usize,
    /// Entries seen more than once under the same id.
    pub duplicates: usize,
}

impl ConsumptionTally {
    /// Fold `entries` through `parser`. Entries sharing a non-empty id are
    /// counted once; out-of-scope kinds are skipped before parsing.
    pub fn fold<'a>(parser: &LedgerParser, entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut tally = ConsumptionTally::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for entry in entries {
            if !entry.id.is_empty() && !seen.insert(entry.id.as_str()) {
                tally.duplicates += 1;
                continue;
            }
            if !parser.in_scope(entry) {
                tally.ignored += 1;
                continue;
            }
            tally.examined += 1;

            let (fact, matcher) = parser.parse_detailed(entry);
            match fact {
                MonetaryFact::Consumption(amount) => {
                    tally.gross_consumption += amount;
                    tally.consumption_count += 1;
                    if matcher.map(|m| m.is_fallback()).unwrap_or(false) {
                        tally.fallback_count += 1;
                    }
                }
                MonetaryFact::Cancellation(amount) => {
                    tally.cancelled_amount += amount;
                    tally.cancellation_count += 1;
                }
                MonetaryFact::Unparsed => {
                    debug!("Unparsed ledger entry {}: {:?}", entry.id, entry.narrative);
                    tally.unparsed.push(entry.clone());
                }
            }
        }

        tally
    }

    /// Gross minus cancelled. May be negative; never clamped.
    pub fn net_consumption(&self) -> Decimal {
        self.gross_consumption - self.cancelled_amount
    }
}
