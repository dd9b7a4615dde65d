pub mod parser;
pub mod tally;

pub use parser::{FactKind, LedgerParser, Matcher, MonetaryFact};
pub use tally::ConsumptionTally;
