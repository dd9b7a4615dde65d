use chrono::{NaiveDate, NaiveDateTime};
use colored::Colorize;
use rust_decimal::Decimal;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a platform timestamp such as `2025/6/11 11:08:50`, `2025/6/5` or
/// `2025-06-05T09:30:00` into a canonical `NaiveDateTime`.
///
/// Slashes are normalised to dashes first; date-only values resolve to
/// midnight. Returns `None` for blank or unrecognised input.
pub fn parse_platform_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let normalized = raw.trim().replace('/', "-");
    if normalized.is_empty() {
        return None;
    }
    // Drop fractional seconds, which some listings append.
    let normalized = match normalized.split_once('.') {
        Some((head, _)) if head.contains(':') => head.to_string(),
        _ => normalized,
    };

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Whether a record timestamp falls on or after `since`. Records without a
/// parseable timestamp are outside every window.
pub fn is_on_or_after(timestamp: Option<NaiveDateTime>, since: NaiveDate) -> bool {
    match (timestamp, since.and_hms_opt(0, 0, 0)) {
        (Some(ts), Some(start)) => ts >= start,
        _ => false,
    }
}

/// Redact the middle of a contact handle: `13812345678` -> `138****5678`.
pub fn mask_contact(contact: &str) -> String {
    let chars: Vec<char> = contact.trim().chars().collect();
    match chars.len() {
        0 => String::new(),
        1..=4 => "*".repeat(chars.len()),
        5..=7 => {
            let head: String = chars[..1].iter().collect();
            let tail: String = chars[chars.len() - 2..].iter().collect();
            format!("{}{}{}", head, "*".repeat(chars.len() - 3), tail)
        }
        _ => {
            let head: String = chars[..3].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}****{}", head, tail)
        }
    }
}

/// Format a currency amount with two decimals.
pub fn format_money(amount: Decimal) -> String {
    format!("¥{:.2}", amount.round_dp(2))
}

/// Format a difference, green when within tolerance and red otherwise.
pub fn format_difference(amount: Decimal, balanced: bool) -> String {
    let text = format_money(amount);
    if balanced {
        text.green().to_string()
    } else {
        text.red().to_string()
    }
}

/// Format timestamp in human-readable format
pub fn format_timestamp(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Spaces out calls to a rate-limited remote. Every caller sharing one
/// limiter waits its turn, so concurrent walks are paced as a whole.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_call: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until at least `delay` has passed since the previous call.
    /// The lock is held across the sleep so waiting callers queue up.
    pub async fn wait(&self, delay: std::time::Duration) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        *last = Some(tokio::time::Instant::now());
    }
}

/// Print a formatted table border
pub fn print_table_border(width: usize) {
    println!("{}", "=".repeat(width));
}

/// Print a table row with columns
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    let mut row = String::new();
    for (i, col) in columns.iter().enumerate() {
        if i < widths.len() {
            row.push_str(&format!("{:<width$}  ", col, width = widths[i]));
        }
    }
    println!("{}", row.trim_end());
}
