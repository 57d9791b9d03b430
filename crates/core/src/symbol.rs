//! Exchange contract symbol grammar.
//!
//! A futures trading symbol is `<BASE><YY><MONTH>FUT`, e.g. `RELIANCE25NOVFUT`:
//! a two-digit year, a 3-6 letter month token and the `FUT` contract-type
//! marker. Spot symbols carry no suffix.

use crate::models::ExpiryBucket;
use chrono::{Datelike, Days, Month, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

const FUTURES_MARKER: &str = "FUT";
const MIN_MONTH_TOKEN: usize = 3;
const MAX_MONTH_TOKEN: usize = 6;

/// First contract month settled on the last Tuesday instead of the last Thursday.
const TUESDAY_EXPIRY_FROM: (i32, u32) = (2025, 9);

/// A raw symbol split into its base and expiry parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSymbol {
    pub raw: String,
    pub base: String,
    pub year: Option<String>,
    pub month_token: Option<String>,
}

impl ContractSymbol {
    /// Parse a symbol. Never fails: unrecognised input is its own base.
    pub fn parse(symbol: &str) -> Self {
        let raw = symbol.trim().to_ascii_uppercase();
        let mut base = raw.clone();
        let mut year = None;
        let mut month_token = None;

        // Strip until a fixed point so the base never carries a suffix.
        while let Some(stripped) = strip_suffix_once(&base) {
            if month_token.is_none() {
                year = stripped.year;
                month_token = stripped.month_token;
            }
            base = stripped.base;
        }

        Self {
            raw,
            base,
            year,
            month_token,
        }
    }

    pub fn is_futures(&self) -> bool {
        self.raw != self.base
    }
}

struct Stripped {
    base: String,
    year: Option<String>,
    month_token: Option<String>,
}

fn strip_suffix_once(symbol: &str) -> Option<Stripped> {
    let head = symbol.strip_suffix(FUTURES_MARKER)?;
    if head.is_empty() {
        return None;
    }

    // Expiry suffix: the maximal run of letters before FUT is the month
    // token and must be preceded by exactly two digits.
    let bytes = head.as_bytes();
    let letters = bytes
        .iter()
        .rev()
        .take_while(|b| b.is_ascii_uppercase())
        .count();
    if (MIN_MONTH_TOKEN..=MAX_MONTH_TOKEN).contains(&letters) && head.len() > letters + 2 {
        let token_start = head.len() - letters;
        let year_start = token_start - 2;
        if bytes[year_start..token_start].iter().all(|b| b.is_ascii_digit()) {
            return Some(Stripped {
                base: head[..year_start].to_string(),
                year: Some(head[year_start..token_start].to_string()),
                month_token: Some(head[token_start..].to_string()),
            });
        }
    }

    // Bare marker, e.g. `ZZZFUT`.
    Some(Stripped {
        base: head.to_string(),
        year: None,
        month_token: None,
    })
}

/// Strip the expiry suffix from a symbol. Idempotent.
pub fn resolve_base_symbol(symbol: &str) -> String {
    ContractSymbol::parse(symbol).base
}

// ---------------------------------------------------------------------------
// Expiry calendar
// ---------------------------------------------------------------------------

/// Ordered month-token table mapping contract months to buckets.
///
/// Classification is a substring match of each table token against the
/// symbol's month token; the first matching entry wins. The table is fixed
/// once built, so classification is stable for the life of the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryCalendar {
    entries: Vec<(String, ExpiryBucket)>,
}

impl ExpiryCalendar {
    /// Calendar from explicit month tokens in expiry order (current, near, far).
    /// Tokens beyond the third are ignored.
    pub fn from_months<S: AsRef<str>>(months: &[S]) -> Self {
        let entries = months
            .iter()
            .zip(ExpiryBucket::TRACKED)
            .map(|(m, bucket)| (m.as_ref().trim().to_ascii_uppercase(), bucket))
            .filter(|(m, _)| !m.is_empty())
            .collect();
        Self { entries }
    }

    /// Calendar rolled from a reference date. The first month whose monthly
    /// expiry has not passed is `current`, the next is `near`, the one after
    /// is `far`. On expiry day the expiring month is still `current`.
    pub fn rolling_from(date: NaiveDate) -> Self {
        let mut month = Month::try_from(date.month() as u8).unwrap_or(Month::January);
        if monthly_expiry(date.year(), date.month()).is_some_and(|expiry| date > expiry) {
            month = month.succ();
        }
        let mut tokens = Vec::with_capacity(3);
        for _ in 0..3 {
            tokens.push(month_token(month));
            month = month.succ();
        }
        Self::from_months(&tokens[..])
    }

    pub fn entries(&self) -> &[(String, ExpiryBucket)] {
        &self.entries
    }

    /// Bucket for a raw contract symbol.
    pub fn classify(&self, symbol: &str) -> ExpiryBucket {
        let parsed = ContractSymbol::parse(symbol);
        let Some(token) = parsed.month_token else {
            return ExpiryBucket::Unknown;
        };
        self.entries
            .iter()
            .find(|(month, _)| token.contains(month.as_str()))
            .map(|(_, bucket)| *bucket)
            .unwrap_or(ExpiryBucket::Unknown)
    }

    /// The month token configured for a bucket, if any.
    pub fn month_for(&self, bucket: ExpiryBucket) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, b)| *b == bucket)
            .map(|(m, _)| m.as_str())
    }
}

/// Scheduled NSE monthly futures expiry: the last Thursday of the month, or
/// the last Tuesday from September 2025. Exchange holidays are not applied.
pub fn monthly_expiry(year: i32, month: u32) -> Option<NaiveDate> {
    let weekday = if (year, month) >= TUESDAY_EXPIRY_FROM {
        Weekday::Tue
    } else {
        Weekday::Thu
    };
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    let back = (7 + last_day.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last_day.checked_sub_days(Days::new(u64::from(back)))
}

/// Three-letter exchange month token (`JAN`, `FEB`, ...).
pub fn month_token(month: Month) -> String {
    month.name()[..3].to_ascii_uppercase()
}

/// Classify a contract symbol under the given calendar.
pub fn classify_expiry(calendar: &ExpiryCalendar, symbol: &str) -> ExpiryBucket {
    calendar.classify(symbol)
}
