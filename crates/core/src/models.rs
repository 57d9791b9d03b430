use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Expiry buckets
// ---------------------------------------------------------------------------

/// Which of the tracked expiries a futures contract belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryBucket {
    /// Nearest tracked expiry.
    Current,
    /// Next expiry after `Current`.
    #[serde(alias = "next")]
    Near,
    /// Furthest tracked expiry.
    Far,
    /// No futures suffix, or a month token outside the tracked table.
    Unknown,
}

impl ExpiryBucket {
    /// The three buckets that produce output rows, in expiry order.
    pub const TRACKED: [ExpiryBucket; 3] = [ExpiryBucket::Current, ExpiryBucket::Near, ExpiryBucket::Far];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryBucket::Current => "current",
            ExpiryBucket::Near => "near",
            ExpiryBucket::Far => "far",
            ExpiryBucket::Unknown => "unknown",
        }
    }

    pub fn is_tracked(&self) -> bool {
        !matches!(self, ExpiryBucket::Unknown)
    }

    /// Short label used in alert titles (the dashboard calls the buckets NEAR / NEXT / FAR).
    pub fn display_label(&self) -> &'static str {
        match self {
            ExpiryBucket::Current => "NEAR",
            ExpiryBucket::Near => "NEXT",
            ExpiryBucket::Far => "FAR",
            ExpiryBucket::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ExpiryBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown expiry bucket: '{0}' (expected current, near, next or far)")]
pub struct ParseBucketError(pub String);

impl FromStr for ExpiryBucket {
    type Err = ParseBucketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" => Ok(ExpiryBucket::Current),
            "near" | "next" => Ok(ExpiryBucket::Near),
            "far" => Ok(ExpiryBucket::Far),
            "unknown" => Ok(ExpiryBucket::Unknown),
            _ => Err(ParseBucketError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// Latest observed price for one instrument (spot or futures).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub ask: Option<Decimal>,
    #[serde(alias = "ltp")]
    pub last_traded_price: Option<Decimal>,
    #[serde(default)]
    pub volume: Decimal,
    #[serde(default)]
    pub change_percent: Option<Decimal>,
    /// Source-provided timestamp, passed through verbatim.
    #[serde(default)]
    pub timestamp: String,
    /// Contract multiplier supplied by the source; wins over the lot-size table.
    #[serde(default)]
    pub lot_size: Option<u32>,
}

impl Quote {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ask: None,
            last_traded_price: None,
            volume: Decimal::ZERO,
            change_percent: None,
            timestamp: Utc::now().to_rfc3339(),
            lot_size: None,
        }
    }

    pub fn with_ask(mut self, ask: Decimal) -> Self {
        self.ask = Some(ask);
        self
    }

    pub fn with_ltp(mut self, ltp: Decimal) -> Self {
        self.last_traded_price = Some(ltp);
        self
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_lot_size(mut self, lot_size: u32) -> Self {
        self.lot_size = Some(lot_size);
        self
    }

    /// The price used for comparisons: `ask` when positive, otherwise the
    /// last traded price when positive.
    pub fn effective_price(&self) -> Option<Decimal> {
        match self.ask {
            Some(ask) if ask > Decimal::ZERO => Some(ask),
            _ => self.last_traded_price.filter(|ltp| *ltp > Decimal::ZERO),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.effective_price().is_some()
    }
}

/// Futures quotes for one refresh, optionally pre-tagged with their bucket.
///
/// Untagged batches (combined or streamed payloads) are classified by the
/// engine from the contract symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuturesBatch {
    pub bucket: Option<ExpiryBucket>,
    pub quotes: Vec<Quote>,
}

/// Everything a quote source returned for one refresh cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub spot: Vec<Quote>,
    pub futures: Vec<FuturesBatch>,
    pub fetched_at: DateTime<Utc>,
}

impl QuoteSnapshot {
    pub fn new(spot: Vec<Quote>) -> Self {
        Self {
            spot,
            futures: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_bucket(mut self, bucket: ExpiryBucket, quotes: Vec<Quote>) -> Self {
        self.futures.push(FuturesBatch {
            bucket: Some(bucket),
            quotes,
        });
        self
    }

    pub fn with_untagged(mut self, quotes: Vec<Quote>) -> Self {
        self.futures.push(FuturesBatch {
            bucket: None,
            quotes,
        });
        self
    }

    pub fn futures_len(&self) -> usize {
        self.futures.iter().map(|b| b.quotes.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Comparison output
// ---------------------------------------------------------------------------

/// One futures contract compared against its underlying's spot price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub symbol: String,
    pub base_symbol: String,
    pub lot_size: u32,
    pub category: ExpiryBucket,
    pub spot_price: Decimal,
    pub futures_price: Decimal,
    pub absolute_delta: Decimal,
    /// `(futures - spot) / spot * 100`, two decimals, half away from zero.
    pub percent_delta: Decimal,
    /// `absolute_delta * lot_size`: the spread captured by one lot.
    pub lot_spread: Decimal,
    pub volume: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl ComparisonRow {
    pub fn is_profitable(&self) -> bool {
        self.percent_delta > Decimal::ZERO
    }
}

/// Counts of futures quotes excluded from output, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    /// No spot quote shares the contract's base symbol.
    pub unmatched_spot: usize,
    /// Spot or futures leg has no positive price.
    pub missing_price: usize,
    /// Untagged contract whose month token is not in the calendar.
    pub unclassified: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.unmatched_spot + self.missing_price + self.unclassified
    }
}

impl AddAssign for DropCounts {
    fn add_assign(&mut self, other: Self) {
        self.unmatched_spot += other.unmatched_spot;
        self.missing_price += other.missing_price;
        self.unclassified += other.unclassified;
    }
}

/// Monotonic refresh-cycle number; later cycles supersede earlier ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotSeq(pub u64);

impl SnapshotSeq {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Output of one refresh cycle: the full row set, replaced wholesale each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSnapshot {
    pub seq: SnapshotSeq,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<ComparisonRow>,
    pub drops: DropCounts,
    /// Rows whose lot size came from the table default.
    pub defaulted_lot_sizes: usize,
}

impl ComparisonSnapshot {
    pub fn rows_for(&self, bucket: ExpiryBucket) -> impl Iterator<Item = &ComparisonRow> {
        self.rows.iter().filter(move |r| r.category == bucket)
    }

    pub fn find(&self, symbol: &str) -> Option<&ComparisonRow> {
        self.rows
            .iter()
            .find(|r| r.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_effective_price_prefers_positive_ask() {
        let quote = Quote::new("TCS").with_ask(dec!(3500.5)).with_ltp(dec!(3499));
        assert_eq!(quote.effective_price(), Some(dec!(3500.5)));

        let closed = Quote::new("TCS").with_ask(dec!(0)).with_ltp(dec!(3499));
        assert_eq!(closed.effective_price(), Some(dec!(3499)));
    }

    #[test]
    fn test_quote_without_prices_is_unusable() {
        let quote = Quote::new("ABC").with_ask(dec!(0)).with_ltp(dec!(0));
        assert!(!quote.is_usable());
        assert!(!Quote::new("ABC").is_usable());
    }

    #[test]
    fn test_bucket_parse_accepts_next_alias() {
        assert_eq!("next".parse::<ExpiryBucket>().unwrap(), ExpiryBucket::Near);
        assert_eq!("FAR".parse::<ExpiryBucket>().unwrap(), ExpiryBucket::Far);
        assert!("weekly".parse::<ExpiryBucket>().is_err());
    }

    #[test]
    fn test_quote_deserializes_ltp_alias() {
        let quote: Quote =
            serde_json::from_str(r#"{"symbol":"INFY","ask":null,"ltp":1510.25}"#).unwrap();
        assert_eq!(quote.ask, None);
        assert_eq!(quote.last_traded_price, Some(dec!(1510.25)));
        assert_eq!(quote.volume, Decimal::ZERO);
    }
}
