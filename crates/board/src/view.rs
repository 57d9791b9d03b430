use futarb_core::{ComparisonRow, ExpiryBucket};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row ordering for board views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Percent premium, highest first.
    #[default]
    Profit,
    /// Absolute price difference, highest first.
    Change,
    /// Contract symbol, A to Z.
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort key: '{0}' (expected profit, change or symbol)")]
pub struct ParseSortKeyError(pub String);

impl FromStr for SortKey {
    type Err = ParseSortKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profit" | "percent" => Ok(SortKey::Profit),
            "change" | "delta" => Ok(SortKey::Change),
            "symbol" | "name" => Ok(SortKey::Symbol),
            _ => Err(ParseSortKeyError(s.to_string())),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortKey::Profit => "profit",
            SortKey::Change => "change",
            SortKey::Symbol => "symbol",
        })
    }
}

/// Filter, search and ordering applied to the board's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewOptions {
    pub bucket: Option<ExpiryBucket>,
    /// Keep only rows with a positive premium.
    pub profitable_only: bool,
    pub sort: SortKey,
    /// Case-insensitive substring of the contract symbol.
    pub search: Option<String>,
    pub limit: Option<usize>,
}

impl ViewOptions {
    pub fn bucket(bucket: ExpiryBucket) -> Self {
        Self {
            bucket: Some(bucket),
            ..Default::default()
        }
    }

    pub fn profitable_only(mut self) -> Self {
        self.profitable_only = true;
        self
    }

    pub fn sorted_by(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn matches(&self, row: &ComparisonRow) -> bool {
        if self.bucket.is_some_and(|b| row.category != b) {
            return false;
        }
        if self.profitable_only && !row.is_profitable() {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => row
                .symbol
                .to_ascii_uppercase()
                .contains(&needle.to_ascii_uppercase()),
            _ => true,
        }
    }
}

/// Apply a view to a row set.
pub fn apply_view(rows: &[ComparisonRow], options: &ViewOptions) -> Vec<ComparisonRow> {
    let mut out: Vec<ComparisonRow> = rows.iter().filter(|r| options.matches(r)).cloned().collect();

    match options.sort {
        SortKey::Profit => out.sort_by(|a, b| {
            b.percent_delta
                .cmp(&a.percent_delta)
                .then_with(|| a.symbol.cmp(&b.symbol))
        }),
        SortKey::Change => out.sort_by(|a, b| {
            b.absolute_delta
                .cmp(&a.absolute_delta)
                .then_with(|| a.symbol.cmp(&b.symbol))
        }),
        SortKey::Symbol => out.sort_by(|a, b| a.symbol.cmp(&b.symbol)),
    }

    if let Some(limit) = options.limit {
        out.truncate(limit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn row(symbol: &str, category: ExpiryBucket, pct: Decimal, abs: Decimal) -> ComparisonRow {
        ComparisonRow {
            symbol: symbol.to_string(),
            base_symbol: futarb_core::resolve_base_symbol(symbol),
            lot_size: 100,
            category,
            spot_price: dec!(100),
            futures_price: dec!(100) + abs,
            absolute_delta: abs,
            percent_delta: pct,
            lot_spread: abs * dec!(100),
            volume: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    fn rows() -> Vec<ComparisonRow> {
        vec![
            row("TCS25NOVFUT", ExpiryBucket::Current, dec!(0.40), dec!(15)),
            row("INFY25NOVFUT", ExpiryBucket::Current, dec!(1.10), dec!(16)),
            row("SBIN25NOVFUT", ExpiryBucket::Current, dec!(-0.20), dec!(-1.6)),
            row("INFY25DECFUT", ExpiryBucket::Near, dec!(1.90), dec!(29)),
        ]
    }

    #[test]
    fn test_default_view_sorts_by_profit() {
        let view = apply_view(&rows(), &ViewOptions::default());
        let symbols: Vec<&str> = view.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["INFY25DECFUT", "INFY25NOVFUT", "TCS25NOVFUT", "SBIN25NOVFUT"]);
    }

    #[test]
    fn test_bucket_and_profitable_filter() {
        let opts = ViewOptions::bucket(ExpiryBucket::Current).profitable_only();
        let view = apply_view(&rows(), &opts);
        assert_eq!(view.len(), 2);
        assert!(view.iter().all(|r| r.percent_delta > Decimal::ZERO));
    }

    #[test]
    fn test_change_sort_and_search() {
        let opts = ViewOptions {
            search: Some("infy".into()),
            ..ViewOptions::default().sorted_by(SortKey::Change)
        };
        let view = apply_view(&rows(), &opts);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].symbol, "INFY25DECFUT");
    }

    #[test]
    fn test_symbol_sort_with_limit() {
        let opts = ViewOptions {
            limit: Some(2),
            ..ViewOptions::default().sorted_by(SortKey::Symbol)
        };
        let view = apply_view(&rows(), &opts);
        let symbols: Vec<&str> = view.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["INFY25DECFUT", "INFY25NOVFUT"]);
    }

    #[test]
    fn test_parse_sort_key() {
        assert_eq!("Change".parse::<SortKey>().unwrap(), SortKey::Change);
        assert!("volume".parse::<SortKey>().is_err());
    }
}
