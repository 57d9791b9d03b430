use chrono::Utc;
use futarb_core::*;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Rows produced by one build plus what was left out.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub rows: Vec<ComparisonRow>,
    pub drops: DropCounts,
    /// Rows whose lot size came from the table default.
    pub defaulted_lot_sizes: usize,
}

impl BuildReport {
    pub fn merge(&mut self, other: BuildReport) {
        self.rows.extend(other.rows);
        self.drops += other.drops;
        self.defaulted_lot_sizes += other.defaulted_lot_sizes;
    }
}

/// Lot size for a base symbol, falling back to the table default.
pub fn lookup_lot_size(lots: &LotSizeTable, base_symbol: &str) -> u32 {
    lots.lookup(base_symbol)
}

/// Pair each futures quote with the spot quote of its underlying and compute
/// the differential. Every row is tagged with `bucket`.
///
/// Never fails: unmatched or unpriced contracts are skipped and counted.
/// Row order is unspecified.
pub fn build_comparison_rows(
    spot: &[Quote],
    futures: &[Quote],
    bucket: ExpiryBucket,
    lots: &LotSizeTable,
) -> BuildReport {
    // Later duplicates overwrite earlier ones.
    let spot_by_base: HashMap<String, &Quote> = spot
        .iter()
        .map(|q| (resolve_base_symbol(&q.symbol), q))
        .collect();

    let now = Utc::now();
    let mut report = BuildReport::default();

    for contract in futures {
        let base_symbol = resolve_base_symbol(&contract.symbol);

        let Some(spot_quote) = spot_by_base.get(&base_symbol) else {
            report.drops.unmatched_spot += 1;
            continue;
        };

        let (Some(spot_price), Some(futures_price)) =
            (spot_quote.effective_price(), contract.effective_price())
        else {
            report.drops.missing_price += 1;
            continue;
        };

        let absolute_delta = futures_price - spot_price;
        let Some(percent_delta) = percent_of(absolute_delta, spot_price) else {
            report.drops.missing_price += 1;
            continue;
        };

        let lot_size = match contract.lot_size.filter(|lot| *lot > 0) {
            Some(lot) => lot,
            None => {
                if lots.get(&base_symbol).is_none() {
                    report.defaulted_lot_sizes += 1;
                }
                lookup_lot_size(lots, &base_symbol)
            }
        };

        let Some(lot_spread) = absolute_delta.checked_mul(Decimal::from(lot_size)) else {
            report.drops.missing_price += 1;
            continue;
        };

        report.rows.push(ComparisonRow {
            symbol: contract.symbol.clone(),
            base_symbol,
            lot_size,
            category: bucket,
            spot_price,
            futures_price,
            absolute_delta,
            percent_delta,
            lot_spread,
            volume: contract.volume,
            last_updated: now,
        });
    }

    debug!(
        bucket = %bucket,
        futures = futures.len(),
        rows = report.rows.len(),
        unmatched = report.drops.unmatched_spot,
        missing_price = report.drops.missing_price,
        "Built comparison rows"
    );

    report
}

/// `delta / base * 100` to two decimals, half away from zero.
fn percent_of(delta: Decimal, base: Decimal) -> Option<Decimal> {
    delta
        .checked_div(base)?
        .checked_mul(dec!(100))
        .map(|pct| pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Build rows for untagged futures quotes by classifying each contract
/// against the calendar. Contracts outside the calendar are dropped as
/// unclassified.
pub fn build_classified_rows(
    spot: &[Quote],
    futures: &[Quote],
    calendar: &ExpiryCalendar,
    lots: &LotSizeTable,
) -> BuildReport {
    let mut by_bucket: BTreeMap<ExpiryBucket, Vec<Quote>> = BTreeMap::new();
    let mut unclassified = 0;

    for quote in futures {
        match classify_expiry(calendar, &quote.symbol) {
            ExpiryBucket::Unknown => unclassified += 1,
            bucket => by_bucket.entry(bucket).or_default().push(quote.clone()),
        }
    }

    let mut report = BuildReport::default();
    report.drops.unclassified = unclassified;
    for (bucket, quotes) in by_bucket {
        report.merge(build_comparison_rows(spot, &quotes, bucket, lots));
    }

    if unclassified > 0 {
        debug!(unclassified, "Dropped contracts outside the expiry calendar");
    }

    report
}

/// Build every batch of a snapshot: tagged batches use their bucket,
/// untagged ones are classified by symbol.
pub fn build_snapshot_rows(
    snapshot: &QuoteSnapshot,
    calendar: &ExpiryCalendar,
    lots: &LotSizeTable,
) -> BuildReport {
    let mut report = BuildReport::default();
    for batch in &snapshot.futures {
        let built = match batch.bucket {
            Some(bucket) if bucket.is_tracked() => {
                build_comparison_rows(&snapshot.spot, &batch.quotes, bucket, lots)
            }
            _ => build_classified_rows(&snapshot.spot, &batch.quotes, calendar, lots),
        };
        report.merge(built);
    }
    report
}

/// Split a mixed payload into `(spot, futures)` by whether each symbol
/// carries a futures suffix.
pub fn partition_mixed(quotes: Vec<Quote>) -> (Vec<Quote>, Vec<Quote>) {
    let (futures, spot): (Vec<_>, Vec<_>) = quotes
        .into_iter()
        .partition(|q| ContractSymbol::parse(&q.symbol).is_futures());
    (spot, futures)
}
