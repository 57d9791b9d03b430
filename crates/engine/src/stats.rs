use futarb_core::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of one bucket's rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub rows: usize,
    pub profitable: usize,
    pub best_percent: Option<Decimal>,
    pub mean_percent: Decimal,
}

/// The single most profitable contract on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRow {
    pub symbol: String,
    pub category: ExpiryBucket,
    pub percent_delta: Decimal,
    pub lot_spread: Decimal,
}

/// Aggregate statistics over a comparison snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub seq: SnapshotSeq,
    pub total_rows: usize,
    pub profitable: usize,
    pub mean_percent: Decimal,
    pub best: Option<BestRow>,
    pub per_bucket: BTreeMap<ExpiryBucket, BucketStats>,
    pub drops: DropCounts,
    pub defaulted_lot_sizes: usize,
}

/// Compute board statistics from a snapshot.
pub fn compute_stats(snapshot: &ComparisonSnapshot) -> SnapshotStats {
    let rows = &snapshot.rows;

    let per_bucket = ExpiryBucket::TRACKED
        .iter()
        .map(|bucket| {
            let bucket_rows: Vec<&ComparisonRow> = snapshot.rows_for(*bucket).collect();
            (*bucket, bucket_stats(&bucket_rows))
        })
        .collect();

    let best = rows
        .iter()
        .max_by(|a, b| a.percent_delta.cmp(&b.percent_delta))
        .map(|r| BestRow {
            symbol: r.symbol.clone(),
            category: r.category,
            percent_delta: r.percent_delta,
            lot_spread: r.lot_spread,
        });

    SnapshotStats {
        seq: snapshot.seq,
        total_rows: rows.len(),
        profitable: rows.iter().filter(|r| r.is_profitable()).count(),
        mean_percent: mean_percent(rows.iter()),
        best,
        per_bucket,
        drops: snapshot.drops,
        defaulted_lot_sizes: snapshot.defaulted_lot_sizes,
    }
}

fn bucket_stats(rows: &[&ComparisonRow]) -> BucketStats {
    BucketStats {
        rows: rows.len(),
        profitable: rows.iter().filter(|r| r.is_profitable()).count(),
        best_percent: rows.iter().map(|r| r.percent_delta).max(),
        mean_percent: mean_percent(rows.iter().copied()),
    }
}

fn mean_percent<'a>(rows: impl Iterator<Item = &'a ComparisonRow>) -> Decimal {
    let (sum, count) = rows.fold((Decimal::ZERO, 0usize), |(sum, n), r| {
        (sum + r.percent_delta, n + 1)
    });
    if count == 0 {
        Decimal::ZERO
    } else {
        (sum / Decimal::from(count)).round_dp(2)
    }
}
