use chrono::Utc;
use futarb_core::*;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::thresholds::AlertThresholds;

/// Emits profit alerts when the set of contracts above a bucket's threshold
/// changes.
///
/// The only state kept across refreshes is the last emitted
/// `symbol:percent` list per bucket. A bucket with nothing qualifying
/// clears its list, so the same contracts re-alert when they return.
#[derive(Debug, Clone, Default)]
pub struct AlertMonitor {
    thresholds: AlertThresholds,
    last_emitted: HashMap<ExpiryBucket, Vec<String>>,
}

impl AlertMonitor {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            last_emitted: HashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Forget every emitted list.
    pub fn reset(&mut self) {
        self.last_emitted.clear();
    }

    /// Check every tracked bucket of a freshly applied snapshot.
    pub fn evaluate(&mut self, snapshot: &ComparisonSnapshot) -> Vec<Alert> {
        ExpiryBucket::TRACKED
            .iter()
            .filter_map(|bucket| self.evaluate_bucket(snapshot, *bucket))
            .collect()
    }

    fn evaluate_bucket(&mut self, snapshot: &ComparisonSnapshot, bucket: ExpiryBucket) -> Option<Alert> {
        let threshold = self.thresholds.for_bucket(bucket)?;

        let mut qualifying: Vec<&ComparisonRow> = snapshot
            .rows_for(bucket)
            .filter(|r| r.percent_delta >= threshold)
            .collect();
        qualifying.sort_by(|a, b| {
            b.percent_delta
                .cmp(&a.percent_delta)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        if qualifying.is_empty() {
            self.last_emitted.remove(&bucket);
            return None;
        }

        let signature: Vec<String> = qualifying
            .iter()
            .map(|r| format!("{}:{}", r.symbol, r.percent_delta))
            .collect();
        if self.last_emitted.get(&bucket) == Some(&signature) {
            return None;
        }
        self.last_emitted.insert(bucket, signature);

        let entries: Vec<AlertEntry> = qualifying
            .iter()
            .take(self.thresholds.max_listed)
            .map(|r| AlertEntry {
                symbol: r.symbol.clone(),
                percent_delta: r.percent_delta,
            })
            .collect();
        let total = qualifying.len();

        let title = format!(
            "{} PROFIT ALERT >={}%: {} STOCKS",
            bucket.display_label(),
            threshold,
            total
        );
        let message = alert_message(&entries, total);

        info!(seq = %snapshot.seq, %bucket, total, "{}", title);

        Some(Alert {
            id: Uuid::new_v4(),
            seq: snapshot.seq,
            bucket,
            threshold,
            entries,
            total,
            title,
            message,
            created_at: Utc::now(),
        })
    }
}

fn alert_message(entries: &[AlertEntry], total: usize) -> String {
    let listed = entries
        .iter()
        .map(|e| format!("{} ({:+.2}%)", e.symbol, e.percent_delta))
        .collect::<Vec<_>>()
        .join(", ");
    match total.saturating_sub(entries.len()) {
        0 => listed,
        more => format!("{} and {} more", listed, more),
    }
}
