//! The dashboard board: the latest comparison snapshot plus what the
//! presentation layer derives from it (views, statistics, alerts).

pub mod alerts;
pub mod thresholds;
pub mod view;

pub use alerts::AlertMonitor;
pub use thresholds::AlertThresholds;
pub use view::{apply_view, SortKey, ViewOptions};

use chrono::{DateTime, Utc};
use futarb_core::*;
use futarb_engine::{compute_stats, SnapshotStats};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Alerts retained for the `/alerts` listing.
pub const DEFAULT_ALERT_HISTORY: usize = 50;

/// Health of the quote feed as seen by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// No cycle has completed yet.
    Pending,
    Live,
    /// The most recent cycle failed upstream.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedState {
    pub status: FeedStatus,
    /// Newest sequence resolved, successfully or not.
    pub latest_seq: Option<SnapshotSeq>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of offering a snapshot to the board.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Applied { alerts: Vec<Alert> },
    /// A newer cycle was already resolved; nothing changed.
    Stale { latest: SnapshotSeq },
}

/// Latest-snapshot holder with last-write-wins ordering.
///
/// Snapshots and failures both carry the sequence number of the cycle
/// that produced them. Anything at or below the newest resolved sequence
/// is discarded, never merged.
#[derive(Debug)]
pub struct Board {
    latest: Option<ComparisonSnapshot>,
    feed: FeedState,
    monitor: AlertMonitor,
    recent_alerts: VecDeque<Alert>,
    alert_history: usize,
}

impl Default for Board {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}

impl Board {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            latest: None,
            feed: FeedState {
                status: FeedStatus::Pending,
                latest_seq: None,
                last_error: None,
                updated_at: None,
            },
            monitor: AlertMonitor::new(thresholds),
            recent_alerts: VecDeque::new(),
            alert_history: DEFAULT_ALERT_HISTORY,
        }
    }

    pub fn with_alert_history(mut self, capacity: usize) -> Self {
        self.alert_history = capacity.max(1);
        self
    }

    fn is_stale(&self, seq: SnapshotSeq) -> bool {
        self.feed.latest_seq.is_some_and(|latest| seq <= latest)
    }

    /// Replace the board's rows with a newer snapshot.
    pub fn apply(&mut self, snapshot: ComparisonSnapshot) -> ApplyOutcome {
        if let Some(latest) = self.feed.latest_seq.filter(|_| self.is_stale(snapshot.seq)) {
            debug!(seq = %snapshot.seq, %latest, "Discarding stale snapshot");
            return ApplyOutcome::Stale { latest };
        }

        let alerts = self.monitor.evaluate(&snapshot);
        for alert in &alerts {
            if self.recent_alerts.len() == self.alert_history {
                self.recent_alerts.pop_front();
            }
            self.recent_alerts.push_back(alert.clone());
        }

        self.feed = FeedState {
            status: FeedStatus::Live,
            latest_seq: Some(snapshot.seq),
            last_error: None,
            updated_at: Some(snapshot.generated_at),
        };
        self.latest = Some(snapshot);
        ApplyOutcome::Applied { alerts }
    }

    /// Mark the feed failed. Returns `false` when the failure is stale.
    ///
    /// The previous rows are kept for statistics but views report the
    /// failure until a newer cycle succeeds.
    pub fn record_failure(&mut self, seq: SnapshotSeq, error: impl Into<String>) -> bool {
        if self.is_stale(seq) {
            return false;
        }
        let error = error.into();
        warn!(%seq, %error, "Refresh failed");
        self.feed = FeedState {
            status: FeedStatus::Failed,
            latest_seq: Some(seq),
            last_error: Some(error),
            updated_at: Some(Utc::now()),
        };
        true
    }

    pub fn feed(&self) -> &FeedState {
        &self.feed
    }

    pub fn latest(&self) -> Option<&ComparisonSnapshot> {
        self.latest.as_ref()
    }

    /// Rows under a view; `None` until the first snapshot lands.
    pub fn view(&self, options: &ViewOptions) -> Option<Vec<ComparisonRow>> {
        self.latest.as_ref().map(|s| apply_view(&s.rows, options))
    }

    pub fn stats(&self) -> Option<SnapshotStats> {
        self.latest.as_ref().map(compute_stats)
    }

    pub fn find(&self, symbol: &str) -> Option<&ComparisonRow> {
        self.latest.as_ref()?.find(symbol)
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.recent_alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        self.monitor.thresholds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(seq: u64, pct: Decimal) -> ComparisonSnapshot {
        let row = ComparisonRow {
            symbol: "RELIANCE25NOVFUT".into(),
            base_symbol: "RELIANCE".into(),
            lot_size: 500,
            category: ExpiryBucket::Current,
            spot_price: dec!(100),
            futures_price: dec!(100) + pct,
            absolute_delta: pct,
            percent_delta: pct,
            lot_spread: pct * dec!(500),
            volume: Decimal::ZERO,
            last_updated: Utc::now(),
        };
        ComparisonSnapshot {
            seq: SnapshotSeq(seq),
            source: "test".into(),
            fetched_at: Utc::now(),
            generated_at: Utc::now(),
            rows: vec![row],
            drops: DropCounts::default(),
            defaulted_lot_sizes: 0,
        }
    }

    #[test]
    fn test_board_starts_pending() {
        let board = Board::default();
        assert_eq!(board.feed().status, FeedStatus::Pending);
        assert!(board.view(&ViewOptions::default()).is_none());
        assert!(board.stats().is_none());
    }

    #[test]
    fn test_newer_snapshot_replaces_rows() {
        let mut board = Board::default();
        board.apply(snapshot(1, dec!(0.5)));
        board.apply(snapshot(2, dec!(0.7)));

        let rows = board.view(&ViewOptions::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].percent_delta, dec!(0.7));
        assert_eq!(board.feed().latest_seq, Some(SnapshotSeq(2)));
    }

    #[test]
    fn test_stale_snapshot_is_discarded() {
        let mut board = Board::default();
        board.apply(snapshot(5, dec!(0.5)));

        let outcome = board.apply(snapshot(4, dec!(9.9)));
        assert!(matches!(outcome, ApplyOutcome::Stale { latest } if latest == SnapshotSeq(5)));
        assert_eq!(board.find("reliance25novfut").unwrap().percent_delta, dec!(0.5));
    }

    #[test]
    fn test_failure_marks_feed_and_is_ordered() {
        let mut board = Board::default();
        board.apply(snapshot(1, dec!(0.5)));

        assert!(board.record_failure(SnapshotSeq(2), "HTTP 502"));
        assert_eq!(board.feed().status, FeedStatus::Failed);
        assert_eq!(board.feed().last_error.as_deref(), Some("HTTP 502"));
        assert!(board.stats().is_some());

        // Older results arriving late change nothing.
        assert!(!board.record_failure(SnapshotSeq(1), "late"));
        assert!(matches!(board.apply(snapshot(2, dec!(1.0))), ApplyOutcome::Stale { .. }));

        board.apply(snapshot(3, dec!(0.8)));
        assert_eq!(board.feed().status, FeedStatus::Live);
        assert!(board.feed().last_error.is_none());
    }

    #[test]
    fn test_alerts_are_kept_newest_first() {
        let mut board = Board::default().with_alert_history(2);
        for (seq, pct) in [(1, dec!(1.1)), (2, dec!(1.2)), (3, dec!(1.3))] {
            match board.apply(snapshot(seq, pct)) {
                ApplyOutcome::Applied { alerts } => assert_eq!(alerts.len(), 1),
                ApplyOutcome::Stale { .. } => panic!("unexpected stale"),
            }
        }

        let recent = board.recent_alerts(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].seq, SnapshotSeq(3));
        assert_eq!(recent[1].seq, SnapshotSeq(2));
    }
}
