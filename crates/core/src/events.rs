use crate::models::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level event enum broadcast to dashboard subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Snapshot(SnapshotEvent),
    Alert(Alert),
    Feed(FeedEvent),
}

impl Event {
    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Snapshot(_) => "snapshot",
            Event::Alert(_) => "alert",
            Event::Feed(_) => "feed",
        }
    }
}

/// A refresh cycle completed and its rows replaced the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEvent {
    pub seq: SnapshotSeq,
    pub source: String,
    pub rows: usize,
    pub dropped: usize,
    pub generated_at: DateTime<Utc>,
}

impl From<&ComparisonSnapshot> for SnapshotEvent {
    fn from(snapshot: &ComparisonSnapshot) -> Self {
        Self {
            seq: snapshot.seq,
            source: snapshot.source.clone(),
            rows: snapshot.rows.len(),
            dropped: snapshot.drops.total(),
            generated_at: snapshot.generated_at,
        }
    }
}

/// One contract listed in a profit alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub symbol: String,
    pub percent_delta: Decimal,
}

/// Profit-threshold notification for one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub seq: SnapshotSeq,
    pub bucket: ExpiryBucket,
    pub threshold: Decimal,
    /// At most the display limit; `total` counts every qualifying contract.
    pub entries: Vec<AlertEntry>,
    pub total: usize,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Quote-feed lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedEvent {
    Started { source: String },
    /// The cycle failed; the board keeps its previous rows and is marked failed.
    Failed { seq: SnapshotSeq, message: String },
    /// A newer cycle began before this one finished.
    Superseded { seq: SnapshotSeq },
    /// A result arrived after a newer one was already applied.
    Stale { seq: SnapshotSeq, latest: SnapshotSeq },
}
