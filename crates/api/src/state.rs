use futarb_board::{ApplyOutcome, AlertThresholds, Board};
use futarb_core::*;
use futarb_engine::{RefreshFailure, Refresher};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Capacity of the event channel feeding `/stream` subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub board: RwLock<Board>,
    pub refresher: Arc<Refresher>,
    events: broadcast::Sender<Event>,
}

impl AppState {
    pub fn new(refresher: Arc<Refresher>, thresholds: AlertThresholds) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            board: RwLock::new(Board::new(thresholds)),
            refresher,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Broadcast to live subscribers; having none is not an error.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        if self.events.send(event).is_err() {
            debug!(kind, "No event subscribers");
        }
    }

    /// Run one cycle under an already claimed sequence number and apply
    /// whatever it produced.
    pub async fn run_cycle(&self, seq: SnapshotSeq) {
        match self.refresher.run_cycle(seq).await {
            Ok(snapshot) => self.apply_snapshot(snapshot).await,
            Err(failure) => self.record_failure(failure).await,
        }
    }

    pub async fn apply_snapshot(&self, snapshot: ComparisonSnapshot) {
        let seq = snapshot.seq;
        let summary = SnapshotEvent::from(&snapshot);
        let outcome = self.board.write().await.apply(snapshot);

        match outcome {
            ApplyOutcome::Applied { alerts } => {
                self.publish(Event::Snapshot(summary));
                for alert in alerts {
                    self.publish(Event::Alert(alert));
                }
            }
            ApplyOutcome::Stale { latest } => {
                self.publish(Event::Feed(FeedEvent::Stale { seq, latest }));
            }
        }
    }

    pub async fn record_failure(&self, failure: RefreshFailure) {
        let message = failure.source.to_string();
        let recorded = self
            .board
            .write()
            .await
            .record_failure(failure.seq, message.clone());
        if recorded {
            self.publish(Event::Feed(FeedEvent::Failed {
                seq: failure.seq,
                message,
            }));
        }
    }
}
