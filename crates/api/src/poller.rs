use crate::state::AppState;
use futarb_core::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How the board is kept fresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Fetch a snapshot every interval.
    #[default]
    Poll,
    /// Consume the source's push feed, polling if it has none.
    Stream,
}

/// Start the background task that feeds the board.
pub fn spawn_feed(state: Arc<AppState>, mode: FeedMode, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let source = state.refresher.source_name().to_string();
        state.publish(Event::Feed(FeedEvent::Started {
            source: source.clone(),
        }));

        if mode == FeedMode::Stream {
            match consume_stream(&state).await {
                Ok(()) => warn!(%source, "Quote stream ended, falling back to polling"),
                Err(e) => warn!(%source, error = %e, "Quote stream unavailable, polling instead"),
            }
        }
        poll(&state, interval).await;
    })
}

/// Fixed-interval refresh loop.
///
/// A tick that finds the previous cycle still running aborts it: its
/// result could only be discarded as stale once the new cycle lands.
pub async fn poll(state: &Arc<AppState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Option<(SnapshotSeq, JoinHandle<()>)> = None;

    info!(
        interval_ms = interval.as_millis() as u64,
        source = %state.refresher.source_name(),
        "Polling quote source"
    );

    loop {
        ticker.tick().await;

        if let Some((seq, handle)) = in_flight.take() {
            if !handle.is_finished() {
                handle.abort();
                debug!(%seq, "Cancelled superseded refresh");
                state.publish(Event::Feed(FeedEvent::Superseded { seq }));
            }
        }

        let seq = state.refresher.begin();
        let cycle_state = Arc::clone(state);
        let handle = tokio::spawn(async move { cycle_state.run_cycle(seq).await });
        in_flight = Some((seq, handle));
    }
}

/// Apply every pushed snapshot until the source closes its feed.
pub async fn consume_stream(state: &Arc<AppState>) -> Result<(), QuoteSourceError> {
    let mut rx = state.refresher.source().subscribe().await?;
    info!(source = %state.refresher.source_name(), "Consuming quote stream");

    while let Some(quotes) = rx.recv().await {
        let seq = state.refresher.begin();
        let snapshot = state.refresher.process(seq, quotes);
        state.apply_snapshot(snapshot).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futarb_board::{AlertThresholds, FeedStatus};
    use futarb_engine::Refresher;
    use futarb_sources_common::SimulatedQuoteSource;
    use rust_decimal_macros::dec;
    use tokio::time::timeout;

    fn app_state(source: Arc<SimulatedQuoteSource>) -> Arc<AppState> {
        let refresher = Refresher::new(
            source,
            Arc::new(LotSizeTable::nse_defaults()),
            Arc::new(ExpiryCalendar::from_months(&["NOV", "DEC", "JAN"])),
        );
        Arc::new(AppState::new(Arc::new(refresher), AlertThresholds::default()))
    }

    #[tokio::test]
    async fn test_poller_fills_board() {
        let state = app_state(Arc::new(SimulatedQuoteSource::demo()));
        let handle = spawn_feed(Arc::clone(&state), FeedMode::Poll, Duration::from_millis(20));

        let filled = timeout(Duration::from_secs(2), async {
            loop {
                if state.board.read().await.latest().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.abort();

        assert!(filled.is_ok());
        let board = state.board.read().await;
        assert_eq!(board.feed().status, FeedStatus::Live);
        assert_eq!(board.latest().unwrap().rows.len(), 15);
    }

    #[tokio::test]
    async fn test_slow_cycle_is_superseded() {
        let source = Arc::new(SimulatedQuoteSource::demo());
        source.set_delay(Some(Duration::from_millis(500)));
        let state = app_state(source);
        let mut events = state.subscribe();
        let handle = spawn_feed(Arc::clone(&state), FeedMode::Poll, Duration::from_millis(30));

        let superseded = timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Ok(Event::Feed(FeedEvent::Superseded { seq })) => return seq,
                    Ok(_) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await;
        handle.abort();

        assert_eq!(superseded.unwrap(), SnapshotSeq(1));
        assert!(state.board.read().await.latest().is_none());
    }

    #[tokio::test]
    async fn test_stream_mode_applies_pushed_snapshots() {
        let source = Arc::new(SimulatedQuoteSource::new("push"));
        let state = app_state(Arc::clone(&source));
        let handle = spawn_feed(Arc::clone(&state), FeedMode::Stream, Duration::from_secs(60));

        let pushed = QuoteSnapshot::new(vec![Quote::new("TCS").with_ltp(dec!(100))])
            .with_untagged(vec![Quote::new("TCS25DECFUT").with_ask(dec!(103))]);
        let delivered = timeout(Duration::from_secs(2), async {
            loop {
                if source.publish(pushed.clone()) > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            loop {
                if state.board.read().await.latest().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.abort();

        assert!(delivered.is_ok());
        let board = state.board.read().await;
        let row = board.find("TCS25DECFUT").unwrap();
        assert_eq!(row.category, ExpiryBucket::Near);
        assert_eq!(row.percent_delta, dec!(3.00));
    }

    #[tokio::test]
    async fn test_failed_cycle_marks_board() {
        let source = Arc::new(SimulatedQuoteSource::demo());
        source.fail_next(1);
        let state = app_state(source);

        let seq = state.refresher.begin();
        state.run_cycle(seq).await;

        let board = state.board.read().await;
        assert_eq!(board.feed().status, FeedStatus::Failed);
        assert!(board.feed().last_error.as_deref().unwrap().contains("injected failure"));
    }
}
