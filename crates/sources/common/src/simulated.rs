use async_trait::async_trait;
use chrono::Utc;
use futarb_core::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct SimulatedState {
    spot: Vec<Quote>,
    futures: HashMap<ExpiryBucket, Vec<Quote>>,
    /// Number of upcoming snapshot fetches that fail.
    failures_pending: usize,
    delay: Option<Duration>,
    fetches: usize,
    subscribers: Vec<mpsc::Sender<QuoteSnapshot>>,
}

/// An in-memory quote source.
///
/// Quotes are set directly; failures and latency can be injected so refresh
/// and poller behaviour is testable without a network.
pub struct SimulatedQuoteSource {
    name: String,
    state: Mutex<SimulatedState>,
}

impl SimulatedQuoteSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// A small fixed NSE board: five underlyings across all three expiries.
    pub fn demo() -> Self {
        let bases = [
            ("RELIANCE", dec!(2850.50)),
            ("TCS", dec!(3925.00)),
            ("HDFCBANK", dec!(1645.25)),
            ("INFY", dec!(1510.80)),
            ("SBIN", dec!(812.40)),
        ];
        let contracts = [
            (ExpiryBucket::Current, "25NOV", dec!(1.004)),
            (ExpiryBucket::Near, "25DEC", dec!(1.012)),
            (ExpiryBucket::Far, "26JAN", dec!(1.031)),
        ];

        let spot = bases
            .iter()
            .map(|(sym, px)| Quote::new(sym).with_ltp(*px).with_volume(dec!(125000)))
            .collect();
        let source = Self::new("simulated").with_spot(spot);

        contracts.iter().fold(source, |source, (bucket, suffix, premium)| {
            let quotes = bases
                .iter()
                .map(|(sym, px)| {
                    Quote::new(&format!("{sym}{suffix}FUT"))
                        .with_ask((*px * *premium).round_dp(2))
                        .with_ltp((*px * *premium).round_dp(2))
                        .with_volume(dec!(4200))
                })
                .collect();
            source.with_futures(*bucket, quotes)
        })
    }

    pub fn with_spot(self, quotes: Vec<Quote>) -> Self {
        self.set_spot(quotes);
        self
    }

    pub fn with_futures(self, bucket: ExpiryBucket, quotes: Vec<Quote>) -> Self {
        self.set_futures(bucket, quotes);
        self
    }

    pub fn set_spot(&self, quotes: Vec<Quote>) {
        self.state().spot = quotes;
    }

    pub fn set_futures(&self, bucket: ExpiryBucket, quotes: Vec<Quote>) {
        self.state().futures.insert(bucket, quotes);
    }

    /// Make the next `count` snapshot fetches fail with a connection error.
    pub fn fail_next(&self, count: usize) {
        self.state().failures_pending = count;
    }

    /// Delay every snapshot fetch.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    /// Number of snapshot fetches attempted so far.
    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    /// Push a snapshot to every live subscriber. Returns how many received it.
    pub fn publish(&self, snapshot: QuoteSnapshot) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state
            .subscribers
            .iter()
            .filter(|tx| tx.try_send(snapshot.clone()).is_ok())
            .count()
    }

    /// The current quotes as one snapshot, with every bucket tagged.
    pub fn current_snapshot(&self) -> QuoteSnapshot {
        let state = self.state();
        ExpiryBucket::TRACKED.iter().fold(
            QuoteSnapshot::new(state.spot.clone()),
            |snapshot, bucket| match state.futures.get(bucket) {
                Some(quotes) => snapshot.with_bucket(*bucket, quotes.clone()),
                None => snapshot,
            },
        )
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_fetch(&self) -> Result<Option<Duration>, QuoteSourceError> {
        let mut state = self.state();
        state.fetches += 1;
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(QuoteSourceError::ConnectionFailed(format!(
                "{}: injected failure",
                self.name
            )));
        }
        Ok(state.delay)
    }
}

#[async_trait]
impl QuoteSource for SimulatedQuoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spot_quotes(&self) -> Result<Vec<Quote>, QuoteSourceError> {
        Ok(self.state().spot.clone())
    }

    async fn futures_quotes(&self, bucket: ExpiryBucket) -> Result<Vec<Quote>, QuoteSourceError> {
        Ok(self.state().futures.get(&bucket).cloned().unwrap_or_default())
    }

    async fn fetch_snapshot(&self, buckets: &[ExpiryBucket]) -> Result<QuoteSnapshot, QuoteSourceError> {
        if let Some(delay) = self.begin_fetch()? {
            tokio::time::sleep(delay).await;
        }

        let mut snapshot = QuoteSnapshot::new(self.spot_quotes().await?);
        for bucket in buckets.iter().filter(|b| b.is_tracked()) {
            snapshot = snapshot.with_bucket(*bucket, self.futures_quotes(*bucket).await?);
        }
        snapshot.fetched_at = Utc::now();

        debug!(
            source = %self.name,
            spot = snapshot.spot.len(),
            futures = snapshot.futures_len(),
            "Simulated snapshot"
        );
        Ok(snapshot)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<QuoteSnapshot>, QuoteSourceError> {
        let (tx, rx) = mpsc::channel(16);
        self.state().subscribers.push(tx);
        Ok(rx)
    }
}
