use chrono::Utc;
use futarb_core::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::differential::build_snapshot_rows;

/// A refresh cycle that could not fetch its quotes.
#[derive(Debug, thiserror::Error)]
#[error("refresh {seq} failed: {source}")]
pub struct RefreshFailure {
    pub seq: SnapshotSeq,
    #[source]
    pub source: QuoteSourceError,
}

/// Runs refresh cycles against one quote source.
///
/// Every cycle is stamped with a sequence number taken when it begins, so
/// consumers can discard results that arrive after a newer cycle's.
pub struct Refresher {
    source: Arc<dyn QuoteSource>,
    lots: Arc<LotSizeTable>,
    calendar: Arc<ExpiryCalendar>,
    buckets: Vec<ExpiryBucket>,
    last_seq: AtomicU64,
}

impl Refresher {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        lots: Arc<LotSizeTable>,
        calendar: Arc<ExpiryCalendar>,
    ) -> Self {
        Self {
            source,
            lots,
            calendar,
            buckets: ExpiryBucket::TRACKED.to_vec(),
            last_seq: AtomicU64::new(0),
        }
    }

    /// Restrict which buckets are fetched each cycle.
    pub fn with_buckets(mut self, buckets: Vec<ExpiryBucket>) -> Self {
        self.buckets = buckets.into_iter().filter(|b| b.is_tracked()).collect();
        self
    }

    pub fn source(&self) -> &Arc<dyn QuoteSource> {
        &self.source
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn buckets(&self) -> &[ExpiryBucket] {
        &self.buckets
    }

    pub fn lots(&self) -> &LotSizeTable {
        &self.lots
    }

    pub fn calendar(&self) -> &ExpiryCalendar {
        &self.calendar
    }

    /// Claim the next sequence number.
    pub fn begin(&self) -> SnapshotSeq {
        SnapshotSeq(self.last_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently claimed sequence number.
    pub fn latest_seq(&self) -> SnapshotSeq {
        SnapshotSeq(self.last_seq.load(Ordering::SeqCst))
    }

    /// Fetch one snapshot from the source and transform it.
    ///
    /// Does not retry; the failure is returned with its sequence number.
    pub async fn run_cycle(&self, seq: SnapshotSeq) -> Result<ComparisonSnapshot, RefreshFailure> {
        match self.source.fetch_snapshot(&self.buckets).await {
            Ok(quotes) => Ok(self.process(seq, quotes)),
            Err(source) => {
                warn!(
                    %seq,
                    source_name = %self.source.name(),
                    error = %source,
                    "Quote fetch failed"
                );
                Err(RefreshFailure { seq, source })
            }
        }
    }

    /// Begin and run a cycle.
    pub async fn refresh(&self) -> Result<ComparisonSnapshot, RefreshFailure> {
        let seq = self.begin();
        self.run_cycle(seq).await
    }

    /// Transform an already fetched snapshot (timer or push).
    pub fn process(&self, seq: SnapshotSeq, quotes: QuoteSnapshot) -> ComparisonSnapshot {
        let report = build_snapshot_rows(&quotes, &self.calendar, &self.lots);

        info!(
            %seq,
            source = %self.source.name(),
            spot = quotes.spot.len(),
            futures = quotes.futures_len(),
            rows = report.rows.len(),
            dropped = report.drops.total(),
            defaulted_lots = report.defaulted_lot_sizes,
            "Refresh cycle complete"
        );

        ComparisonSnapshot {
            seq,
            source: self.source.name().to_string(),
            fetched_at: quotes.fetched_at,
            generated_at: Utc::now(),
            rows: report.rows,
            drops: report.drops,
            defaulted_lot_sizes: report.defaulted_lot_sizes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futarb_sources_common::SimulatedQuoteSource;
    use rust_decimal_macros::dec;

    fn refresher(source: Arc<SimulatedQuoteSource>) -> Refresher {
        Refresher::new(
            source,
            Arc::new(LotSizeTable::nse_defaults()),
            Arc::new(ExpiryCalendar::from_months(&["NOV", "DEC", "JAN"])),
        )
    }

    #[tokio::test]
    async fn test_refresh_builds_all_buckets() {
        let refresher = refresher(Arc::new(SimulatedQuoteSource::demo()));
        let snapshot = refresher.refresh().await.unwrap();

        assert_eq!(snapshot.seq, SnapshotSeq(1));
        assert_eq!(snapshot.source, "simulated");
        assert_eq!(snapshot.rows.len(), 15);
        assert_eq!(snapshot.rows_for(ExpiryBucket::Far).count(), 5);
        assert!(snapshot.rows.iter().all(|r| r.is_profitable()));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let refresher = refresher(Arc::new(SimulatedQuoteSource::demo()));
        let first = refresher.begin();
        let second = refresher.begin();
        assert!(second > first);
        assert_eq!(refresher.latest_seq(), second);
    }

    #[tokio::test]
    async fn test_failure_carries_sequence() {
        let source = Arc::new(SimulatedQuoteSource::demo());
        source.fail_next(1);
        let refresher = refresher(source);

        let failure = refresher.refresh().await.unwrap_err();
        assert_eq!(failure.seq, SnapshotSeq(1));
        assert!(matches!(failure.source, QuoteSourceError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_empty_source_is_valid_empty_snapshot() {
        let refresher = refresher(Arc::new(SimulatedQuoteSource::new("empty")));
        let snapshot = refresher.refresh().await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.drops.total(), 0);
    }

    #[tokio::test]
    async fn test_process_classifies_untagged_push() {
        let refresher = refresher(Arc::new(SimulatedQuoteSource::new("push")));
        let quotes = QuoteSnapshot::new(vec![Quote::new("NIFTY").with_ltp(dec!(24000))])
            .with_untagged(vec![
                Quote::new("NIFTY25DECFUT").with_ask(dec!(24240)),
                Quote::new("NIFTY26MARFUT").with_ask(dec!(24500)),
            ]);

        let snapshot = refresher.process(SnapshotSeq(9), quotes);
        assert_eq!(snapshot.seq, SnapshotSeq(9));
        assert_eq!(snapshot.rows.len(), 1);
        assert_eq!(snapshot.rows[0].category, ExpiryBucket::Near);
        assert_eq!(snapshot.rows[0].percent_delta, dec!(1.00));
        assert_eq!(snapshot.drops.unclassified, 1);
    }

    #[tokio::test]
    async fn test_bucket_selection() {
        let source = Arc::new(SimulatedQuoteSource::demo());
        let refresher = refresher(source).with_buckets(vec![ExpiryBucket::Current, ExpiryBucket::Unknown]);
        assert_eq!(refresher.buckets(), &[ExpiryBucket::Current]);

        let snapshot = refresher.refresh().await.unwrap();
        assert_eq!(snapshot.rows.len(), 5);
    }
}
