pub mod csv_loader;

use async_trait::async_trait;
use futarb_core::{DataError, ExpiryBucket, LotSizeTable, Quote, QuoteSource, QuoteSourceError};
use std::path::{Path, PathBuf};

/// A directory of CSV quote files.
///
/// Spot quotes live in `spot.csv`; futures in `current.csv`, `near.csv`
/// and `far.csv`. Files are re-read on every fetch.
pub struct CsvQuoteSource {
    pub directory: PathBuf,
}

impl CsvQuoteSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn file_for(&self, stem: &str) -> PathBuf {
        self.directory.join(format!("{}.csv", stem))
    }
}

#[async_trait]
impl QuoteSource for CsvQuoteSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn spot_quotes(&self) -> Result<Vec<Quote>, QuoteSourceError> {
        Ok(csv_loader::load_quotes_from_csv(&self.file_for("spot"))?)
    }

    async fn futures_quotes(&self, bucket: ExpiryBucket) -> Result<Vec<Quote>, QuoteSourceError> {
        if !bucket.is_tracked() {
            return Err(QuoteSourceError::MissingData(format!(
                "no futures file for bucket {}",
                bucket
            )));
        }
        Ok(csv_loader::load_quotes_from_csv(&self.file_for(bucket.as_str()))?)
    }
}

/// The built-in lot-size table, overridden by entries from a CSV file.
pub fn load_lot_size_table(path: Option<&Path>, default_lot_size: u32) -> Result<LotSizeTable, DataError> {
    let mut table = LotSizeTable::nse_defaults().with_default(default_lot_size);
    if let Some(path) = path {
        let entries = csv_loader::load_lot_sizes_from_csv(path)?;
        tracing::info!(path = %path.display(), entries = entries.len(), "Loaded lot size overrides");
        table.extend(entries);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_csv_directory_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "spot.csv", "symbol,ltp\nRELIANCE,100\n");
        write(dir.path(), "current.csv", "symbol,ask\nRELIANCE25NOVFUT,103\n");
        write(dir.path(), "near.csv", "symbol,ask\nRELIANCE25DECFUT,104\n");

        let source = CsvQuoteSource::new(dir.path());
        let snapshot = source
            .fetch_snapshot(&[ExpiryBucket::Current, ExpiryBucket::Near])
            .await
            .unwrap();

        assert_eq!(snapshot.spot.len(), 1);
        assert_eq!(snapshot.futures.len(), 2);
        assert_eq!(snapshot.futures[0].bucket, Some(ExpiryBucket::Current));
        assert_eq!(snapshot.futures[0].quotes[0].ask, Some(dec!(103)));
    }

    #[tokio::test]
    async fn test_missing_bucket_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "spot.csv", "symbol,ltp\nRELIANCE,100\n");

        let source = CsvQuoteSource::new(dir.path());
        let err = source.fetch_snapshot(&[ExpiryBucket::Far]).await.unwrap_err();
        assert!(matches!(err, QuoteSourceError::MissingData(_)));
    }

    #[test]
    fn test_lot_size_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lots.csv");
        std::fs::write(&path, "symbol,lot_size\nNIFTY,50\nNEWCO,900\n").unwrap();

        let table = load_lot_size_table(Some(&path), 100).unwrap();
        assert_eq!(table.lookup("NIFTY"), 50);
        assert_eq!(table.lookup("NEWCO"), 900);
        assert_eq!(table.lookup("RELIANCE"), 500);

        let builtin = load_lot_size_table(None, 1).unwrap();
        assert_eq!(builtin.lookup("UNLISTED"), 1);
    }
}
