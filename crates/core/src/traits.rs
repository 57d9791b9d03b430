use crate::models::*;
use async_trait::async_trait;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Quote Source Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while fetching quotes.
#[derive(Debug, thiserror::Error)]
pub enum QuoteSourceError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Response missing data: {0}")]
    MissingData(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Streaming not supported by {0}")]
    StreamUnsupported(String),
    #[error("Quote source error: {0}")]
    Other(String),
}

/// A provider of spot and futures quotes.
///
/// Each call yields a fresh batch; sources hold no comparison state.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Short identifier used in logs and snapshots.
    fn name(&self) -> &str;

    /// Latest spot (cash market) quotes.
    async fn spot_quotes(&self) -> Result<Vec<Quote>, QuoteSourceError>;

    /// Latest futures quotes for one expiry bucket.
    async fn futures_quotes(&self, bucket: ExpiryBucket) -> Result<Vec<Quote>, QuoteSourceError>;

    /// Spot plus the requested buckets in one snapshot.
    ///
    /// Any failing leg fails the whole snapshot.
    async fn fetch_snapshot(&self, buckets: &[ExpiryBucket]) -> Result<QuoteSnapshot, QuoteSourceError> {
        let mut snapshot = QuoteSnapshot::new(self.spot_quotes().await?);
        for bucket in buckets.iter().filter(|b| b.is_tracked()) {
            let quotes = self.futures_quotes(*bucket).await?;
            snapshot = snapshot.with_bucket(*bucket, quotes);
        }
        Ok(snapshot)
    }

    /// Push-mode feed. Each message is a complete snapshot.
    async fn subscribe(&self) -> Result<mpsc::Receiver<QuoteSnapshot>, QuoteSourceError> {
        Err(QuoteSourceError::StreamUnsupported(self.name().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Data Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while loading local data files.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<DataError> for QuoteSourceError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(msg) => QuoteSourceError::MissingData(msg),
            DataError::ParseError(msg) => QuoteSourceError::ParseError(msg),
            DataError::IoError(e) => QuoteSourceError::IoError(e),
        }
    }
}
