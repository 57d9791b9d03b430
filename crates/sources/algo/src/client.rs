use async_trait::async_trait;
use chrono::Utc;
use futarb_core::*;
use futures_util::future::{try_join, try_join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol;
use crate::stream;

pub const DEFAULT_BASE_URL: &str = "https://taddsteam-algo.hf.space";

/// Connection settings for the algo backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgoConfig {
    pub base_url: String,
    /// Per-request timeout for collection endpoints.
    pub timeout_secs: u64,
    /// Delay before reopening a dropped stream.
    pub reconnect_secs: u64,
    /// Fetch futures from the single combined endpoint instead of one
    /// request per expiry.
    pub use_combined: bool,
}

impl Default for AlgoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            reconnect_secs: 3,
            use_combined: false,
        }
    }
}

/// REST and stream client for the algo backend.
pub struct AlgoClient {
    config: AlgoConfig,
    http: reqwest::Client,
}

impl AlgoClient {
    pub fn new(config: AlgoConfig) -> Result<Self, QuoteSourceError> {
        // No overall timeout on the client: the event stream stays open.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QuoteSourceError::ConnectionFailed(format!("HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &AlgoConfig {
        &self.config
    }

    /// Collection endpoint for an expiry bucket.
    ///
    /// The backend names its expiries near / next / far, one step behind
    /// the bucket names.
    pub fn endpoint(bucket: ExpiryBucket) -> Option<&'static str> {
        match bucket {
            ExpiryBucket::Current => Some("/api/near-futures"),
            ExpiryBucket::Near => Some("/api/next-futures"),
            ExpiryBucket::Far => Some("/api/far-futures"),
            ExpiryBucket::Unknown => None,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, QuoteSourceError> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| QuoteSourceError::ConnectionFailed(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuoteSourceError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| QuoteSourceError::ParseError(format!("GET {}: {}", url, e)))
    }

    /// Every futures contract from the combined endpoint, untagged.
    pub async fn combined_futures(&self) -> Result<Vec<Quote>, QuoteSourceError> {
        let body = self.get_json("/api/all-futures-combined").await?;
        protocol::parse_combined(&body)
    }
}

#[async_trait]
impl QuoteSource for AlgoClient {
    fn name(&self) -> &str {
        "algo"
    }

    async fn spot_quotes(&self) -> Result<Vec<Quote>, QuoteSourceError> {
        let body = self.get_json("/api/live-data").await?;
        protocol::parse_collection(&body)
    }

    async fn futures_quotes(&self, bucket: ExpiryBucket) -> Result<Vec<Quote>, QuoteSourceError> {
        let path = Self::endpoint(bucket).ok_or_else(|| {
            QuoteSourceError::MissingData(format!("no collection for bucket {}", bucket))
        })?;
        let body = self.get_json(path).await?;
        let quotes = protocol::parse_collection(&body)?;
        debug!(%bucket, quotes = quotes.len(), "Fetched futures collection");
        Ok(quotes)
    }

    async fn fetch_snapshot(&self, buckets: &[ExpiryBucket]) -> Result<QuoteSnapshot, QuoteSourceError> {
        let snapshot = if self.config.use_combined {
            let (spot, futures) = try_join(self.spot_quotes(), self.combined_futures()).await?;
            QuoteSnapshot::new(spot).with_untagged(futures)
        } else {
            let tracked: Vec<ExpiryBucket> = buckets.iter().copied().filter(|b| b.is_tracked()).collect();
            let legs = try_join_all(tracked.iter().map(|b| self.futures_quotes(*b)));
            let (spot, futures) = try_join(self.spot_quotes(), legs).await?;
            tracked
                .into_iter()
                .zip(futures)
                .fold(QuoteSnapshot::new(spot), |snapshot, (bucket, quotes)| {
                    snapshot.with_bucket(bucket, quotes)
                })
        };

        Ok(QuoteSnapshot {
            fetched_at: Utc::now(),
            ..snapshot
        })
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<QuoteSnapshot>, QuoteSourceError> {
        let (tx, rx) = mpsc::channel(16);
        let url = self.url("/api/stream");
        info!(%url, "Subscribing to quote stream");
        tokio::spawn(stream::run_stream(
            self.http.clone(),
            url,
            Duration::from_secs(self.config.reconnect_secs),
            tx,
        ));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_endpoints() {
        assert_eq!(AlgoClient::endpoint(ExpiryBucket::Current), Some("/api/near-futures"));
        assert_eq!(AlgoClient::endpoint(ExpiryBucket::Near), Some("/api/next-futures"));
        assert_eq!(AlgoClient::endpoint(ExpiryBucket::Far), Some("/api/far-futures"));
        assert_eq!(AlgoClient::endpoint(ExpiryBucket::Unknown), None);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = AlgoClient::new(AlgoConfig {
            base_url: "http://localhost:7860/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/api/live-data"), "http://localhost:7860/api/live-data");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_failure() {
        let client = AlgoClient::new(AlgoConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();
        let err = client.spot_quotes().await.unwrap_err();
        assert!(matches!(err, QuoteSourceError::ConnectionFailed(_)));
    }
}
