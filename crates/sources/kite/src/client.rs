use async_trait::async_trait;
use futarb_core::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::protocol::*;

pub const DEFAULT_BASE_URL: &str = "https://api.kite.trade";

/// Upper bound on instruments per `/quote` call.
pub const MAX_QUOTE_BATCH: usize = 500;

/// Spot quote names for index underlyings, whose cash symbols differ from
/// the futures `name` column.
const INDEX_SPOT_NAMES: &[(&str, &str)] = &[
    ("NIFTY", "NIFTY 50"),
    ("BANKNIFTY", "NIFTY BANK"),
    ("FINNIFTY", "NIFTY FIN SERVICE"),
    ("MIDCPNIFTY", "NIFTY MID SELECT"),
    ("NIFTYNXT50", "NIFTY NEXT 50"),
];

/// Credentials and endpoints for Kite Connect.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KiteConfig {
    pub base_url: String,
    pub api_key: String,
    pub access_token: String,
    /// Exchange segment holding the futures contracts.
    pub futures_exchange: String,
    /// Exchange used for the underlying's spot quote.
    pub spot_exchange: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for KiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            access_token: String::new(),
            futures_exchange: "NFO".to_string(),
            spot_exchange: "NSE".to_string(),
            batch_size: MAX_QUOTE_BATCH,
            timeout_secs: 10,
        }
    }
}

impl fmt::Debug for KiteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KiteConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("access_token", &"<redacted>")
            .field("futures_exchange", &self.futures_exchange)
            .field("spot_exchange", &self.spot_exchange)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Kite Connect quote source.
///
/// The instrument dump is fetched once and cached. Futures are chosen by
/// classifying each contract's trading symbol against the expiry calendar.
/// Accounts without full-quote permission are detected on the first 403
/// and served from the LTP endpoint from then on.
pub struct KiteClient {
    config: KiteConfig,
    http: reqwest::Client,
    calendar: ExpiryCalendar,
    instruments: RwLock<Option<Arc<Vec<Instrument>>>>,
    ltp_only: AtomicBool,
}

impl KiteClient {
    pub fn new(config: KiteConfig, calendar: ExpiryCalendar) -> Result<Self, QuoteSourceError> {
        if config.api_key.is_empty() || config.access_token.is_empty() {
            return Err(QuoteSourceError::PermissionDenied(
                "Kite API key and access token are required".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QuoteSourceError::ConnectionFailed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            calendar,
            instruments: RwLock::new(None),
            ltp_only: AtomicBool::new(false),
        })
    }

    /// Seed the instrument cache instead of downloading the dump.
    pub fn with_instruments(self, instruments: Vec<Instrument>) -> Self {
        Self {
            instruments: RwLock::new(Some(Arc::new(instruments))),
            ..self
        }
    }

    pub fn is_ltp_only(&self) -> bool {
        self.ltp_only.load(Ordering::Relaxed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, QuoteSourceError> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .header("X-Kite-Version", "3")
            .header(
                "Authorization",
                format!("token {}:{}", self.config.api_key, self.config.access_token),
            )
            .query(query)
            .send()
            .await
            .map_err(|e| QuoteSourceError::ConnectionFailed(format!("GET {}: {}", path, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(QuoteSourceError::PermissionDenied(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuoteSourceError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// The cached instrument dump, downloading it on first use.
    pub async fn instruments(&self) -> Result<Arc<Vec<Instrument>>, QuoteSourceError> {
        if let Some(cached) = self.instruments.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let mut slot = self.instruments.write().await;
        if let Some(cached) = slot.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let path = format!("/instruments/{}", self.config.futures_exchange);
        let body = self
            .get(&path, &[])
            .await?
            .text()
            .await
            .map_err(|e| QuoteSourceError::ConnectionFailed(format!("GET {}: {}", path, e)))?;
        let instruments = Arc::new(parse_instruments_csv(&body, &self.config.futures_exchange)?);

        info!(
            exchange = %self.config.futures_exchange,
            instruments = instruments.len(),
            futures = instruments.iter().filter(|i| i.is_future()).count(),
            "Loaded instrument dump"
        );
        *slot = Some(Arc::clone(&instruments));
        Ok(instruments)
    }

    /// Futures contracts that fall in `bucket` under the calendar.
    pub async fn contracts(&self, bucket: ExpiryBucket) -> Result<Vec<Instrument>, QuoteSourceError> {
        let instruments = self.instruments().await?;
        Ok(instruments
            .iter()
            .filter(|i| i.is_future() && self.calendar.classify(&i.tradingsymbol) == bucket)
            .cloned()
            .collect())
    }

    /// Quote key for an underlying's spot price.
    pub fn spot_key(&self, underlying: &str) -> String {
        let name = INDEX_SPOT_NAMES
            .iter()
            .find(|(base, _)| *base == underlying)
            .map(|(_, spot)| *spot)
            .unwrap_or(underlying);
        format!("{}:{}", self.config.spot_exchange, name)
    }

    /// Quotes for any number of keys, in batches.
    pub async fn quotes(&self, keys: &[String]) -> Result<HashMap<String, KiteQuote>, QuoteSourceError> {
        let batch_size = self.config.batch_size.clamp(1, MAX_QUOTE_BATCH);
        let mut out = HashMap::with_capacity(keys.len());
        for batch in keys.chunks(batch_size) {
            out.extend(self.quote_batch(batch).await?);
        }
        Ok(out)
    }

    async fn quote_batch(&self, keys: &[String]) -> Result<HashMap<String, KiteQuote>, QuoteSourceError> {
        if !self.is_ltp_only() {
            match self.fetch_quotes("/quote", keys).await {
                Err(QuoteSourceError::PermissionDenied(msg)) => {
                    warn!(reason = %msg, "Full quotes not permitted, switching to LTP endpoint");
                    self.ltp_only.store(true, Ordering::Relaxed);
                }
                other => return other,
            }
        }
        self.fetch_quotes("/quote/ltp", keys).await
    }

    async fn fetch_quotes(&self, path: &str, keys: &[String]) -> Result<HashMap<String, KiteQuote>, QuoteSourceError> {
        let query: Vec<(&str, &str)> = keys.iter().map(|k| ("i", k.as_str())).collect();
        let envelope: QuoteEnvelope = self
            .get(path, &query)
            .await?
            .json()
            .await
            .map_err(|e| QuoteSourceError::ParseError(format!("GET {}: {}", path, e)))?;
        let data = envelope.into_data()?;
        debug!(path, requested = keys.len(), received = data.len(), "Quote batch");
        Ok(data)
    }
}

#[async_trait]
impl QuoteSource for KiteClient {
    fn name(&self) -> &str {
        "kite"
    }

    async fn spot_quotes(&self) -> Result<Vec<Quote>, QuoteSourceError> {
        let instruments = self.instruments().await?;

        // Underlyings of every contract inside the calendar.
        let by_key: BTreeMap<String, String> = instruments
            .iter()
            .filter(|i| i.is_future() && self.calendar.classify(&i.tradingsymbol).is_tracked())
            .map(|i| (self.spot_key(&i.name), i.name.clone()))
            .collect();

        let keys: Vec<String> = by_key.keys().cloned().collect();
        let mut quotes = self.quotes(&keys).await?;

        Ok(by_key
            .iter()
            .filter_map(|(key, name)| quotes.remove(key).map(|q| q.into_quote(name, None)))
            .collect())
    }

    async fn futures_quotes(&self, bucket: ExpiryBucket) -> Result<Vec<Quote>, QuoteSourceError> {
        let contracts = self.contracts(bucket).await?;
        let keys: Vec<String> = contracts.iter().map(Instrument::quote_key).collect();
        let mut quotes = self.quotes(&keys).await?;

        Ok(contracts
            .iter()
            .filter_map(|c| {
                quotes
                    .remove(&c.quote_key())
                    .map(|q| q.into_quote(&c.tradingsymbol, Some(c.lot_size)))
            })
            .collect())
    }
}
