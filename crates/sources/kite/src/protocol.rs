use chrono::NaiveDate;
use futarb_core::{Quote, QuoteSourceError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Instrument dump (CSV)
// ---------------------------------------------------------------------------

/// One row of the `/instruments/{exchange}` dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub instrument_token: u64,
    pub tradingsymbol: String,
    /// Underlying name, e.g. `RELIANCE` or `NIFTY`.
    pub name: String,
    pub expiry: Option<NaiveDate>,
    pub lot_size: u32,
    pub instrument_type: String,
    pub exchange: String,
}

impl Instrument {
    pub fn is_future(&self) -> bool {
        self.instrument_type.eq_ignore_ascii_case("FUT")
    }

    /// `EXCHANGE:TRADINGSYMBOL` key used by the quote endpoints.
    pub fn quote_key(&self) -> String {
        format!("{}:{}", self.exchange, self.tradingsymbol)
    }
}

#[derive(Debug, Deserialize)]
struct RawInstrument {
    instrument_token: String,
    tradingsymbol: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    expiry: String,
    #[serde(default)]
    lot_size: String,
    #[serde(default)]
    instrument_type: String,
    #[serde(default)]
    exchange: String,
}

/// Parse the instrument dump. Rows with an unusable token are skipped.
pub fn parse_instruments_csv(body: &str, default_exchange: &str) -> Result<Vec<Instrument>, QuoteSourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut instruments = Vec::new();
    for record in reader.deserialize::<RawInstrument>() {
        let raw = record.map_err(|e| QuoteSourceError::ParseError(format!("instrument dump: {}", e)))?;
        let Ok(instrument_token) = raw.instrument_token.parse::<u64>() else {
            continue;
        };
        let name = raw.name.trim_matches('"').to_ascii_uppercase();
        instruments.push(Instrument {
            instrument_token,
            tradingsymbol: raw.tradingsymbol.to_ascii_uppercase(),
            name,
            expiry: NaiveDate::parse_from_str(&raw.expiry, "%Y-%m-%d").ok(),
            lot_size: raw.lot_size.parse::<u32>().unwrap_or(0),
            instrument_type: raw.instrument_type.to_ascii_uppercase(),
            exchange: if raw.exchange.is_empty() {
                default_exchange.to_string()
            } else {
                raw.exchange.to_ascii_uppercase()
            },
        });
    }
    Ok(instruments)
}

// ---------------------------------------------------------------------------
// Quote responses (JSON)
// ---------------------------------------------------------------------------

/// Envelope shared by `/quote` and `/quote/ltp`.
#[derive(Debug, Deserialize)]
pub struct QuoteEnvelope {
    pub status: String,
    #[serde(default)]
    pub data: Option<HashMap<String, KiteQuote>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

impl QuoteEnvelope {
    pub fn into_data(self) -> Result<HashMap<String, KiteQuote>, QuoteSourceError> {
        if self.status != "success" {
            let message = self.message.unwrap_or_else(|| self.status.clone());
            return Err(match self.error_type.as_deref() {
                Some("PermissionException") | Some("TokenException") => {
                    QuoteSourceError::PermissionDenied(message)
                }
                _ => QuoteSourceError::Other(message),
            });
        }
        self.data
            .ok_or_else(|| QuoteSourceError::MissingData("quote response has no data".into()))
    }
}

/// Full quote (`/quote`); the LTP endpoint fills only `last_price`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KiteQuote {
    #[serde(default)]
    pub instrument_token: Option<u64>,
    #[serde(default)]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub net_change: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub ohlc: Option<Ohlc>,
    #[serde(default)]
    pub depth: Option<Depth>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ohlc {
    #[serde(default)]
    pub open: Option<Decimal>,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub close: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Depth {
    #[serde(default)]
    pub buy: Vec<DepthLevel>,
    #[serde(default)]
    pub sell: Vec<DepthLevel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepthLevel {
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub quantity: Decimal,
}

impl KiteQuote {
    /// Best offer from the sell side of the book.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.depth
            .as_ref()
            .and_then(|d| d.sell.first())
            .map(|level| level.price)
            .filter(|p| *p > Decimal::ZERO)
    }

    /// Day change against the previous close, in percent.
    pub fn change_percent(&self) -> Option<Decimal> {
        let prev_close = self.ohlc.as_ref()?.close.filter(|c| *c > Decimal::ZERO)?;
        let change = match self.net_change {
            Some(net) if !net.is_zero() => net,
            _ => self.last_price? - prev_close,
        };
        Some((change / prev_close * dec!(100)).round_dp(2))
    }

    pub fn into_quote(self, symbol: &str, lot_size: Option<u32>) -> Quote {
        let mut quote = Quote::new(symbol);
        quote.ask = self.best_ask();
        quote.change_percent = self.change_percent();
        quote.last_traded_price = self.last_price;
        quote.volume = self.volume.unwrap_or(Decimal::ZERO);
        if let Some(ts) = self.timestamp {
            quote.timestamp = ts;
        }
        quote.lot_size = lot_size.filter(|lot| *lot > 0);
        quote
    }
}

/// Strip the `EXCHANGE:` prefix from a quote key.
pub fn symbol_from_key(key: &str) -> &str {
    key.rsplit_once(':').map(|(_, sym)| sym).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange\n\
        13238786,51714,RELIANCE25NOVFUT,\"RELIANCE\",0,2025-11-25,0,0.1,500,FUT,NFO-FUT,NFO\n\
        13239042,51715,RELIANCE25DEC1500CE,\"RELIANCE\",0,2025-12-30,1500,0.05,500,CE,NFO-OPT,NFO\n\
        ,,BROKENROW,,,,,,,,,\n";

    #[test]
    fn test_parse_instrument_dump() {
        let instruments = parse_instruments_csv(DUMP, "NFO").unwrap();
        assert_eq!(instruments.len(), 2);

        let fut = &instruments[0];
        assert!(fut.is_future());
        assert_eq!(fut.name, "RELIANCE");
        assert_eq!(fut.lot_size, 500);
        assert_eq!(fut.expiry, NaiveDate::from_ymd_opt(2025, 11, 25));
        assert_eq!(fut.quote_key(), "NFO:RELIANCE25NOVFUT");
        assert!(!instruments[1].is_future());
    }

    #[test]
    fn test_full_quote_conversion() {
        let body = r#"{
            "status": "success",
            "data": {
                "NFO:RELIANCE25NOVFUT": {
                    "instrument_token": 13238786,
                    "last_price": 2860.0,
                    "volume": 1200500,
                    "net_change": 0,
                    "ohlc": { "open": 2840, "high": 2870, "low": 2835, "close": 2800 },
                    "depth": {
                        "buy": [{ "price": 2859.5, "quantity": 500, "orders": 2 }],
                        "sell": [{ "price": 2861.0, "quantity": 1000, "orders": 3 }]
                    }
                }
            }
        }"#;
        let envelope: QuoteEnvelope = serde_json::from_str(body).unwrap();
        let data = envelope.into_data().unwrap();
        let (key, raw) = data.into_iter().next().unwrap();

        let quote = raw.into_quote(symbol_from_key(&key), Some(500));
        assert_eq!(quote.symbol, "RELIANCE25NOVFUT");
        assert_eq!(quote.ask, Some(dec!(2861.0)));
        assert_eq!(quote.last_traded_price, Some(dec!(2860)));
        assert_eq!(quote.change_percent, Some(dec!(2.14)));
        assert_eq!(quote.lot_size, Some(500));
    }

    #[test]
    fn test_ltp_only_quote_falls_back_to_last_price() {
        let body = r#"{"status":"success","data":{"NSE:INFY":{"instrument_token":408065,"last_price":1510.8}}}"#;
        let envelope: QuoteEnvelope = serde_json::from_str(body).unwrap();
        let quote = envelope
            .into_data()
            .unwrap()
            .remove("NSE:INFY")
            .unwrap()
            .into_quote("INFY", None);

        assert_eq!(quote.ask, None);
        assert_eq!(quote.change_percent, None);
        assert_eq!(quote.effective_price(), Some(dec!(1510.8)));
    }

    #[test]
    fn test_error_envelope_maps_permission() {
        let body = r#"{"status":"error","message":"Insufficient permission for that call.","error_type":"PermissionException"}"#;
        let envelope: QuoteEnvelope = serde_json::from_str(body).unwrap();
        assert!(matches!(
            envelope.into_data(),
            Err(QuoteSourceError::PermissionDenied(_))
        ));
    }
}
