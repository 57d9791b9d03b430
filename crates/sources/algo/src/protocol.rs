use futarb_core::{ContractSymbol, Quote, QuoteSnapshot, QuoteSourceError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Segment keys carried by combined and streamed payloads.
/// `next` is the backend's second name for `near`.
pub const SEGMENT_KEYS: [&str; 4] = ["current", "near", "next", "far"];

/// One item of a backend collection.
#[derive(Debug, Clone, Deserialize)]
pub struct AlgoQuote {
    pub symbol: String,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub ltp: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub change: Option<Decimal>,
    #[serde(default)]
    pub change_pct: Option<Decimal>,
    /// String or epoch number depending on the endpoint.
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub contract_info: Option<ContractInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractInfo {
    #[serde(default)]
    pub lot_size: Option<Decimal>,
}

impl AlgoQuote {
    pub fn into_quote(self) -> Quote {
        let mut quote = Quote::new(&self.symbol.trim().to_ascii_uppercase());
        quote.ask = self.ask;
        quote.last_traded_price = self.ltp;
        quote.volume = self.volume.unwrap_or(Decimal::ZERO);
        quote.change_percent = self.change_pct;
        match self.timestamp {
            Some(Value::String(ts)) => quote.timestamp = ts,
            Some(Value::Null) | None => {}
            Some(other) => quote.timestamp = other.to_string(),
        }
        quote.lot_size = self
            .contract_info
            .and_then(|info| info.lot_size)
            .and_then(|lot| lot.to_u32())
            .filter(|lot| *lot > 0);
        quote
    }
}

/// Parse a `{ "data": { key: item, ... } }` collection response.
///
/// A missing `data` key is an error; an empty collection is not.
pub fn parse_collection(body: &Value) -> Result<Vec<Quote>, QuoteSourceError> {
    let data = body
        .get("data")
        .filter(|d| !d.is_null())
        .ok_or_else(|| missing_data(body))?;
    collection_items(data)
        .map(quotes_from_items)
        .ok_or_else(|| QuoteSourceError::ParseError("data is not a collection".into()))
}

/// Parse the combined-futures response: `{ "data": { current, near, next, far } }`.
/// Every segment's contracts are returned untagged.
pub fn parse_combined(body: &Value) -> Result<Vec<Quote>, QuoteSourceError> {
    let data = body
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| missing_data(body))?;

    let segments: Vec<&Value> = SEGMENT_KEYS.iter().filter_map(|k| data.get(*k)).collect();
    if segments.is_empty() {
        return Err(QuoteSourceError::MissingData(
            "combined response has no expiry segments".into(),
        ));
    }

    Ok(segments
        .into_iter()
        .flat_map(|segment| segment_quotes(segment))
        .collect())
}

/// Parse one stream message. Returns `None` for messages of unknown shape.
///
/// Accepted shapes are `{ data: { current, near, far } }` and the same
/// object un-nested. Segments mix spot and futures items; they are split
/// by whether the symbol carries a futures suffix, and the futures are
/// left untagged for calendar classification.
pub fn parse_stream_event(data: &str) -> Result<Option<QuoteSnapshot>, QuoteSourceError> {
    let payload: Value = serde_json::from_str(data)
        .map_err(|e| QuoteSourceError::ParseError(format!("stream payload: {}", e)))?;

    let root = match payload.get("data") {
        Some(inner) if has_segment(inner) => inner,
        _ => &payload,
    };
    if !has_segment(root) {
        return Ok(None);
    }

    let (futures, spot): (Vec<Quote>, Vec<Quote>) = SEGMENT_KEYS
        .iter()
        .filter_map(|k| root.get(*k))
        .flat_map(segment_quotes)
        .partition(|q| ContractSymbol::parse(&q.symbol).is_futures());

    Ok(Some(QuoteSnapshot::new(spot).with_untagged(futures)))
}

fn has_segment(value: &Value) -> bool {
    SEGMENT_KEYS
        .iter()
        .any(|k| value.get(*k).is_some_and(|v| !v.is_null()))
}

/// A segment is either the item collection itself or `{ data: collection }`.
fn segment_quotes(segment: &Value) -> Vec<Quote> {
    let inner = segment.get("data").filter(|d| d.is_object() || d.is_array());
    collection_items(inner.unwrap_or(segment))
        .map(quotes_from_items)
        .unwrap_or_default()
}

fn collection_items(data: &Value) -> Option<Vec<&Value>> {
    match data {
        Value::Object(map) => Some(map.values().collect()),
        Value::Array(items) => Some(items.iter().collect()),
        _ => None,
    }
}

fn quotes_from_items(items: Vec<&Value>) -> Vec<Quote> {
    items
        .into_iter()
        .filter_map(|item| match AlgoQuote::deserialize(item) {
            Ok(q) if !q.symbol.trim().is_empty() => Some(q.into_quote()),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Skipping malformed collection item");
                None
            }
        })
        .collect()
}

fn missing_data(body: &Value) -> QuoteSourceError {
    let detail = body
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("response has no data collection");
    QuoteSourceError::MissingData(detail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futarb_core::ExpiryBucket;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_collection_items() {
        let body = json!({
            "success": true,
            "data": {
                "RELIANCE25NOVFUT": {
                    "symbol": "RELIANCE25NOVFUT",
                    "ask": 2861.5,
                    "ltp": 2860.0,
                    "volume": 12000,
                    "change_pct": 0.42,
                    "contract_info": { "lot_size": 500 }
                },
                "TCS25NOVFUT": { "symbol": "TCS25NOVFUT", "ask": null, "ltp": "3930.25" },
                "BROKEN": { "ask": 1 }
            }
        });

        let mut quotes = parse_collection(&body).unwrap();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        assert_eq!(quotes.len(), 2);

        assert_eq!(quotes[0].symbol, "RELIANCE25NOVFUT");
        assert_eq!(quotes[0].ask, Some(dec!(2861.5)));
        assert_eq!(quotes[0].lot_size, Some(500));
        assert_eq!(quotes[0].change_percent, Some(dec!(0.42)));

        assert_eq!(quotes[1].ask, None);
        assert_eq!(quotes[1].effective_price(), Some(dec!(3930.25)));
    }

    #[test]
    fn test_missing_data_is_an_error_but_empty_is_not() {
        let err = parse_collection(&json!({ "success": false, "error": "warming up" })).unwrap_err();
        assert!(matches!(err, QuoteSourceError::MissingData(ref m) if m == "warming up"));

        let empty = parse_collection(&json!({ "data": {} })).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_parse_combined_segments() {
        let body = json!({
            "success": true,
            "data": {
                "current": { "A": { "symbol": "INFY25NOVFUT", "ask": 1500 } },
                "next": { "B": { "symbol": "INFY25DECFUT", "ask": 1510 } },
                "far": {}
            }
        });
        let quotes = parse_combined(&body).unwrap();
        assert_eq!(quotes.len(), 2);

        let err = parse_combined(&json!({ "data": { "other": {} } })).unwrap_err();
        assert!(matches!(err, QuoteSourceError::MissingData(_)));
    }

    #[test]
    fn test_stream_event_nested_and_flat() {
        let nested = r#"{"data":{"current":{
            "a":{"symbol":"SBIN","ltp":800},
            "b":{"symbol":"SBIN25NOVFUT","ask":808}
        }}}"#;
        let snapshot = parse_stream_event(nested).unwrap().unwrap();
        assert_eq!(snapshot.spot.len(), 1);
        assert_eq!(snapshot.futures.len(), 1);
        assert_eq!(snapshot.futures[0].bucket, None::<ExpiryBucket>);
        assert_eq!(snapshot.futures[0].quotes[0].symbol, "SBIN25NOVFUT");

        let flat = r#"{"near":{"x":{"symbol":"SBIN25DECFUT","ask":812}}}"#;
        let snapshot = parse_stream_event(flat).unwrap().unwrap();
        assert!(snapshot.spot.is_empty());
        assert_eq!(snapshot.futures_len(), 1);
    }

    #[test]
    fn test_stream_event_of_unknown_shape_is_ignored() {
        assert!(parse_stream_event(r#"{"heartbeat":1}"#).unwrap().is_none());
        assert!(parse_stream_event("not json").is_err());
    }
}
