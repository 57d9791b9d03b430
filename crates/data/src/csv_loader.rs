use futarb_core::{DataError, Quote};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Load quotes from a CSV file.
///
/// Expected columns (case-insensitive, flexible ordering):
/// `symbol` (or `tradingsymbol`, `instrument`), and at least one of
/// `ask` / `ltp`. Optional: `volume`, `change_pct`, `timestamp`, `lot_size`.
///
/// Empty price cells read as absent. Rows with an empty symbol are skipped.
pub fn load_quotes_from_csv(path: &Path) -> Result<Vec<Quote>, DataError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let cols = resolve_quote_columns(&headers)?;

    let mut quotes = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;
        let row = line + 2;

        let symbol = record.get(cols.symbol).unwrap_or("").trim();
        if symbol.is_empty() {
            continue;
        }

        let mut quote = Quote::new(&symbol.to_ascii_uppercase());
        quote.ask = optional_decimal(&record, cols.ask, "ask", row)?;
        quote.last_traded_price = optional_decimal(&record, cols.ltp, "ltp", row)?;
        quote.volume = optional_decimal(&record, cols.volume, "volume", row)?.unwrap_or(Decimal::ZERO);
        quote.change_percent = optional_decimal(&record, cols.change_percent, "change_pct", row)?;
        if let Some(ts) = cols.timestamp.and_then(|i| record.get(i)).filter(|s| !s.is_empty()) {
            quote.timestamp = ts.to_string();
        }
        quote.lot_size = match cols.lot_size.and_then(|i| record.get(i)).filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_lot(raw, row)?),
            None => None,
        };

        quotes.push(quote);
    }

    debug!(path = %path.display(), quotes = quotes.len(), "Loaded quotes from CSV");
    Ok(quotes)
}

/// Load a `symbol,lot_size` table from a CSV file.
///
/// Symbols are upper-cased; later rows override earlier ones when the
/// result is inserted into a table.
pub fn load_lot_sizes_from_csv(path: &Path) -> Result<Vec<(String, u32)>, DataError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let symbol_col = find_column(&headers, &["symbol", "base_symbol", "name", "underlying"])
        .ok_or_else(|| DataError::ParseError("No symbol column found".into()))?;
    let lot_col = find_column(&headers, &["lot_size", "lotsize", "lot", "market_lot"])
        .ok_or_else(|| DataError::ParseError("No lot_size column found".into()))?;

    let mut entries = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;
        let symbol = record.get(symbol_col).unwrap_or("").trim();
        if symbol.is_empty() {
            continue;
        }
        let lot = parse_lot(record.get(lot_col).unwrap_or(""), line + 2)?;
        entries.push((symbol.to_ascii_uppercase(), lot));
    }

    debug!(path = %path.display(), entries = entries.len(), "Loaded lot sizes from CSV");
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct QuoteColumnMap {
    symbol: usize,
    ask: Option<usize>,
    ltp: Option<usize>,
    volume: Option<usize>,
    change_percent: Option<usize>,
    timestamp: Option<usize>,
    lot_size: Option<usize>,
}

fn resolve_quote_columns(headers: &csv::StringRecord) -> Result<QuoteColumnMap, DataError> {
    let symbol = find_column(headers, &["symbol", "tradingsymbol", "instrument", "ticker"])
        .ok_or_else(|| DataError::ParseError("No symbol column found".into()))?;
    let ask = find_column(headers, &["ask", "offer", "sell_price"]);
    let ltp = find_column(headers, &["ltp", "last_price", "last", "price", "close"]);
    if ask.is_none() && ltp.is_none() {
        return Err(DataError::ParseError("No ask or ltp column found".into()));
    }

    Ok(QuoteColumnMap {
        symbol,
        ask,
        ltp,
        volume: find_column(headers, &["volume", "vol"]),
        change_percent: find_column(headers, &["change_pct", "change_percent", "pchange"]),
        timestamp: find_column(headers, &["timestamp", "time", "datetime", "date"]),
        lot_size: find_column(headers, &["lot_size", "lotsize", "lot"]),
    })
}

fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, DataError> {
    if !path.exists() {
        return Err(DataError::NotFound(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::ParseError(format!("Failed to open CSV: {}", e)))
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let h = header.trim().to_lowercase();
        names.iter().any(|name| h == *name)
    })
}

fn optional_decimal(
    record: &csv::StringRecord,
    col: Option<usize>,
    field: &str,
    row: usize,
) -> Result<Option<Decimal>, DataError> {
    let Some(raw) = col.and_then(|i| record.get(i)).map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(raw).map(Some).map_err(|e| {
        DataError::ParseError(format!("Line {}: failed to parse {} '{}': {}", row, field, raw, e))
    })
}

fn parse_lot(raw: &str, row: usize) -> Result<u32, DataError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|e| DataError::ParseError(format!("Line {}: invalid lot size '{}': {}", row, raw, e)))
}
