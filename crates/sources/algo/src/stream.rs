use futarb_core::{QuoteSnapshot, QuoteSourceError};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol;

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Largest partial event kept while waiting for its blank line.
const MAX_BUFFERED_BYTES: usize = 1 << 20;

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a blank line closes an event, so chunk
/// boundaries may fall anywhere, including inside a UTF-8 sequence or
/// between the two bytes of a CRLF. Lines may end in CRLF, LF or a lone CR.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        for &byte in chunk {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            if byte == b'\r' {
                self.buffer.push(b'\n');
                self.after_cr = true;
            } else {
                self.buffer.push(byte);
            }
        }

        let mut events = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block[..end]);
            if let Some(event) = parse_block(&text) {
                events.push(event);
            }
        }

        if self.buffer.len() > MAX_BUFFERED_BYTES {
            warn!(
                buffered = self.buffer.len(),
                limit = MAX_BUFFERED_BYTES,
                "Stream event never terminated, discarding buffer"
            );
            self.buffer.clear();
        }
        events
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut id = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        id,
        data: data.join("\n"),
    })
}

/// Consume the quote stream until the receiver is dropped, reconnecting
/// after `reconnect` whenever the connection ends or fails.
pub async fn run_stream(
    http: reqwest::Client,
    url: String,
    reconnect: Duration,
    tx: mpsc::Sender<QuoteSnapshot>,
) {
    loop {
        info!(%url, "Connecting to quote stream");
        match consume(&http, &url, &tx).await {
            Ok(()) => info!(%url, "Quote stream closed"),
            Err(e) => warn!(%url, error = %e, "Quote stream failed"),
        }
        if tx.is_closed() {
            debug!("Stream consumer gone, stopping");
            return;
        }
        tokio::time::sleep(reconnect).await;
    }
}

async fn consume(
    http: &reqwest::Client,
    url: &str,
    tx: &mpsc::Sender<QuoteSnapshot>,
) -> Result<(), QuoteSourceError> {
    let response = http
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| QuoteSourceError::ConnectionFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(QuoteSourceError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| QuoteSourceError::ConnectionFailed(e.to_string()))?;
        for event in decoder.push(&chunk) {
            match protocol::parse_stream_event(&event.data) {
                Ok(Some(snapshot)) => {
                    debug!(
                        spot = snapshot.spot.len(),
                        futures = snapshot.futures_len(),
                        "Stream snapshot"
                    );
                    if tx.send(snapshot).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => debug!(event = ?event.event, "Ignoring stream message of unknown shape"),
                Err(e) => warn!(error = %e, "Undecodable stream message"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: quotes\ndata: {\"a\"").is_empty());
        let events = decoder.push(b":1}\r\n\r\ndata: two\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("quotes"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn test_decoder_joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\nid: 7\ndata: line1\ndata:line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_decoder_accepts_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: quotes\rdata: one\r\rdata: two\r");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("quotes"));
        assert_eq!(events[0].data, "one");

        // CRLF split across chunks is one line ending, not two.
        assert!(decoder.push(b"\n").is_empty());
        let events = decoder.push(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "two");
    }

    #[test]
    fn test_decoder_discards_unterminated_event() {
        let mut decoder = SseDecoder::new();
        let mut huge = b"data: ".to_vec();
        huge.resize(MAX_BUFFERED_BYTES + 1, b'x');
        assert!(decoder.push(&huge).is_empty());
        assert!(decoder.buffer.is_empty());

        let events = decoder.push(b"\n\ndata: ok\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn test_decoder_keeps_partial_utf8() {
        let mut decoder = SseDecoder::new();
        let text = "data: M&M ₹\n\n".as_bytes();
        let (head, tail) = text.split_at(text.len() - 4);
        assert!(decoder.push(head).is_empty());
        let events = decoder.push(tail);
        assert_eq!(events[0].data, "M&M ₹");
    }
}
