use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futarb_board::{FeedStatus, SortKey, ViewOptions};
use futarb_core::*;
use futarb_engine::lookup_lot_size;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

const DEFAULT_ALERT_LIMIT: usize = 20;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Board
        .route("/rows", get(list_rows))
        .route("/stats", get(board_stats))
        .route("/alerts", get(list_alerts))
        .route("/contract/{symbol}", get(get_contract))
        // Reference data
        .route("/lot-size/{symbol}", get(get_lot_size))
        .route("/classify/{symbol}", get(classify_symbol))
        // Live events
        .route("/stream", get(event_stream))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let board = state.board.read().await;
    let feed = board.feed();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "source": state.refresher.source_name(),
        "feed": feed.status,
        "latest_seq": feed.latest_seq,
        "updated_at": feed.updated_at,
    }))
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RowsQuery {
    bucket: Option<String>,
    profitable_only: Option<bool>,
    sort: Option<String>,
    search: Option<String>,
    limit: Option<usize>,
}

impl RowsQuery {
    fn into_options(self) -> Result<ViewOptions, String> {
        let bucket = self
            .bucket
            .map(|b| b.parse::<ExpiryBucket>())
            .transpose()
            .map_err(|e| e.to_string())?;
        let sort = self
            .sort
            .map(|s| s.parse::<SortKey>())
            .transpose()
            .map_err(|e| e.to_string())?
            .unwrap_or_default();
        Ok(ViewOptions {
            bucket,
            profitable_only: self.profitable_only.unwrap_or(false),
            sort,
            search: self.search,
            limit: self.limit,
        })
    }
}

async fn list_rows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RowsQuery>,
) -> Response {
    let options = match query.into_options() {
        Ok(options) => options,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let board = state.board.read().await;
    let feed = board.feed();
    if feed.status == FeedStatus::Failed {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "Latest refresh failed upstream",
                "detail": feed.last_error,
                "latest_seq": feed.latest_seq,
            })),
        )
            .into_response();
    }

    let rows = board.view(&options).unwrap_or_default();
    Json(serde_json::json!({
        "status": feed.status,
        "seq": board.latest().map(|s| s.seq),
        "source": board.latest().map(|s| s.source.as_str()),
        "count": rows.len(),
        "rows": rows,
    }))
    .into_response()
}

async fn board_stats(State(state): State<Arc<AppState>>) -> Response {
    match state.board.read().await.stats() {
        Some(stats) => Json(stats).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "No snapshot available yet"),
    }
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let board = state.board.read().await;
    Json(board.recent_alerts(query.limit.unwrap_or(DEFAULT_ALERT_LIMIT)))
}

async fn get_contract(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    match state.board.read().await.find(&symbol) {
        Some(row) => Json(row.clone()).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Contract not on board: {}", symbol),
        ),
    }
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

async fn get_lot_size(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let base = resolve_base_symbol(&symbol);
    let lots = state.refresher.lots();
    Json(serde_json::json!({
        "symbol": symbol.to_ascii_uppercase(),
        "lot_size": lookup_lot_size(lots, &base),
        "defaulted": lots.get(&base).is_none(),
        "base_symbol": base,
    }))
}

async fn classify_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let parsed = ContractSymbol::parse(&symbol);
    let bucket = classify_expiry(state.refresher.calendar(), &symbol);
    Json(serde_json::json!({
        "symbol": parsed.raw,
        "base_symbol": parsed.base,
        "is_futures": parsed.is_futures(),
        "month_token": parsed.month_token,
        "bucket": bucket,
    }))
}

// ---------------------------------------------------------------------------
// Live events
// ---------------------------------------------------------------------------

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event.kind())
        .json_data(event)
        .unwrap_or_else(|e| SseEvent::default().comment(format!("unserializable event: {}", e)))
}

async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.subscribe();

    // New subscribers first see where the board currently stands.
    let initial: Option<Event> = state
        .board
        .read()
        .await
        .latest()
        .map(|s| Event::Snapshot(SnapshotEvent::from(s)));

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::iter(initial)
        .chain(live)
        .map(|event| Ok(to_sse(&event)));

    Sse::new(events).keep_alive(KeepAlive::default())
}
