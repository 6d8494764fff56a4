//! API routes for telemd
//!
//! - `GET /health`
//! - `GET /points`
//! - `GET /history/:key?start=<ms>&end=<ms>`
//! - `GET /realtime?ids=<key,key>` (server-sent events)
//! - `GET /metrics`

use crate::engine::DriverPhase;
use crate::hub::Subscription;
use crate::server::AppState;
use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use telem_shared::{PointKey, Sample};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info};

type AppStateArc = Arc<AppState>;

/// Samples buffered per realtime client before it counts as lagging
const REALTIME_BUFFER: usize = 1024;

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub phase: String,
    pub cycles: u64,
    pub points: usize,
    pub listeners: usize,
    pub uptime_secs: u64,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    let engine = &state.engine;
    let phase = match engine.phase() {
        DriverPhase::Idle => "idle",
        DriverPhase::Running => "running",
        DriverPhase::Stopped => "stopped",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        phase: phase.to_string(),
        cycles: engine.cycles_completed(),
        points: engine.point_keys().len(),
        listeners: engine.hub().listener_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Point Routes
// ============================================================================

pub fn point_routes() -> Router<AppStateArc> {
    Router::new().route("/points", get(list_points))
}

async fn list_points(State(state): State<AppStateArc>) -> Json<Vec<PointKey>> {
    Json(state.engine.point_keys().to_vec())
}

// ============================================================================
// History Routes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Inclusive lower bound, epoch milliseconds
    pub start: Option<i64>,
    /// Inclusive upper bound, epoch milliseconds
    pub end: Option<i64>,
}

pub fn history_routes() -> Router<AppStateArc> {
    Router::new().route("/history/:key", get(get_history))
}

fn parse_millis(raw: Option<i64>, name: &str) -> Result<Option<DateTime<Utc>>, (StatusCode, String)> {
    match raw {
        None => Ok(None),
        Some(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Some)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid {} timestamp: {}", name, ms))),
    }
}

async fn get_history(
    State(state): State<AppStateArc>,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Sample>>, (StatusCode, String)> {
    let start = parse_millis(query.start, "start")?;
    let end = parse_millis(query.end, "end")?;

    let samples = state
        .engine
        .history()
        .read_range(&key, start, end)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Point '{}' not found", key)))?;

    debug!("  History for {}: {} samples", key, samples.len());
    Ok(Json(samples))
}

// ============================================================================
// Realtime Routes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RealtimeQuery {
    /// Comma-separated point keys; all points when absent
    pub ids: Option<String>,
}

pub fn realtime_routes() -> Router<AppStateArc> {
    Router::new().route("/realtime", get(realtime))
}

/// Sample stream that drops its hub subscription when the client goes away
struct SubscriptionStream {
    inner: ReceiverStream<Sample>,
    subscription: Subscription,
}

impl Stream for SubscriptionStream {
    type Item = Sample;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Sample>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        info!("  Realtime client {} disconnected", self.subscription.id());
        self.subscription.unsubscribe();
    }
}

async fn realtime(
    State(state): State<AppStateArc>,
    Query(query): Query<RealtimeQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let filter: Option<HashSet<String>> = query.ids.map(|ids| {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    });

    let (tx, rx) = mpsc::channel::<Sample>(REALTIME_BUFFER);
    let subscription = state.engine.subscribe(move |sample| {
        if let Some(ids) = &filter {
            if !ids.contains(sample.id.as_str()) {
                return Ok(());
            }
        }
        tx.try_send(sample.clone())
            .map_err(|e| anyhow!("realtime client not keeping up: {}", e))
    });
    info!("  Realtime client {} connected", subscription.id());

    let stream = SubscriptionStream {
        inner: ReceiverStream::new(rx),
        subscription,
    }
    .map(|sample| Event::default().event("sample").json_data(&sample));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// Metrics Routes
// ============================================================================

pub fn metrics_routes() -> Router<AppStateArc> {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics(State(state): State<AppStateArc>) -> Response {
    match state.engine.metrics().export() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("  Metrics export failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
