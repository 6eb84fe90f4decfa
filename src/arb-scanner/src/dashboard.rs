//! Dashboard server (C8): REST snapshot plus WebSocket broadcast. Owns no
//! business logic — every handler reads the atomic snapshots published by
//! the orchestrator (C5) and realtime workers (C6). Grounded in the pack's
//! axum + `tokio::sync::broadcast` dashboard pattern since the teacher
//! itself carries no HTTP surface.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::state::AppState;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>arb-scanner</title></head>
<body>
<h1>Cross-venue arbitrage scanner</h1>
<p>See <a href="/api/state">/api/state</a>, <a href="/health">/health</a>, and WebSocket <code>/ws</code>.</p>
</body>
</html>"#;

#[derive(Clone, Serialize)]
pub struct DashboardFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub data: serde_json::Value,
}

pub struct DashboardState {
    pub app: Arc<AppState>,
    pub broadcast: broadcast::Sender<DashboardFrame>,
    pub started_at: Instant,
}

impl DashboardState {
    pub fn new(app: Arc<AppState>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            app,
            broadcast: tx,
            started_at: Instant::now(),
        })
    }

    /// Called by the orchestrator/realtime workers after every publish so
    /// connected WebSocket clients see the update without polling.
    pub fn notify_state_changed(&self) {
        let frame = DashboardFrame {
            frame_type: "state".to_string(),
            data: build_state_json(&self.app),
        };
        let _ = self.broadcast.send(frame);
    }
}

fn build_state_json(state: &AppState) -> serde_json::Value {
    let catalogs = state.catalogs.load();
    let stats = state.stats.load();
    let threshold = **state.effective_threshold.load();

    let venue_counts: serde_json::Map<String, serde_json::Value> = catalogs
        .markets
        .iter()
        .map(|(venue, markets)| {
            let status = catalogs.status.get(venue).copied();
            (
                venue.to_string(),
                serde_json::json!({
                    "market_count": markets.len(),
                    "status": status,
                }),
            )
        })
        .collect();

    let top_opportunities = state.top_opportunities(50);

    serde_json::json!({
        "venues": venue_counts,
        "opportunities": top_opportunities,
        "scan_count": stats.scan_count,
        "last_scan_at": stats.last_scan_at,
        "effective_threshold_pct": threshold,
    })
}

async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn api_state(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    Json(build_state_json(&state.app))
}

#[derive(Serialize)]
struct HealthResponse {
    uptime_secs: u64,
    venues: serde_json::Value,
    scan_count: u64,
    last_scan_ok: bool,
}

async fn health(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let catalogs = state.app.catalogs.load();
    let stats = state.app.stats.load();
    let venues: serde_json::Map<String, serde_json::Value> = catalogs
        .status
        .iter()
        .map(|(venue, status)| (venue.to_string(), serde_json::json!(status)))
        .collect();

    Json(HealthResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        venues: serde_json::Value::Object(venues),
        scan_count: stats.scan_count,
        last_scan_ok: stats.last_scan_ok,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DashboardState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<DashboardState>) {
    let initial = DashboardFrame {
        frame_type: "state".to_string(),
        data: build_state_json(&state.app),
    };
    if let Ok(text) = serde_json::to_string(&initial) {
        if socket.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    let mut rx = state.broadcast.subscribe();
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "dashboard ws client lagged, resyncing");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("dashboard ws recv error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

pub fn router(state: Arc<DashboardState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/api/state", get(api_state))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(host: &str, port: u16, state: Arc<DashboardState>) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "dashboard listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
