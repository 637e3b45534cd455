use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tower_http::cors::CorsLayer;

use crate::pipeline::TickOutput;
use crate::sink::OrientationSink;
use crate::types::Orientation;

/// Latest corrected orientation per channel, as served to clients
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationSnapshot {
    pub t: f64,
    pub calibrated: bool,
    pub calibrations: u64,
    pub channels: Vec<Option<Orientation>>,
}

pub type SharedSnapshot = Arc<RwLock<OrientationSnapshot>>;

pub fn shared_snapshot(channel_count: usize) -> SharedSnapshot {
    Arc::new(RwLock::new(OrientationSnapshot {
        channels: vec![None; channel_count],
        ..Default::default()
    }))
}

/// Sink side of the dashboard: the tick loop writes, the server reads
pub struct SnapshotSink {
    shared: SharedSnapshot,
}

impl SnapshotSink {
    pub fn new(shared: SharedSnapshot) -> Self {
        Self { shared }
    }
}

impl OrientationSink for SnapshotSink {
    fn apply(&mut self, output: &TickOutput) -> Result<()> {
        // Tick loop must never wait on a slow client
        let Ok(mut snap) = self.shared.try_write() else {
            return Ok(());
        };
        snap.t = output.now;
        snap.calibrated = output.calibrated;
        snap.calibrations = output.calibrations;
        for o in &output.orientations {
            if let Some(slot) = snap.channels.get_mut(o.channel) {
                *slot = Some(o.orientation);
            }
        }
        Ok(())
    }
}

pub fn router(shared: SharedSnapshot) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/orientations", get(orientations_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(shared)
}

pub async fn start_dashboard(shared: SharedSnapshot, port: u16) -> Result<()> {
    let app = router(shared);

    let addr = format!("0.0.0.0:{}", port);
    log::info!("[DASHBOARD] Starting embedded server at http://{}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind dashboard on {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("dashboard_static.html"))
}

async fn orientations_handler(State(state): State<SharedSnapshot>) -> Json<OrientationSnapshot> {
    Json(state.read().await.clone())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedSnapshot>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: SharedSnapshot) {
    loop {
        let snapshot = state.read().await.clone();
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("[DASHBOARD] Failed to encode snapshot: {}", e);
                break;
            }
        };
        if socket.send(Message::Text(json)).await.is_err() {
            // Client disconnected
            break;
        }

        // 20Hz updates (50ms)
        sleep(Duration::from_millis(50)).await;
    }
}
