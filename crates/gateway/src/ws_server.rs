//! WebSocket front end built on axum.
//!
//! Transport only: frames are shuttled between the socket and the
//! session's strand, and the session is closed when the socket goes away.
//! WebSocket connections are stateful, so no per-frame token travels with
//! inbound messages.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::services::Services;
use crate::session::{Session, SessionRegistry};

/// Shared application state.
pub struct AppState {
    pub services: Arc<Services>,
    pub sessions: Arc<SessionRegistry>,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    format!(r#"{{"status":"ok","sessions":{}}}"#, state.sessions.len())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let handle = Session::spawn(out_tx, false, state.services.clone());
    state.sessions.register(handle.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_sessions").set(state.sessions.len() as f64);
    info!("session {} connected", handle.id);

    // Forward outbound frames from the session's sink to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => handle.on_message(text.to_string(), None),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => handle.on_message(text, None),
                Err(_) => warn!("session {}: non-utf8 frame dropped", handle.id),
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!("session {}: websocket error: {e}", handle.id);
                break;
            }
        }
    }

    handle.close();
    state.sessions.unregister(&handle.id);
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_sessions").set(state.sessions.len() as f64);
    info!("session {} disconnected", handle.id);
}
