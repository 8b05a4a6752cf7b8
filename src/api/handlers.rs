use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use super::ws::serve_session;
use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
pub(super) struct StatusResponse {
    status: &'static str,
    websocket_clients: usize,
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        websocket_clients: state.sessions.len(),
    })
}

pub(super) async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max = state.transport.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| serve_session(socket, state))
}
