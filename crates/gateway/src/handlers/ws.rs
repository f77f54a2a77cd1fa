//! WebSocket upgrade

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::socket::connection::{self, ConnectionSettings};
use crate::AppState;

pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let settings = ConnectionSettings::from_config(&state.config.server);
    let pipeline = state.pipeline.clone();
    ws.on_upgrade(move |socket| connection::serve(socket, pipeline, settings))
}
