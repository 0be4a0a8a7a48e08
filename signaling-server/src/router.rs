use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::relay::{self, Connections, Subscriptions};

#[derive(Default, Clone)]
pub struct ServerState {
    connections: Connections,
    subscriptions: Subscriptions,
}

#[allow(clippy::unused_async)]
async fn health_handler() -> &'static str {
    "OK"
}

#[allow(clippy::unused_async)]
async fn bus_handler(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| relay::user_connected(socket, state.connections, state.subscriptions))
}

pub fn create(server_state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/bus", get(bus_handler))
        .with_state(server_state)
}

/// Router with fresh, empty relay state.
pub fn create_router() -> Router {
    create(ServerState::default())
}
