pub mod auth;
pub mod broadcast;
pub mod state;
pub mod ws;

pub use state::GatewayState;

use axum::routing::get;
use axum::Router;

/// Routes: the one WebSocket surface (spec.md §6) plus health checks in the
/// teacher's `healthz`/`readyz` shape.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws/v1/stream", get(ws::ws_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
