pub mod config;
pub mod handshake_auth;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::routing::get;
use axum::Router;

/// Route table (§6): a single upgrade route shared by clients and sisters
/// (classified by the handshake auth collaborator), plus health endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::upgrade_handler))
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
