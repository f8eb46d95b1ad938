//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the websocket RPC endpoint and a liveness probe under a
//! single Axum router. All chat operations travel over `/api/ws` as frames;
//! `/healthz` reports liveness and the number of live chats.

pub mod ws;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "chats": state.registry.chat_count().await }))
}
