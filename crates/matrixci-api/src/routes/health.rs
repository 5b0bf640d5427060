//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Json<Value> {
    let pool = state.dispatcher.orchestrator().pool();
    Json(json!({
        "status": "ready",
        "workflow": state.dispatcher.workflow().name,
        "workers": pool.size(),
        "idle_workers": pool.available(),
    }))
}
