use std::sync::Arc;

use shuttle_axum::axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::commands::Commands;
use crate::ports::Destination;

#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<Commands>,
}

/// Command routes. Replies are the same operator-facing strings the chat
/// surface produces, so a curl and a chat command read identically.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/quote", post(quote))
        .route("/push", post(push_all))
        .route("/push/test", post(test_push))
        .route("/providers", get(list_providers))
        .route("/providers/current", post(switch_provider))
        .route("/probe", get(run_probe))
        .route("/usage", get(usage))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn quote(State(state): State<AppState>) -> String {
    state.commands.quote().await
}

async fn push_all(State(state): State<AppState>) -> String {
    state.commands.push_all().await
}

#[derive(serde::Deserialize)]
struct TestPushReq {
    destination: String,
}

async fn test_push(State(state): State<AppState>, Json(body): Json<TestPushReq>) -> String {
    state
        .commands
        .test_push(&Destination(body.destination))
        .await
}

async fn list_providers(State(state): State<AppState>) -> String {
    state.commands.list_providers()
}

#[derive(serde::Deserialize)]
struct SwitchReq {
    /// 1-based, as the chat command takes it.
    index: usize,
}

async fn switch_provider(State(state): State<AppState>, Json(body): Json<SwitchReq>) -> String {
    state.commands.switch_provider(body.index)
}

async fn run_probe(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.commands.model_status().await)
}

async fn usage(State(state): State<AppState>) -> String {
    state.commands.usage_report().await
}
