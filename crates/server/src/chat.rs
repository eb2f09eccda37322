use std::sync::Arc;

use axum::{extract::State, routing::get, routing::post, Json, Router};
use helios_agent::{AgentRouter, ChatRequest, ChatResponse};
use serde_json::{json, Value};

pub const SERVICE_BANNER: &str = "Helios Dynamics ERP Agent System is running!";

pub fn router(agent_router: Arc<AgentRouter>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/chat/", post(chat))
        .with_state(agent_router)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": SERVICE_BANNER }))
}

async fn chat(
    State(agent_router): State<Arc<AgentRouter>>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    tracing::info!(
        event_name = "system.server.chat.request",
        session_id = request.session_id.as_deref().unwrap_or("new"),
        has_approval_token = request.approval_token.is_some(),
        "chat request received"
    );
    Json(agent_router.handle(request).await)
}
