//! HTTP surface of the gateway: the client-facing openai and anthropic
//! routes plus the management API. Authentication is the embedding
//! server's job; these routers only implement behavior.

mod chat;
mod management;
mod messages;
mod models;
mod prepare;


use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::Gateway;

/// Router of the client-facing endpoints.
pub fn client_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/openai/v1/chat/completions", post(chat::chat_completions))
        .route(
            "/openai/v1/chat/completions/{scenario}",
            post(chat::chat_completions_scoped),
        )
        .route("/openai/v1/models", get(models::openai_models))
        .route("/anthropic/v1/messages", post(messages::messages))
        .route("/anthropic/v1/messages/count_tokens", post(messages::count_tokens))
        .route("/anthropic/v1/messages/{scenario}", post(messages::messages_scoped))
        .route("/anthropic/v1/models", get(models::anthropic_models))
        .route("/v1/models", get(models::openai_models))
        .with_state(gateway)
}

/// Router of the management endpoints. Mount behind bearer-JWT auth.
pub fn management_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(
            "/providers",
            get(management::list_providers).post(management::create_provider),
        )
        .route(
            "/providers/{uuid}",
            axum::routing::put(management::update_provider).delete(management::delete_provider),
        )
        .route(
            "/scenarios/{tag}/rules",
            get(management::list_rules).post(management::create_rule),
        )
        .route(
            "/scenarios/{tag}/rules/{uuid}",
            axum::routing::put(management::update_rule).delete(management::delete_rule),
        )
        .route("/scenarios/{tag}/flags", axum::routing::put(management::update_flags))
        .route("/probe/{provider}/{model}", post(management::run_probe))
        .route("/stats", get(management::stats).delete(management::clear_stats))
        .route("/usage", get(management::usage))
        .with_state(gateway)
}
