//! HTTP surface
//!
//! Thin axum layer over the core: message posting (NDJSON stream), state
//! retrieval, precedent save/delete, chat CRUD and artifact upload. All
//! orchestration behavior lives behind [`crate::stream`]; handlers only
//! translate between HTTP and the core's types.

pub mod handlers;

use crate::config::GenesisConfig;
use crate::orchestrator::Orchestrator;
use crate::repo::{ChatRepo, MessageRepo, StateRepo, VectorStore};
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub chats: Arc<dyn ChatRepo>,
    pub messages: Arc<dyn MessageRepo>,
    pub states: Arc<dyn StateRepo>,
    pub vectors: Arc<dyn VectorStore>,
    pub config: GenesisConfig,
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    // POST takes a chat id, GET a message id; the single pattern keeps
    // the router happy and handlers read the id positionally.
    Router::new()
        .route(
            "/messages/:id",
            post(handlers::post_message).get(handlers::get_message_state),
        )
        .route(
            "/messages/:id/precedent",
            post(handlers::save_precedent).delete(handlers::delete_precedent),
        )
        .route(
            "/chats",
            get(handlers::list_chats).post(handlers::create_chat),
        )
        .route(
            "/chats/:chat_id",
            put(handlers::rename_chat).delete(handlers::delete_chat),
        )
        .route(
            "/artifacts/:chat_id/upload",
            post(handlers::upload_artifacts),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
