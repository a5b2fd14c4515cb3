//! API routes

use axum::Router;

use crate::AppState;

mod chat;

/// Build the API router with all endpoints
pub fn api_router() -> Router<AppState> {
    Router::new().nest("/openai/deployments", chat::router())
}
