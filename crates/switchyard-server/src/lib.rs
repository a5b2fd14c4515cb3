//! Switchyard Server
//!
//! Exposes every configured agent as a chat-completions deployment.
//! This is a library crate; the server is started via `start_server()`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, http::Method, routing::get, Json, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use switchyard_core::ai::client::DialClient;
use switchyard_core::{Agent, SwitchyardConfig};

pub mod error;
pub mod routes;
pub mod types;

use types::HealthResponse;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Agents keyed by the deployment name they are served under.
    pub agents: Arc<BTreeMap<String, Arc<Agent>>>,
}

impl AppState {
    /// Build every agent in `config` against the configured upstream.
    pub fn from_config(config: &SwitchyardConfig) -> anyhow::Result<Self> {
        let client = DialClient::new(&config.upstream.endpoint)
            .with_api_version(&config.upstream.api_version)
            .with_default_api_key(config.upstream.api_key.clone());
        let agents = config.build_agents(Arc::new(client))?;
        Ok(Self {
            agents: Arc::new(agents),
        })
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Switchyard server and block until shutdown.
pub async fn start_server(config: SwitchyardConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    tracing::info!(
        "Switchyard server listening on http://{} (upstream {})",
        addr,
        config.upstream.endpoint
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        deployments: state.agents.keys().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_lists_deployments() {
        let state = AppState::from_config(&SwitchyardConfig::default()).unwrap();
        let Json(health) = health(State(state)).await;

        assert_eq!(health.status, "ok");
        assert_eq!(
            health.deployments,
            vec![
                "calculations-agent",
                "content-management-agent",
                "web-search-agent"
            ]
        );
    }
}
