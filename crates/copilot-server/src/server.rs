// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Main server implementation

use axum::{
    routing::{get, post},
    Router,
};
use copilot_sync::CopilotConfig;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::error::{ServerError, ServerResult};
use crate::handlers;
use crate::state::AppState;

/// Routes and middleware around the given state
pub fn build_router(state: AppState) -> Router {
    let cors_enabled = state.config.server.cors_enabled;
    let middleware_stack = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http());

    let router = Router::new()
        .route("/agent", post(handlers::agent::run_agent))
        .route("/health", get(handlers::health::health_check))
        .with_state(state)
        .layer(middleware_stack);

    if cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

pub struct Server {
    config: std::sync::Arc<CopilotConfig>,
    app: Router,
}

impl Server {
    pub fn new(config: CopilotConfig) -> ServerResult<Self> {
        config.validate()?;
        Ok(Self::with_state(AppState::new(config)?))
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config.clone(),
            app: build_router(state),
        }
    }

    pub fn addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|err| ServerError::BadRequest(format!("Invalid listen address: {err}")))
    }

    pub async fn run(self) -> ServerResult<()> {
        let addr = self.addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, backend = ?self.config.backend.kind, "copilot server listening");

        axum::serve(listener, self.app)
            .await
            .map_err(|err| ServerError::Internal(format!("HTTP server error: {err}")))
    }
}
