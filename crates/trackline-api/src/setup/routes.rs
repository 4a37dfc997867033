//! Route configuration and setup

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use trackline_broker::ConnectionState;
use trackline_core::Config;
use utoipa::{OpenApi, ToSchema};

use crate::api_doc::ApiDoc;
use crate::handlers;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` while the broker is connected, `degraded` while jobs are being buffered.
    pub status: String,
    pub broker: String,
    /// Jobs waiting in the offline buffer for the broker to come back.
    pub buffered_jobs: usize,
}

/// Build the router. CORS origins come from `config`; tests pass their own list.
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    build_router(state, config.cors_origins())
}

pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let cors = setup_cors(cors_origins);

    Router::new()
        .route(
            "/releases/{release_id}/tracks/{track_id}/audio",
            put(handlers::track_upload::upload_track_audio),
        )
        .route(
            "/releases/{release_id}/tracks/{track_id}",
            get(handlers::track_get::get_track).delete(handlers::track_delete::delete_track),
        )
        .route(
            "/releases/{release_id}/download",
            post(handlers::release_download::request_release_download),
        )
        .route("/events", get(handlers::events::event_stream))
        .route("/health", get(health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn setup_cors(origins: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    }
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let broker = state.supervisor.state();
    let status = if broker == ConnectionState::Connected {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        broker: broker.as_str().to_string(),
        buffered_jobs: state.publisher.buffered().await,
    })
}
