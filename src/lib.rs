pub mod auth;
pub mod config;
pub mod cycle;
pub mod db;
pub mod error;
pub mod extract;
pub mod generation;
pub mod insights;
pub mod llm;
pub mod models;
pub mod routes;
pub mod scoring;
pub mod state;
pub mod stripe;
pub mod validation;

use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::state::AppState;

/// The full application: every route plus the tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .merge(routes::health::routes())
        .nest("/api", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
