use std::sync::Arc;

use axum::{http::HeaderValue, routing::get, Router};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// CORS policy from `Config.cors_origins`: an explicit origin list when one
/// is configured, permissive otherwise. Origins that fail to parse as header
/// values are logged and skipped rather than failing startup.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                    None
                }
            }
        }))
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `TraceLayer` — structured request/response logging via `tracing`.
/// 2. `CorsLayer` — dashboards poll these endpoints from the builder
///    frontend, which may be served on a different origin. The allowed
///    origins come from `LINKBOARD_CORS_ORIGINS`; unset means any origin.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/api/sites/{slug}/metrics",
            get(routes::metrics::query_metrics),
        )
        .route(
            "/api/sites/{slug}/metrics/report",
            get(routes::report::chart_report),
        )
        .route("/api/sites/{slug}/export", get(routes::export::export_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
