//! HTTP route handlers.
//!
//! Routes are grouped by caching policy. Every route, including the static
//! fallback, sits behind the compression negotiator, and the request ID
//! middleware wraps everything so compression decisions are logged inside
//! the request span.

pub mod api;
pub mod auth;
pub mod health;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use http::header::{HeaderValue, CACHE_CONTROL, LOCATION};
use http::StatusCode;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::compression::{compression_layer, Negotiator};
use crate::config::{CACHE_CONTROL_API, CACHE_CONTROL_PRIVATE, CACHE_CONTROL_STATIC};
use crate::http::static_files::{create_static_service, index};
use crate::middleware::request_id_layer;
use crate::state::AppState;

/// 302 Found to `location`
pub fn found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

/// Creates the Axum router with all routes and cache headers.
pub fn create_router(state: AppState) -> Router {
    let negotiator = Negotiator::with_cache_control(
        &state.config.content.static_dir,
        HeaderValue::from_static(CACHE_CONTROL_STATIC),
    );

    // API - short cache, generated per request
    let api_routes = Router::new().route("/api/hello", get(api::hello)).layer(
        SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_API),
        ),
    );

    // Session-dependent pages - never cached by shared caches
    let auth_routes = Router::new()
        .route("/login", get(auth::login))
        .route("/dashboard", get(auth::dashboard))
        .route("/logout", post(auth::logout))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_PRIVATE),
        ));

    // Site root - uncached, the login redirect disappears once an index is deployed
    let index_routes = Router::new().route("/", get(index));

    // Static files - long cache
    let static_routes = Router::new()
        .fallback_service(create_static_service(&state.config.content))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_STATIC),
        ));

    // Health check - no caching, always fresh for liveness checks
    let health_routes = Router::new().route("/health", get(health::health));

    Router::new()
        .merge(api_routes)
        .merge(auth_routes)
        .merge(health_routes)
        .merge(index_routes)
        .merge(static_routes)
        .with_state(state)
        .layer(middleware::from_fn_with_state(negotiator, compression_layer))
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
