pub mod auth;
pub mod subscription;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use http::HeaderValue;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::ToSchema;

use crate::{middleware::AuthState, state::AppState};

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// API version
    pub version: &'static str,
}

/// Health check endpoint
///
/// Returns the health status of the API service. Used by load balancers and
/// monitoring systems to verify service availability.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn is_origin_allowed(origin_str: &str, cors_config: &config::CorsConfig) -> bool {
    if cors_config.allowed_origins.iter().any(|o| o == origin_str) {
        return true;
    }

    for local in ["http://localhost", "http://127.0.0.1"] {
        if let Some(remainder) = origin_str.strip_prefix(local) {
            if remainder.is_empty() || remainder.starts_with(':') {
                return true;
            }
        }
    }

    false
}

/// Create the main API router with CORS configuration
pub fn create_router_with_cors(app_state: AppState, cors_config: config::CorsConfig) -> Router {
    // Create auth state for middleware
    let auth_state = AuthState {
        session_repository: app_state.session_repository.clone(),
    };

    // Routes requiring a session
    let protected_routes = Router::new()
        .route(
            "/v1/subscription/status",
            get(subscription::get_subscription_status),
        )
        .route("/v1/subscription/checkout", post(subscription::create_checkout))
        .route("/v1/auth/logout", post(auth::logout))
        .layer(from_fn_with_state(
            auth_state,
            crate::middleware::auth_middleware,
        ));

    // Public routes (webhook is authenticated by its signature, not a session)
    let public_routes = Router::new()
        .route("/v1/billing/webhook", post(subscription::handle_billing_webhook))
        .route("/v1/subscription/prices", get(subscription::list_prices));

    let router = Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(app_state);

    let cors_config_clone = cors_config.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts: &http::request::Parts| {
                let origin_str = match origin.to_str() {
                    Ok(s) => s,
                    Err(_) => return false,
                };
                is_origin_allowed(origin_str, &cors_config_clone)
            },
        ))
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    router.layer(cors)
}

/// Create the main API router with default CORS configuration
pub fn create_router(app_state: AppState) -> Router {
    create_router_with_cors(app_state, config::CorsConfig::default())
}
