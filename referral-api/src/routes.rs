//! API Routes
//!
//! Route definitions for the referral API.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{optional_auth, require_auth, require_internal_key};
use crate::handlers::*;
use crate::state::AppState;

/// Create the referral router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Signed-in users
    let user_routes = Router::new()
        .route("/referrals/codes", post(create_code))
        .route("/referrals/me", get(get_my_referrals))
        .route("/referrals/:referral_id/claim", post(claim_referral))
        .route("/referrals/codes/:code/deactivate", post(deactivate_code))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Anonymous or signed-in
    let public_routes = Router::new()
        .route("/referrals/redeem", post(redeem_code))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth))
        .route("/referrals/validate/:code", get(validate_code));

    // Trusted event producers
    let internal_routes = Router::new()
        .route("/referrals/complete", post(complete_referral))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_key,
        ));

    Router::new()
        .merge(user_routes)
        .merge(public_routes)
        .merge(internal_routes)
        .with_state(state)
}

/// Create a router for the V1 API with /api/v1 prefix
pub fn create_v1_router(state: Arc<AppState>) -> Router {
    Router::new().nest("/api/v1", create_router(state))
}

/// Build the full application router
pub fn build_app(state: AppState) -> Router {
    let state = Arc::new(state);
    let enable_cors = state.config.enable_cors;

    let health_router = Router::new()
        .route("/health", get(health_check))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/", get(|| async { "Referral API Service" }))
        .merge(health_router)
        .merge(create_v1_router(state));

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.layer(TraceLayer::new_for_http())
}
