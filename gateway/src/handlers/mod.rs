//! HTTP surface. Thin handlers: extract, delegate, respond — every handler
//! runs behind the auth middleware, a tracing span per request, and a `Cache-Control: no-store`
//! response layer.

mod pixel;
mod postback;
mod redirect;
mod status;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::{auth::auth_middleware, cache_control};
use crate::GatewayState;

pub fn make_router(state: GatewayState) -> Router {
    Router::new()
        .route("/in", get(redirect::direct).post(redirect::direct))
        .route("/in/{campaign_id}", get(redirect::forced_campaign).post(redirect::forced_campaign))
        .route("/pixel.gif", get(pixel::pixel))
        .route("/postback", post(postback::postback))
        .route("/health", get(status::health))
        .route("/ready", get(status::ready))
        .route("/metrics", get(status::metrics))
        .nest("/admin", crate::admin::make_router(state.clone()))
        .layer(axum::middleware::from_fn(cache_control::no_store))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
