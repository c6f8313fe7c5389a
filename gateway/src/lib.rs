//! `clickgate` — multi-tenant HTTP traffic-ingestion and campaign-routing gateway.
//!
//! The crate is organized around a thin `GatewayState` threaded through every handler via axum's
//! `State` extractor, modules per component, and a `make_http_service` entry point the binary's
//! listener hands every accepted connection to.

#[macro_use]
extern crate tracing;

pub mod admin;
pub mod capture;
pub mod config;
pub mod dedup;
pub mod extract;
pub mod handlers;
pub mod http;
pub mod identity;
pub mod listener;
pub mod log;
pub mod metrics;
pub mod middleware;
pub mod model;
pub mod pipeline;
pub mod router;

use std::sync::Arc;

use config::ConfHandle;
use dedup::DedupStore;
use identity::IdentityClient;
use router::CampaignStore;

/// `DedupClaimer` is generic over its backing store so tests can plug an in-process store; the
/// running process always holds a type-erased `Arc<dyn DedupStore>` so [`GatewayState`] itself
/// stays a plain, cheaply-`Clone`-able struct.
pub type Dedup = dedup::DedupClaimer<Arc<dyn DedupStore>>;

/// Everything a request handler needs, threaded explicitly through axum's `State` extractor.
/// Cloning is cheap: every field is an `Arc`/`ArcSwap`/channel handle.
#[derive(Clone)]
pub struct GatewayState {
    pub conf_handle: ConfHandle,
    pub identity_client: Arc<dyn IdentityClient>,
    pub dedup: Arc<Dedup>,
    pub router: router::Router,
    pub campaign_store: Arc<dyn CampaignStore>,
    pub pipeline: pipeline::AsyncPipeline,
    pub metrics: Arc<metrics::Metrics>,
}

/// Builds the full axum service: routes, the auth middleware, the tracing span layer, and the
/// cache-control response layer.
pub fn make_http_service(state: GatewayState) -> axum::Router {
    handlers::make_router(state)
}
