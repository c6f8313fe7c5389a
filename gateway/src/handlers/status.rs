//! `/health`, `/ready`, `/metrics`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

use crate::GatewayState;

/// Identity payload for `/health`: plain text for a liveness probe, or a small JSON document
/// when the caller asks for it.
#[derive(Serialize)]
struct Identity {
    id: Uuid,
    hostname: String,
    version: &'static str,
}

/// Process liveness only: this never touches the snapshot, dedup store, or pipeline, so a
/// hung dependency can never make `/health` report unhealthy — that is `/ready`'s job.
pub async fn health(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let conf = state.conf_handle.get_conf();

    let wants_json = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .into_iter()
        .flat_map(|value| value.split(','))
        .any(|value| value.trim() == "application/json");

    if wants_json {
        axum::Json(Identity {
            id: conf.instance_id,
            hostname: conf.hostname.clone(),
            version: env!("CARGO_PKG_VERSION"),
        })
        .into_response()
    } else {
        "OK".into_response()
    }
}

/// 503 if the campaign snapshot has never loaded, or the DLQ is unreachable.
pub async fn ready(State(state): State<GatewayState>) -> StatusCode {
    if !state.router.is_loaded() {
        warn!("readiness check failed: campaign snapshot never loaded");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    if !state.pipeline.dlq().health_check().await {
        warn!("readiness check failed: DLQ unreachable");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::OK
}

/// Operational counters in Prometheus text exposition format.
pub async fn metrics(State(state): State<GatewayState>) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
