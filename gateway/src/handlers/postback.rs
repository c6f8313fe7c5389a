//! `POST /postback`.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::capture::{build_captured_request, parse_query, required_click_id, routing_fields};
use crate::dedup::{dedup_key, ClaimOutcome};
use crate::extract::AuthenticatedTenant;
use crate::http::HttpError;
use crate::model::{now_ms, CapturedEvent, EventKind};
use crate::pipeline::SubmitOutcome;
use crate::router::RouteError;
use crate::GatewayState;

pub async fn postback(
    State(state): State<GatewayState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let conf = state.conf_handle.get_conf();
    let ingested_at_ms = now_ms();

    let query = parse_query(uri.query());

    let click_id = required_click_id(&query)
        .ok_or_else(|| HttpError::bad_request().msg("missing required click id"))?;

    let fields = routing_fields(&query, ingested_at_ms);

    let campaign_id = match state.router.resolve(&tenant.tenant_id, None, &fields) {
        Ok((campaign, _destination)) => campaign.campaign_id,
        Err(RouteError::NoDestination) => String::new(),
    };

    let captured_request = build_captured_request(
        "POST",
        uri.path(),
        query,
        &headers,
        body.to_vec(),
        conf.body_capture_cap_bytes,
        Some(peer),
    );

    let mut event = CapturedEvent::new(
        Uuid::new_v4(),
        ingested_at_ms,
        tenant.tenant_id.clone(),
        EventKind::Postback,
        click_id.clone(),
        campaign_id,
        captured_request,
    )
    .map_err(HttpError::internal().err())?;

    let claim_key = dedup_key(&tenant.tenant_id, &click_id);
    match state.dedup.claim(&claim_key, conf.dedup_window, conf.dedup_call_deadline).await {
        ClaimOutcome::Fresh => {
            state.metrics.dedup_claims_fresh.fetch_add(1, Ordering::Relaxed);
        }
        ClaimOutcome::Duplicate => {
            event.mark_duplicate();
            state.metrics.dedup_claims_duplicate.fetch_add(1, Ordering::Relaxed);
        }
        ClaimOutcome::DegradedOpen => {
            state.metrics.dedup_degraded_open.fetch_add(1, Ordering::Relaxed);
        }
    }

    match state.pipeline.submit(event).await {
        SubmitOutcome::Accepted => {
            state.metrics.pipeline_accepted.fetch_add(1, Ordering::Relaxed);
        }
        SubmitOutcome::ShedToDlq => {
            state.metrics.pipeline_shed_to_dlq.fetch_add(1, Ordering::Relaxed);
        }
        SubmitOutcome::Rejected => {
            state.metrics.pipeline_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(HttpError::service_unavailable().msg("ingestion pipeline saturated"));
        }
    }

    Ok(StatusCode::OK.into_response())
}
