//! `/in` and `/in/{campaign_id}`.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::capture::{build_captured_request, flatten_query_pairs, parse_query, resolve_click_id, routing_fields};
use crate::dedup::{dedup_key, ClaimOutcome};
use crate::extract::AuthenticatedTenant;
use crate::http::HttpError;
use crate::model::{now_ms, CapturedEvent, EventKind, TenantContext};
use crate::pipeline::SubmitOutcome;
use crate::router::RouteError;
use crate::GatewayState;

pub async fn direct(
    State(state): State<GatewayState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    resolve_and_redirect(state, tenant, method, uri, headers, Some(peer), body, None).await
}

pub async fn forced_campaign(
    State(state): State<GatewayState>,
    Path(campaign_id): Path<String>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    resolve_and_redirect(state, tenant, method, uri, headers, Some(peer), body, Some(campaign_id)).await
}

/// Shared core for both `/in` routes. Order is load-bearing: tenant context is
/// already resolved by the time this runs (the auth middleware ran first); click id extraction,
/// routing, dedup, then submission follow in that fixed order.
#[allow(clippy::too_many_arguments)]
async fn resolve_and_redirect(
    state: GatewayState,
    tenant: TenantContext,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    peer: Option<SocketAddr>,
    body: Bytes,
    path_campaign_id: Option<String>,
) -> Result<Response, HttpError> {
    let conf = state.conf_handle.get_conf();
    let ingested_at_ms = now_ms();

    let query = parse_query(uri.query());
    let click_id = resolve_click_id(&query);
    let fields = routing_fields(&query, ingested_at_ms);

    let (resolved_campaign_id, destination) =
        match state.router.resolve(&tenant.tenant_id, path_campaign_id.as_deref(), &fields) {
            Ok((campaign, dest)) => {
                let inbound_pairs = flatten_query_pairs(&query);
                let destination = crate::router::build_destination(&dest, campaign.append_params, &inbound_pairs);
                (campaign.campaign_id, destination)
            }
            Err(RouteError::NoDestination) => match state.router.fallback_url(&tenant.tenant_id) {
                Some(fallback) => (String::new(), fallback),
                None => {
                    info!(tenant_id = %tenant.tenant_id, "no destination resolvable for request");
                    return Err(HttpError::not_found().msg("no destination resolvable for this tenant"));
                }
            },
        };

    let captured_request = build_captured_request(
        method.as_str(),
        uri.path(),
        query,
        &headers,
        body.to_vec(),
        conf.body_capture_cap_bytes,
        peer,
    );

    let mut event = CapturedEvent::new(
        Uuid::new_v4(),
        ingested_at_ms,
        tenant.tenant_id.clone(),
        EventKind::Click,
        click_id.clone(),
        resolved_campaign_id,
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

    Ok((StatusCode::FOUND, [(header::LOCATION, destination)]).into_response())
}
