//! `GET /pixel.gif`.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::capture::{build_captured_request, parse_query, resolve_click_id, routing_fields};
use crate::dedup::{dedup_key, ClaimOutcome};
use crate::extract::AuthenticatedTenant;
use crate::http::HttpError;
use crate::model::{now_ms, CapturedEvent, EventKind};
use crate::pipeline::SubmitOutcome;
use crate::router::RouteError;
use crate::GatewayState;

/// A valid, minimal, fully-transparent 1x1 GIF89a image.
const TRANSPARENT_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF,
    0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x44, 0x01, 0x00, 0x3B,
];

pub async fn pixel(
    State(state): State<GatewayState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let conf = state.conf_handle.get_conf();
    let ingested_at_ms = now_ms();

    let query = parse_query(uri.query());
    let click_id = resolve_click_id(&query);
    let fields = routing_fields(&query, ingested_at_ms);

    let campaign_id = match state.router.resolve(&tenant.tenant_id, None, &fields) {
        Ok((campaign, _destination)) => campaign.campaign_id,
        Err(RouteError::NoDestination) => String::new(),
    };

    let captured_request = build_captured_request(
        method.as_str(),
        uri.path(),
        query,
        &headers,
        Vec::new(),
        conf.body_capture_cap_bytes,
        Some(peer),
    );

    match CapturedEvent::new(
        Uuid::new_v4(),
        ingested_at_ms,
        tenant.tenant_id.clone(),
        EventKind::Pixel,
        click_id.clone(),
        campaign_id,
        captured_request,
    ) {
        Ok(mut event) => {
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
                    // The pixel response is never allowed to fail an ad impression: even total
                    // saturation still serves the image.
                }
            }
        }
        Err(error) => {
            error!(tenant_id = %tenant.tenant_id, %error, "failed to build pixel capture event");
        }
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, "image/gif")], TRANSPARENT_GIF.to_vec()).into_response()
}

#[cfg(test)]
mod tests {
    use super::TRANSPARENT_GIF;

    #[test]
    fn pixel_is_exactly_43_bytes() {
        assert_eq!(TRANSPARENT_GIF.len(), 43);
    }

    #[test]
    fn pixel_starts_with_gif_magic() {
        assert_eq!(&TRANSPARENT_GIF[0..6], b"GIF89a");
    }
}
