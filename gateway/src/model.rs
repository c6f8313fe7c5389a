//! Wire-level shapes captured off the hot path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Millisecond-precision wall clock timestamp, taken once at capture time. The monotonic
/// component lives in the caller's per-request `Instant` used for the handler deadline; this is
/// the wall-clock half.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Attributes describing the authenticated caller for the lifetime of one request.
///
/// Never persisted, never shared between requests — passed as an explicit parameter down the
/// hot path instead of being retrieved from a process-wide location.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub permissions: Vec<String>,
    pub rate_limit: Option<RateLimitDescriptor>,
}

impl TenantContext {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitDescriptor {
    pub requests_per_second: u32,
    pub burst: u32,
}

/// Discriminates the three hot-path surfaces that produce a `CapturedEvent` so the sink can tell
/// them apart without three separate schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Click,
    Pixel,
    Postback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudFlag {
    DuplicateClick,
}

/// The method, path, headers, query parameters and (capped) body captured for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    /// Multi-valued: all values for a repeated query key are preserved.
    pub query: HashMap<String, Vec<String>>,
    /// Header names are lower-cased; values are multi-valued for the same reason.
    pub headers: HashMap<String, Vec<String>>,
    /// Truncated, never rejected, at the configured byte cap.
    pub body: Vec<u8>,
    pub client_ip: Option<String>,
}

/// Everything captured about one inbound request, destined for the event sink.
///
/// Invariant: `tenant_id` is never empty. Constructing one with an empty tenant id is a
/// programmer error and must be rejected at the boundary that would have produced it — see
/// [`CapturedEvent::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEvent {
    pub event_id: Uuid,
    /// Millisecond-precision wall clock timestamp, taken once at capture time.
    pub ingested_at_ms: u64,
    pub tenant_id: String,
    pub kind: EventKind,
    pub click_id: String,
    /// Empty when no campaign matched.
    pub campaign_id: String,
    pub request: CapturedRequest,
    pub fraud_flags: Vec<FraudFlag>,
}

impl CapturedEvent {
    /// Builds a new event. Returns an error if `tenant_id` is empty — callers on the hot path
    /// must treat this as an unreachable invariant violation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        ingested_at_ms: u64,
        tenant_id: String,
        kind: EventKind,
        click_id: String,
        campaign_id: String,
        request: CapturedRequest,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!tenant_id.is_empty(), "captured event with empty tenant id");

        Ok(Self {
            event_id,
            ingested_at_ms,
            tenant_id,
            kind,
            click_id,
            campaign_id,
            request,
            fraud_flags: Vec::new(),
        })
    }

    pub fn mark_duplicate(&mut self) {
        if !self.fraud_flags.contains(&FraudFlag::DuplicateClick) {
            self.fraud_flags.push(FraudFlag::DuplicateClick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_tenant_id() {
        let request = CapturedRequest {
            method: "GET".into(),
            path: "/in".into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            client_ip: None,
        };

        let result = CapturedEvent::new(Uuid::new_v4(), 0, String::new(), EventKind::Click, "c1".into(), String::new(), request);

        assert!(result.is_err());
    }
}
