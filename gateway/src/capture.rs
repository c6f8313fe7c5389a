//! Request capture: click id resolution, client IP resolution, and [`CapturedRequest`] assembly.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::model::CapturedRequest;

/// Parameter aliases checked, in order, for an inbound click id.
const CLICK_ID_ALIASES: &[&str] = &["click_id", "clickid", "cid", "transaction_id", "tid"];

/// Parses a raw URI query string into a multi-valued map, preserving every value for a
/// repeated key.
pub fn parse_query(raw_query: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();

    if let Some(raw_query) = raw_query {
        for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            out.entry(key.into_owned()).or_default().push(value.into_owned());
        }
    }

    out
}

/// Returns the first non-empty click id alias present in `query`, or mints a fresh one.
pub fn resolve_click_id(query: &HashMap<String, Vec<String>>) -> String {
    for alias in CLICK_ID_ALIASES {
        if let Some(value) = query.get(*alias).and_then(|values| values.first()) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }

    Uuid::new_v4().to_string()
}

/// Required click id for `/postback`: returns `None` (→ 400) instead of minting one, since the
/// handler must reject the request rather than silently inventing a correlation token.
pub fn required_click_id(query: &HashMap<String, Vec<String>>) -> Option<String> {
    for alias in CLICK_ID_ALIASES {
        if let Some(value) = query.get(*alias).and_then(|values| values.first()) {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }
    }

    None
}

/// Resolves the client IP from, in order, the first entry of `X-Forwarded-For`, then
/// `X-Real-IP`, then the transport peer address.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded_for.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_owned());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_owned());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Lower-cases every header name and preserves multi-valued headers.
pub fn lower_case_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();

    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_lowercase()).or_default().push(value.to_owned());
        }
    }

    out
}

/// Truncates `body` to at most `cap` bytes rather than rejecting the request.
pub fn cap_body(mut body: Vec<u8>, cap: usize) -> Vec<u8> {
    body.truncate(cap);
    body
}

/// Builds a [`CapturedRequest`] from the pieces a handler has on hand after extraction.
#[allow(clippy::too_many_arguments)]
pub fn build_captured_request(
    method: &str,
    path: &str,
    query: HashMap<String, Vec<String>>,
    headers: &HeaderMap,
    body: Vec<u8>,
    body_cap: usize,
    peer: Option<SocketAddr>,
) -> CapturedRequest {
    CapturedRequest {
        method: method.to_owned(),
        path: path.to_owned(),
        query,
        headers: lower_case_headers(headers),
        body: cap_body(body, body_cap),
        client_ip: resolve_client_ip(headers, peer),
    }
}

/// Flattens a multi-valued query map to single values (first value wins) for rule evaluation,
/// and injects the derived `hour`/`day_of_week` fields from the ingestion timestamp. These two
/// fields are computed locally rather than sourced from an external enrichment service.
pub fn routing_fields(query: &HashMap<String, Vec<String>>, ingested_at_ms: u64) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = query
        .iter()
        .filter_map(|(k, values)| values.first().map(|v| (k.clone(), v.clone())))
        .collect();

    let seconds = (ingested_at_ms / 1000) as i64;
    if let Ok(now) = time::OffsetDateTime::from_unix_timestamp(seconds) {
        fields.insert("hour".to_owned(), now.hour().to_string());
        fields.insert("day_of_week".to_owned(), weekday_name(now.weekday()).to_owned());
    }

    fields
}

fn weekday_name(weekday: time::Weekday) -> &'static str {
    match weekday {
        time::Weekday::Monday => "monday",
        time::Weekday::Tuesday => "tuesday",
        time::Weekday::Wednesday => "wednesday",
        time::Weekday::Thursday => "thursday",
        time::Weekday::Friday => "friday",
        time::Weekday::Saturday => "saturday",
        time::Weekday::Sunday => "sunday",
    }
}

/// Flattens inbound query parameters to `(key, value)` pairs with all values preserved, used when
/// merging into the destination URL.
pub fn flatten_query_pairs(query: &HashMap<String, Vec<String>>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, values) in query {
        for value in values {
            pairs.push((key.clone(), value.clone()));
        }
    }
    pairs
}
