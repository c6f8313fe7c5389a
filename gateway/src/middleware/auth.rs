//! Tenant authentication middleware: an exception list of unauthenticated routes plus bearer
//! token extraction and validation for everything else.

use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::http::HttpError;
use crate::identity::extract_bearer_token;
use crate::GatewayState;

struct AuthException {
    method: Method,
    path: &'static str,
}

/// Routes reachable without a tenant credential.
const AUTH_EXCEPTIONS: &[AuthException] = &[
    AuthException { method: Method::GET, path: "/health" },
    AuthException { method: Method::GET, path: "/ready" },
    AuthException { method: Method::GET, path: "/metrics" },
];

pub async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<GatewayState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, HttpError> {
    let method = request.method().clone();
    let uri_path = request.uri().path().to_owned();

    let skip_authentication = AUTH_EXCEPTIONS
        .iter()
        .any(|exception| exception.method == method && exception.path == uri_path);

    if skip_authentication {
        trace!(path = %uri_path, "unauthenticated route");
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();

    let header_value = parts.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    let token = extract_bearer_token(header_value)
        .map_err(HttpError::unauthorized().err())?
        .to_owned();

    let conf = state.conf_handle.get_conf();

    let tenant = state
        .identity_client
        .validate_credential(&token, conf.identity_call_timeout)
        .await
        .map_err(HttpError::unauthorized().err())?;

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(tenant);

    Ok(next.run(request).await)
}
