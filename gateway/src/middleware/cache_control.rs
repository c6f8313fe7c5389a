//! Applies `Cache-Control: no-store` to every response, as a thin response-mapping layer instead of repeating the header
//! in each handler body.

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

const NO_STORE: HeaderValue = HeaderValue::from_static("no-store");

pub async fn no_store(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(axum::http::header::CACHE_CONTROL, NO_STORE);
    response
}
