//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Extension;

use crate::http::HttpError;
use crate::model::TenantContext;

/// Pulls the [`TenantContext`] the auth middleware inserted into request extensions. Every
/// handler behind the auth middleware can take this by value instead of re-deriving it.
#[derive(Clone)]
pub struct AuthenticatedTenant(pub TenantContext);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedTenant
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tenant = Extension::<TenantContext>::from_request_parts(parts, state)
            .await
            .map_err(HttpError::internal().err())?
            .0;
        Ok(Self(tenant))
    }
}
