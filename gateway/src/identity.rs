//! The identity client.
//!
//! External collaborator: the gateway only consumes `ValidateCredential`. No default tenant is
//! ever synthesized when this call fails or times out.

use std::time::Duration;

use thiserror::Error;

use crate::model::TenantContext;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingCredential,
    #[error("malformed bearer token")]
    MalformedCredential,
    #[error("identity service rejected the credential")]
    Rejected,
    #[error("identity service unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

/// `ValidateCredential(token) -> (tenantId, permissions)`.
#[async_trait::async_trait]
pub trait IdentityClient: Send + Sync {
    async fn validate_credential(&self, token: &str, deadline: Duration) -> Result<TenantContext, AuthError>;
}

/// Pulls the bearer token out of an `Authorization` header value. Malformed tokens short-circuit
/// to a `MalformedCredential` error without ever reaching the identity service.
pub fn extract_bearer_token(header_value: Option<&str>) -> Result<&str, AuthError> {
    let header_value = header_value.ok_or(AuthError::MissingCredential)?;

    let token = header_value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MalformedCredential)?;

    if token.trim().is_empty() {
        return Err(AuthError::MalformedCredential);
    }

    Ok(token)
}

/// HTTP-backed implementation of [`IdentityClient`] calling an external identity service.
pub struct RemoteIdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteIdentityClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct ValidateResponse {
    tenant_id: String,
    #[serde(default)]
    permissions: Vec<String>,
}

#[async_trait::async_trait]
impl IdentityClient for RemoteIdentityClient {
    async fn validate_credential(&self, token: &str, deadline: Duration) -> Result<TenantContext, AuthError> {
        let response = self
            .http
            .post(format!("{}/validate", self.base_url))
            .json(&serde_json::json!({ "token": token }))
            .timeout(deadline)
            .send()
            .await
            .map_err(|error| AuthError::Unavailable(error.into()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::Rejected);
        }

        let body: ValidateResponse = response
            .error_for_status()
            .map_err(|error| AuthError::Unavailable(error.into()))?
            .json()
            .await
            .map_err(|error| AuthError::Unavailable(error.into()))?;

        if body.tenant_id.is_empty() {
            return Err(AuthError::Rejected);
        }

        Ok(TenantContext {
            tenant_id: body.tenant_id,
            permissions: body.permissions,
            rate_limit: None,
        })
    }
}
