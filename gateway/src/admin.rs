//! Admin surface. Writes to the [`CampaignStore`](crate::router::CampaignStore) and then
//! optimistically applies the same mutation to the in-memory snapshot.
//!
//! Every payload must carry the same tenant id as the authenticated caller: a mismatch is
//! rejected with 403 before the store is ever touched.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::extract::AuthenticatedTenant;
use crate::http::HttpError;
use crate::router::{Campaign, CampaignStatus, Operator, Rule};
use crate::GatewayState;

pub fn make_router<S>(state: GatewayState) -> Router<S> {
    Router::new()
        .route("/campaigns", post(create_campaign))
        .route("/campaigns/{campaign_id}", put(update_campaign).delete(delete_campaign))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RuleDto {
    pub field: String,
    pub operator: Operator,
    pub values: Vec<String>,
    pub priority: u32,
}

impl From<RuleDto> for Rule {
    fn from(dto: RuleDto) -> Self {
        Rule {
            field: dto.field,
            operator: dto.operator,
            values: dto.values,
            priority: dto.priority,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CampaignDto {
    pub tenant_id: String,
    pub campaign_id: String,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub rules: Vec<RuleDto>,
    pub default_destination: String,
    #[serde(default)]
    pub append_params: bool,
}

/// Rejects any payload whose tenant id does not match the authenticated caller's, before the
/// store or snapshot are touched.
fn enforce_tenant_match(authenticated_tenant_id: &str, payload_tenant_id: &str) -> Result<(), HttpError> {
    if authenticated_tenant_id != payload_tenant_id {
        error!(
            authenticated_tenant_id,
            payload_tenant_id, "rejected cross-tenant admin mutation attempt"
        );
        return Err(HttpError::forbidden().msg("payload tenant id does not match the authenticated tenant"));
    }
    Ok(())
}

async fn create_campaign(
    State(state): State<GatewayState>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(payload): Json<CampaignDto>,
) -> Result<StatusCode, HttpError> {
    enforce_tenant_match(&tenant.tenant_id, &payload.tenant_id)?;

    let now = OffsetDateTime::now_utc();
    let campaign = Campaign {
        tenant_id: payload.tenant_id,
        campaign_id: payload.campaign_id,
        name: payload.name,
        status: payload.status,
        rules: payload.rules.into_iter().map(Rule::from).collect(),
        default_destination: payload.default_destination,
        append_params: payload.append_params,
        created_at: now,
        updated_at: now,
    };

    state
        .campaign_store
        .create_campaign(campaign.clone())
        .await
        .map_err(HttpError::internal().err())?;

    state.router.upsert_campaign_optimistic(campaign);

    Ok(StatusCode::CREATED)
}

async fn update_campaign(
    State(state): State<GatewayState>,
    Path(campaign_id): Path<String>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(payload): Json<CampaignDto>,
) -> Result<StatusCode, HttpError> {
    enforce_tenant_match(&tenant.tenant_id, &payload.tenant_id)?;

    if payload.campaign_id != campaign_id {
        return Err(HttpError::bad_request().msg("path campaign id does not match payload campaign id"));
    }

    let now = OffsetDateTime::now_utc();
    let campaign = Campaign {
        tenant_id: payload.tenant_id,
        campaign_id: payload.campaign_id,
        name: payload.name,
        status: payload.status,
        rules: payload.rules.into_iter().map(Rule::from).collect(),
        default_destination: payload.default_destination,
        append_params: payload.append_params,
        created_at: now,
        updated_at: now,
    };

    state
        .campaign_store
        .update_campaign(campaign.clone())
        .await
        .map_err(HttpError::internal().err())?;

    state.router.upsert_campaign_optimistic(campaign);

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct DeleteCampaignDto {
    pub tenant_id: String,
}

async fn delete_campaign(
    State(state): State<GatewayState>,
    Path(campaign_id): Path<String>,
    AuthenticatedTenant(tenant): AuthenticatedTenant,
    Json(payload): Json<DeleteCampaignDto>,
) -> Result<StatusCode, HttpError> {
    enforce_tenant_match(&tenant.tenant_id, &payload.tenant_id)?;

    state
        .campaign_store
        .delete_campaign(&tenant.tenant_id, &campaign_id)
        .await
        .map_err(HttpError::internal().err())?;

    state.router.remove_campaign_optimistic(&tenant.tenant_id, &campaign_id);

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_tenant() {
        assert!(enforce_tenant_match("org_a", "org_b").is_err());
    }

    #[test]
    fn accepts_matching_tenant() {
        assert!(enforce_tenant_match("org_a", "org_a").is_ok());
    }
}
