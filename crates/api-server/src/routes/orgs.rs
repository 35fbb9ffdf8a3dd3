//! Organization and organization-member routes.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use cb_core::audit::{AuditAction, AuditEvent};
use cb_core::authz::Action;
use cb_core::identity::User;
use cb_core::membership::{OrgRole, OrganizationMember};
use cb_core::tenant::{CreateOrganizationRequest, Organization, UpdateOrganizationRequest};

use crate::state::AppState;

use super::{map_core_error, request_context, require_user, RouteError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationWithRole {
    organization: Organization,
    role: OrgRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberWithUser {
    member: OrganizationMember,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMemberRoleRequest {
    role: OrgRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferOwnershipRequest {
    to_user_id: Uuid,
}

async fn create_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationWithRole>), RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);

    let organization = state
        .tenants()
        .create_organization(user.id, req)
        .await
        .map_err(map_core_error)?;
    state
        .ledger()
        .add_organization_member(organization.id, user.id, OrgRole::Owner)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::OrganizationCreate,
                "organization",
                organization.id.to_string(),
            )
            .in_organization(organization.id)
            .by_user(user.id)
            .with_details(json!({ "name": organization.name, "slug": organization.slug }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok((
        StatusCode::CREATED,
        Json(OrganizationWithRole {
            organization,
            role: OrgRole::Owner,
        }),
    ))
}

async fn list_orgs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<OrganizationWithRole>>, RouteError> {
    let user = require_user(&state, &headers).await?;

    let memberships = state.ledger().organizations_for_user(user.id).await;
    let ids: Vec<_> = memberships
        .iter()
        .map(|member| member.organization_id)
        .collect();
    let organizations = state.tenants().list_organizations(&ids).await;

    let entries = organizations
        .into_iter()
        .filter_map(|organization| {
            memberships
                .iter()
                .find(|member| member.organization_id == organization.id)
                .map(|member| OrganizationWithRole {
                    organization,
                    role: member.role,
                })
        })
        .collect();
    Ok(Json(entries))
}

async fn get_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
) -> Result<Json<OrganizationWithRole>, RouteError> {
    let user = require_user(&state, &headers).await?;
    state
        .authority()
        .require(user.id, &Action::ViewOrganizationMembers { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    let organization = state
        .tenants()
        .get_organization(org_id)
        .await
        .ok_or_else(|| map_core_error(cb_core::Error::NotFound(format!(
            "Organization {} not found",
            org_id
        ))))?;
    let role = state
        .ledger()
        .organization_role(org_id, user.id)
        .await
        .ok_or_else(|| {
            map_core_error(cb_core::Error::NotAMember(
                "Actor has no membership for the target resource".to_string(),
            ))
        })?;

    Ok(Json(OrganizationWithRole { organization, role }))
}

async fn update_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
    Json(req): Json<UpdateOrganizationRequest>,
) -> Result<Json<Organization>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(user.id, &Action::UpdateOrganizationProfile { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    let organization = state
        .tenants()
        .update_organization(org_id, req)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::OrganizationUpdate,
                "organization",
                organization.id.to_string(),
            )
            .in_organization(organization.id)
            .by_user(user.id)
            .with_details(json!({ "name": organization.name }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(organization))
}

async fn delete_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Organization>, RouteError> {
    let user = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(user.id, &Action::DeleteOrganization { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    let organization = state
        .tenants()
        .soft_delete_organization(org_id)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::OrganizationDelete,
                "organization",
                organization.id.to_string(),
            )
            .in_organization(organization.id)
            .by_user(user.id)
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(organization))
}

async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<MemberWithUser>>, RouteError> {
    let user = require_user(&state, &headers).await?;
    state
        .authority()
        .require(user.id, &Action::ViewOrganizationMembers { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    let members = state.ledger().list_organization_members(org_id).await;
    let mut entries = Vec::with_capacity(members.len());
    for member in members {
        let user = state.identity().get(member.user_id).await;
        entries.push(MemberWithUser { member, user });
    }
    Ok(Json(entries))
}

async fn update_member_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<OrganizationMember>, RouteError> {
    let actor = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(
            actor.id,
            &Action::UpdateOrganizationMemberRole {
                organization_id: org_id,
                target_user_id: user_id,
            },
        )
        .await
        .map_err(map_core_error)?;

    let previous = state.ledger().organization_role(org_id, user_id).await;
    let member = state
        .ledger()
        .update_organization_member_role(org_id, user_id, req.role)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::OrganizationMemberRoleUpdate,
                "organization_member",
                member.id.to_string(),
            )
            .in_organization(org_id)
            .by_user(actor.id)
            .with_details(json!({
                "targetUserId": user_id,
                "previousRole": previous.map(OrgRole::as_str),
                "role": member.role.as_str(),
            }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(member))
}

async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OrganizationMember>, RouteError> {
    let actor = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(
            actor.id,
            &Action::RemoveOrganizationMember {
                organization_id: org_id,
                target_user_id: user_id,
            },
        )
        .await
        .map_err(map_core_error)?;

    let member = state
        .ledger()
        .remove_organization_member(org_id, user_id)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::OrganizationMemberRemove,
                "organization_member",
                member.id.to_string(),
            )
            .in_organization(org_id)
            .by_user(actor.id)
            .with_details(json!({ "targetUserId": user_id }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(member))
}

async fn transfer_ownership(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<Uuid>,
    Json(req): Json<TransferOwnershipRequest>,
) -> Result<Json<Vec<OrganizationMember>>, RouteError> {
    let actor = require_user(&state, &headers).await?;
    let context = request_context(&headers);
    state
        .authority()
        .require(actor.id, &Action::TransferOwnership { organization_id: org_id })
        .await
        .map_err(map_core_error)?;

    let (promoted, demoted) = state
        .ledger()
        .transfer_ownership(org_id, actor.id, req.to_user_id)
        .await
        .map_err(map_core_error)?;
    state
        .audit()
        .record(
            AuditEvent::new(
                AuditAction::OrganizationOwnershipTransfer,
                "organization",
                org_id.to_string(),
            )
            .in_organization(org_id)
            .by_user(actor.id)
            .with_details(json!({
                "fromUserId": demoted.user_id,
                "toUserId": promoted.user_id,
            }))
            .with_context(&context),
        )
        .await
        .map_err(map_core_error)?;

    Ok(Json(vec![promoted, demoted]))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/orgs", get(list_orgs).post(create_org))
        .route(
            "/api/v1/orgs/{org_id}",
            get(get_org).patch(update_org).delete(delete_org),
        )
        .route("/api/v1/orgs/{org_id}/members", get(list_members))
        .route(
            "/api/v1/orgs/{org_id}/members/{user_id}",
            axum::routing::patch(update_member_role).delete(remove_member),
        )
        .route(
            "/api/v1/orgs/{org_id}/transfer-ownership",
            post(transfer_ownership),
        )
}
