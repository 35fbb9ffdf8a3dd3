//! Audit trail type definitions

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// Every privileged mutation the core performs, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    OrganizationCreate,
    OrganizationUpdate,
    OrganizationDelete,
    OrganizationMemberAdd,
    OrganizationMemberRemove,
    OrganizationMemberRoleUpdate,
    OrganizationOwnershipTransfer,
    OrganizationInviteCreate,
    OrganizationInviteDecline,
    OrganizationInviteRevoke,
    OrganizationInviteResend,
    WorkspaceCreate,
    WorkspaceUpdate,
    WorkspaceDelete,
    WorkspaceMemberAdd,
    WorkspaceMemberRemove,
    WorkspaceMemberRoleUpdate,
    WorkspaceInviteCreate,
    WorkspaceInviteDecline,
    WorkspaceInviteRevoke,
    WorkspaceInviteResend,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrganizationCreate => "ORGANIZATION_CREATE",
            Self::OrganizationUpdate => "ORGANIZATION_UPDATE",
            Self::OrganizationDelete => "ORGANIZATION_DELETE",
            Self::OrganizationMemberAdd => "ORGANIZATION_MEMBER_ADD",
            Self::OrganizationMemberRemove => "ORGANIZATION_MEMBER_REMOVE",
            Self::OrganizationMemberRoleUpdate => "ORGANIZATION_MEMBER_ROLE_UPDATE",
            Self::OrganizationOwnershipTransfer => "ORGANIZATION_OWNERSHIP_TRANSFER",
            Self::OrganizationInviteCreate => "ORGANIZATION_INVITE_CREATE",
            Self::OrganizationInviteDecline => "ORGANIZATION_INVITE_DECLINE",
            Self::OrganizationInviteRevoke => "ORGANIZATION_INVITE_REVOKE",
            Self::OrganizationInviteResend => "ORGANIZATION_INVITE_RESEND",
            Self::WorkspaceCreate => "WORKSPACE_CREATE",
            Self::WorkspaceUpdate => "WORKSPACE_UPDATE",
            Self::WorkspaceDelete => "WORKSPACE_DELETE",
            Self::WorkspaceMemberAdd => "WORKSPACE_MEMBER_ADD",
            Self::WorkspaceMemberRemove => "WORKSPACE_MEMBER_REMOVE",
            Self::WorkspaceMemberRoleUpdate => "WORKSPACE_MEMBER_ROLE_UPDATE",
            Self::WorkspaceInviteCreate => "WORKSPACE_INVITE_CREATE",
            Self::WorkspaceInviteDecline => "WORKSPACE_INVITE_DECLINE",
            Self::WorkspaceInviteRevoke => "WORKSPACE_INVITE_REVOKE",
            Self::WorkspaceInviteResend => "WORKSPACE_INVITE_RESEND",
        }
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(
            value.trim().to_uppercase().replace('-', "_"),
        ))
        .map_err(|_| Error::InvalidInput(format!("Unsupported audit action '{}'", value)))
    }
}

/// Transport metadata captured from the request that caused a mutation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One immutable audit line. `user_id` of `None` means system-initiated.
///
/// `details` must never carry raw invite tokens; a token prefix is the
/// most that may appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            organization_id: None,
            workspace_id: None,
            user_id: None,
            details: Value::Null,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn in_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn in_workspace(mut self, workspace_id: Uuid) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn by_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_context(mut self, context: &RequestContext) -> Self {
        self.ip_address = context.ip_address.clone();
        self.user_agent = context.user_agent.clone();
        self
    }
}

/// What to do when the audit write itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditPolicy {
    /// The mutation's caller sees the storage error.
    #[default]
    FailClosed,
    /// The failure is logged and swallowed.
    BestEffort,
}

impl FromStr for AuditPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "fail_closed" | "fail-closed" => Ok(Self::FailClosed),
            "best_effort" | "best-effort" => Ok(Self::BestEffort),
            _ => Err(Error::InvalidInput(format!(
                "Unsupported audit policy '{}'",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditListQuery {
    pub organization_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}
