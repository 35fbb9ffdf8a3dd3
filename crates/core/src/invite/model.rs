//! Invite model definitions

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::membership::{OrgRole, OrganizationMember, WorkspaceMember, WorkspaceRole};

/// Invite state machine: `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
    Expired,
}

impl InviteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What the invite grants on acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InviteScope {
    Organization {
        role: OrgRole,
    },
    #[serde(rename_all = "camelCase")]
    Workspace {
        workspace_id: Uuid,
        role: WorkspaceRole,
    },
}

impl InviteScope {
    pub fn workspace_id(&self) -> Option<Uuid> {
        match self {
            Self::Organization { .. } => None,
            Self::Workspace { workspace_id, .. } => Some(*workspace_id),
        }
    }

    pub fn role_str(&self) -> &'static str {
        match self {
            Self::Organization { role } => role.as_str(),
            Self::Workspace { role, .. } => role.as_str(),
        }
    }
}

/// Stored invite. Only the token digest is persisted; the raw bearer token
/// is handed out exactly once at creation or resend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub scope: InviteScope,
    pub email: String,
    pub invited_by: Uuid,
    pub token_hash: String,
    pub token_prefix: String,
    pub status: InviteStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invite {
    /// Status for decision purposes: a nominally pending invite past its
    /// expiry behaves as expired regardless of what storage says.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InviteStatus {
        if self.status == InviteStatus::Pending && now >= self.expires_at {
            InviteStatus::Expired
        } else {
            self.status
        }
    }
}

/// Public view of an invite; never carries the token digest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteSummary {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub email: String,
    pub role: String,
    pub status: InviteStatus,
    pub token_prefix: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl InviteSummary {
    pub fn from_invite(invite: &Invite, now: DateTime<Utc>) -> Self {
        Self {
            id: invite.id,
            organization_id: invite.organization_id,
            workspace_id: invite.scope.workspace_id(),
            email: invite.email.clone(),
            role: invite.scope.role_str().to_string(),
            status: invite.effective_status(now),
            token_prefix: invite.token_prefix.clone(),
            invited_by: invite.invited_by,
            expires_at: invite.expires_at,
            created_at: invite.created_at,
        }
    }
}

/// Creation/resend result: the summary plus the one-time raw token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedInvite {
    pub invite: InviteSummary,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOrganization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewWorkspace {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewInviter {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// What a token holder may see before deciding: enough to recognize the
/// inviter and destination, nothing that enumerates anything else.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePreview {
    pub email: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
    pub organization: PreviewOrganization,
    pub workspace: Option<PreviewWorkspace>,
    pub inviter: PreviewInviter,
}

/// Result of accepting a workspace invite. `organization_member` is set
/// when the acceptance auto-provisioned organization membership.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceAcceptance {
    pub workspace_member: WorkspaceMember,
    pub organization_member: Option<OrganizationMember>,
}

pub(crate) fn generate_invite_token() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("civ_{}", URL_SAFE_NO_PAD.encode(bytes))
}

pub(crate) fn hash_invite_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

pub(crate) fn token_prefix(token: &str) -> String {
    token.chars().take(12).collect()
}
