//! Role authority
//!
//! Pure allow/deny decisions over the membership ledger. No side effects;
//! safe to call repeatedly and concurrently.
//!
//! Organization owners and admins implicitly hold admin authority over
//! every workspace beneath them, with or without an explicit workspace
//! membership row.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Error;
use crate::membership::{MembershipLedger, OrgRole, WorkspaceRole};
use crate::tenant::TenantStore;
use crate::Result;

/// An action an actor wants to perform, with its target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UpdateOrganizationProfile { organization_id: Uuid },
    DeleteOrganization { organization_id: Uuid },
    InviteOrganizationMember { organization_id: Uuid },
    RevokeOrganizationInvite { organization_id: Uuid },
    RemoveOrganizationMember { organization_id: Uuid, target_user_id: Uuid },
    UpdateOrganizationMemberRole { organization_id: Uuid, target_user_id: Uuid },
    TransferOwnership { organization_id: Uuid },
    ViewOrganizationMembers { organization_id: Uuid },
    ViewOrganizationAuditLog { organization_id: Uuid },
    CreateWorkspace { organization_id: Uuid },
    UpdateWorkspaceProfile { workspace_id: Uuid },
    DeleteWorkspace { workspace_id: Uuid },
    InviteWorkspaceMember { workspace_id: Uuid },
    RevokeWorkspaceInvite { workspace_id: Uuid },
    RemoveWorkspaceMember { workspace_id: Uuid },
    UpdateWorkspaceMemberRole { workspace_id: Uuid },
    ViewWorkspaceMembers { workspace_id: Uuid },
    ViewWorkspaceAuditLog { workspace_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotAMember,
    InsufficientRole,
    CannotModifyOwner,
}

/// How the actor's authority was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Organization(OrgRole),
    Workspace(WorkspaceRole),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(Grant),
    Deny(DenyReason),
}

#[derive(Clone)]
pub struct RoleAuthority {
    ledger: Arc<MembershipLedger>,
    tenants: Arc<TenantStore>,
}

impl RoleAuthority {
    pub fn new(ledger: Arc<MembershipLedger>, tenants: Arc<TenantStore>) -> Self {
        Self { ledger, tenants }
    }

    /// Decide whether `actor` may perform `action`. Read-only.
    ///
    /// Errors only surface for unresolvable targets (a workspace whose id
    /// is unknown); membership gaps are a `Deny`, not an error.
    pub async fn authorize(&self, actor: Uuid, action: &Action) -> Result<Decision> {
        match *action {
            Action::UpdateOrganizationProfile { organization_id }
            | Action::InviteOrganizationMember { organization_id }
            | Action::RevokeOrganizationInvite { organization_id }
            | Action::ViewOrganizationAuditLog { organization_id }
            | Action::CreateWorkspace { organization_id } => {
                Ok(self.organization_decision(organization_id, actor, OrgRole::Admin).await)
            }
            Action::DeleteOrganization { organization_id }
            | Action::TransferOwnership { organization_id } => {
                Ok(self.organization_decision(organization_id, actor, OrgRole::Owner).await)
            }
            Action::ViewOrganizationMembers { organization_id } => {
                Ok(self.organization_decision(organization_id, actor, OrgRole::Member).await)
            }
            Action::RemoveOrganizationMember {
                organization_id,
                target_user_id,
            }
            | Action::UpdateOrganizationMemberRole {
                organization_id,
                target_user_id,
            } => {
                let decision = self
                    .organization_decision(organization_id, actor, OrgRole::Admin)
                    .await;
                if let Decision::Allow(_) = decision {
                    let target_role = self.ledger.organization_role(organization_id, target_user_id).await;
                    if target_role == Some(OrgRole::Owner) {
                        return Ok(Decision::Deny(DenyReason::CannotModifyOwner));
                    }
                }
                Ok(decision)
            }
            Action::UpdateWorkspaceProfile { workspace_id }
            | Action::DeleteWorkspace { workspace_id }
            | Action::InviteWorkspaceMember { workspace_id }
            | Action::RevokeWorkspaceInvite { workspace_id }
            | Action::RemoveWorkspaceMember { workspace_id }
            | Action::UpdateWorkspaceMemberRole { workspace_id }
            | Action::ViewWorkspaceAuditLog { workspace_id } => {
                self.workspace_decision(workspace_id, actor, WorkspaceRole::Admin)
                    .await
            }
            Action::ViewWorkspaceMembers { workspace_id } => {
                self.workspace_decision(workspace_id, actor, WorkspaceRole::Member)
                    .await
            }
        }
    }

    /// Like [`authorize`], but maps a `Deny` to the matching error.
    ///
    /// [`authorize`]: RoleAuthority::authorize
    pub async fn require(&self, actor: Uuid, action: &Action) -> Result<Grant> {
        match self.authorize(actor, action).await? {
            Decision::Allow(grant) => Ok(grant),
            Decision::Deny(DenyReason::NotAMember) => Err(Error::NotAMember(
                "Actor has no membership for the target resource".to_string(),
            )),
            Decision::Deny(DenyReason::InsufficientRole) => Err(Error::InsufficientRole(
                "Actor's role does not permit this action".to_string(),
            )),
            Decision::Deny(DenyReason::CannotModifyOwner) => Err(Error::CannotModifyOwner),
        }
    }

    async fn organization_decision(
        &self,
        organization_id: Uuid,
        actor: Uuid,
        minimum: OrgRole,
    ) -> Decision {
        match self.ledger.organization_role(organization_id, actor).await {
            None => Decision::Deny(DenyReason::NotAMember),
            Some(role) if role.at_least(minimum) => Decision::Allow(Grant::Organization(role)),
            Some(_) => Decision::Deny(DenyReason::InsufficientRole),
        }
    }

    /// Workspace check with the organization fallback: an explicit
    /// workspace role wins, otherwise org owners/admins pass any check and
    /// plain org members pass member-level checks.
    async fn workspace_decision(
        &self,
        workspace_id: Uuid,
        actor: Uuid,
        minimum: WorkspaceRole,
    ) -> Result<Decision> {
        let workspace = self
            .tenants
            .get_workspace(workspace_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Workspace {} not found", workspace_id)))?;

        let workspace_role = self.ledger.workspace_role(workspace_id, actor).await;
        if let Some(role) = workspace_role {
            if role.at_least(minimum) {
                return Ok(Decision::Allow(Grant::Workspace(role)));
            }
        }

        match self
            .ledger
            .organization_role(workspace.organization_id, actor)
            .await
        {
            Some(role) if role.at_least(OrgRole::Admin) => {
                Ok(Decision::Allow(Grant::Organization(role)))
            }
            Some(role) if minimum == WorkspaceRole::Member => {
                Ok(Decision::Allow(Grant::Organization(role)))
            }
            Some(_) => Ok(Decision::Deny(DenyReason::InsufficientRole)),
            None if workspace_role.is_some() => {
                Ok(Decision::Deny(DenyReason::InsufficientRole))
            }
            None => Ok(Decision::Deny(DenyReason::NotAMember)),
        }
    }
}
