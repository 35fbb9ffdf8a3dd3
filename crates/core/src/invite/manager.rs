//! Invite lifecycle manager
//!
//! Drives the `PENDING -> {ACCEPTED, DECLINED, REVOKED, EXPIRED}` state
//! machine. The invite map's write lock is the serialization point for
//! status transitions; the ledger's uniqueness constraint is the backstop,
//! so a raced double-accept resolves to one membership row and a no-op
//! success for the loser.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditRecorder, RequestContext};
use crate::authz::{Action, RoleAuthority};
use crate::error::Error;
use crate::identity::{normalize_email, IdentityStore};
use crate::membership::{MembershipLedger, OrgRole, OrganizationMember, WorkspaceRole};
use crate::tenant::TenantStore;
use crate::Result;

use super::model::{
    generate_invite_token, hash_invite_token, token_prefix, CreatedInvite, Invite, InvitePreview,
    InviteScope, InviteStatus, InviteSummary, PreviewInviter, PreviewOrganization,
    PreviewWorkspace, WorkspaceAcceptance,
};

#[derive(Clone)]
pub struct InviteLifecycleManager {
    invites: Arc<RwLock<HashMap<Uuid, Invite>>>,
    file_path: PathBuf,
    ledger: Arc<MembershipLedger>,
    tenants: Arc<TenantStore>,
    identity: Arc<IdentityStore>,
    authority: RoleAuthority,
    audit: Arc<AuditRecorder>,
    invite_ttl: Duration,
}

impl InviteLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        file_path: PathBuf,
        ledger: Arc<MembershipLedger>,
        tenants: Arc<TenantStore>,
        identity: Arc<IdentityStore>,
        authority: RoleAuthority,
        audit: Arc<AuditRecorder>,
        invite_ttl: Duration,
    ) -> Result<Self> {
        let invites = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to read invites file: {}", e)))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Storage(format!("Failed to parse invites file: {}", e)))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            invites: Arc::new(RwLock::new(invites)),
            file_path,
            ledger,
            tenants,
            identity,
            authority,
            audit,
            invite_ttl,
        })
    }

    pub async fn create_organization_invite(
        &self,
        actor: Uuid,
        organization_id: Uuid,
        email: &str,
        role: OrgRole,
        context: &RequestContext,
    ) -> Result<CreatedInvite> {
        if role == OrgRole::Owner {
            return Err(Error::InvalidInput(
                "Cannot invite a member as owner".to_string(),
            ));
        }
        self.authority
            .require(actor, &Action::InviteOrganizationMember { organization_id })
            .await?;
        let organization = self
            .tenants
            .get_organization(organization_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Organization {} not found", organization_id)))?;

        let email = normalize_email(email)?;
        if let Some(user) = self.identity.find_by_email(&email).await {
            if self
                .ledger
                .organization_role(organization.id, user.id)
                .await
                .is_some()
            {
                return Err(Error::DuplicateMembership(format!(
                    "'{}' is already a member of the organization",
                    email
                )));
            }
        }

        let now = Utc::now();
        let token = generate_invite_token();
        let invite = Invite {
            id: Uuid::new_v4(),
            organization_id: organization.id,
            scope: InviteScope::Organization { role },
            email: email.clone(),
            invited_by: actor,
            token_hash: hash_invite_token(&token),
            token_prefix: token_prefix(&token),
            status: InviteStatus::Pending,
            expires_at: now + self.invite_ttl,
            created_at: now,
            updated_at: now,
        };

        let mut invites = self.invites.write().await;
        let mut next = invites.clone();
        let superseded = supersede_pending(&mut next, |candidate| {
            candidate.organization_id == organization.id
                && candidate.scope.workspace_id().is_none()
                && candidate.email == email
        });
        next.insert(invite.id, invite.clone());

        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        let mut details = json!({
            "email": email,
            "role": role.as_str(),
            "tokenPrefix": invite.token_prefix,
        });
        if let Some(superseded_id) = superseded {
            details["supersededInviteId"] = json!(superseded_id);
        }
        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::OrganizationInviteCreate,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(organization.id)
                .by_user(actor)
                .with_details(details)
                .with_context(context),
            )
            .await?;

        Ok(CreatedInvite {
            invite: InviteSummary::from_invite(&invite, now),
            token,
        })
    }

    pub async fn create_workspace_invite(
        &self,
        actor: Uuid,
        workspace_id: Uuid,
        email: &str,
        role: WorkspaceRole,
        context: &RequestContext,
    ) -> Result<CreatedInvite> {
        self.authority
            .require(actor, &Action::InviteWorkspaceMember { workspace_id })
            .await?;
        let workspace = self
            .tenants
            .get_workspace(workspace_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Workspace {} not found", workspace_id)))?;
        let organization = self
            .tenants
            .get_organization(workspace.organization_id)
            .await
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Organization {} not found",
                    workspace.organization_id
                ))
            })?;

        let email = normalize_email(email)?;
        if let Some(user) = self.identity.find_by_email(&email).await {
            if self
                .ledger
                .workspace_role(workspace.id, user.id)
                .await
                .is_some()
            {
                return Err(Error::DuplicateMembership(format!(
                    "'{}' is already a member of the workspace",
                    email
                )));
            }
        }

        let now = Utc::now();
        let token = generate_invite_token();
        let invite = Invite {
            id: Uuid::new_v4(),
            organization_id: organization.id,
            scope: InviteScope::Workspace {
                workspace_id: workspace.id,
                role,
            },
            email: email.clone(),
            invited_by: actor,
            token_hash: hash_invite_token(&token),
            token_prefix: token_prefix(&token),
            status: InviteStatus::Pending,
            expires_at: now + self.invite_ttl,
            created_at: now,
            updated_at: now,
        };

        let mut invites = self.invites.write().await;
        let mut next = invites.clone();
        let superseded = supersede_pending(&mut next, |candidate| {
            candidate.scope.workspace_id() == Some(workspace.id) && candidate.email == email
        });
        next.insert(invite.id, invite.clone());

        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        let mut details = json!({
            "email": email,
            "role": role.as_str(),
            "tokenPrefix": invite.token_prefix,
        });
        if let Some(superseded_id) = superseded {
            details["supersededInviteId"] = json!(superseded_id);
        }
        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::WorkspaceInviteCreate,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(organization.id)
                .in_workspace(workspace.id)
                .by_user(actor)
                .with_details(details)
                .with_context(context),
            )
            .await?;

        Ok(CreatedInvite {
            invite: InviteSummary::from_invite(&invite, now),
            token,
        })
    }

    /// Token-gated read. Every failure collapses to `InvalidToken` so an
    /// unauthenticated caller cannot probe which invites or emails exist.
    pub async fn preview_organization_invite(
        &self,
        organization_id: Uuid,
        token: &str,
    ) -> Result<InvitePreview> {
        let token_hash = hash_invite_token(token);
        let invites = self.invites.read().await;
        let invite = find_organization_invite(&invites, organization_id, &token_hash)
            .cloned()
            .ok_or(Error::InvalidToken)?;
        drop(invites);

        if invite.effective_status(Utc::now()) != InviteStatus::Pending {
            return Err(Error::InvalidToken);
        }
        let organization = self
            .tenants
            .get_organization(invite.organization_id)
            .await
            .ok_or(Error::InvalidToken)?;
        let inviter = self
            .identity
            .get(invite.invited_by)
            .await
            .ok_or(Error::InvalidToken)?;

        Ok(InvitePreview {
            email: invite.email.clone(),
            role: invite.scope.role_str().to_string(),
            expires_at: invite.expires_at,
            organization: PreviewOrganization {
                id: organization.id,
                name: organization.name,
                slug: organization.slug,
                logo_url: organization.logo_url,
            },
            workspace: None,
            inviter: PreviewInviter {
                id: inviter.id,
                name: inviter.name,
                avatar_url: inviter.avatar_url,
            },
        })
    }

    pub async fn preview_workspace_invite(
        &self,
        workspace_id: Uuid,
        token: &str,
    ) -> Result<InvitePreview> {
        let token_hash = hash_invite_token(token);
        let invites = self.invites.read().await;
        let invite = find_workspace_invite(&invites, workspace_id, &token_hash)
            .cloned()
            .ok_or(Error::InvalidToken)?;
        drop(invites);

        if invite.effective_status(Utc::now()) != InviteStatus::Pending {
            return Err(Error::InvalidToken);
        }
        let workspace = self
            .tenants
            .get_workspace(workspace_id)
            .await
            .ok_or(Error::InvalidToken)?;
        let organization = self
            .tenants
            .get_organization(workspace.organization_id)
            .await
            .ok_or(Error::InvalidToken)?;
        let inviter = self
            .identity
            .get(invite.invited_by)
            .await
            .ok_or(Error::InvalidToken)?;

        Ok(InvitePreview {
            email: invite.email.clone(),
            role: invite.scope.role_str().to_string(),
            expires_at: invite.expires_at,
            organization: PreviewOrganization {
                id: organization.id,
                name: organization.name,
                slug: organization.slug,
                logo_url: organization.logo_url,
            },
            workspace: Some(PreviewWorkspace {
                id: workspace.id,
                name: workspace.name,
                slug: workspace.slug,
            }),
            inviter: PreviewInviter {
                id: inviter.id,
                name: inviter.name,
                avatar_url: inviter.avatar_url,
            },
        })
    }

    /// Accept an organization invite. Idempotent once accepted: a repeat
    /// call by the same user returns the existing membership row.
    pub async fn accept_organization_invite(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        token: &str,
        context: &RequestContext,
    ) -> Result<OrganizationMember> {
        let user = self
            .identity
            .get(user_id)
            .await
            .ok_or_else(|| Error::Unauthorized("Unknown user".to_string()))?;
        let token_hash = hash_invite_token(token);
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = find_organization_invite(&invites, organization_id, &token_hash)
            .cloned()
            .ok_or(Error::InvalidToken)?;

        match invite.effective_status(now) {
            InviteStatus::Accepted => {
                if invite.email == user.email {
                    if let Some(existing) = self
                        .ledger
                        .get_organization_member(invite.organization_id, user.id)
                        .await
                    {
                        return Ok(existing);
                    }
                }
                return Err(Error::InviteAlreadyResolved);
            }
            InviteStatus::Declined => return Err(Error::InviteAlreadyResolved),
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }
        if invite.email != user.email {
            return Err(Error::EmailMismatch);
        }
        let organization = self
            .tenants
            .get_organization(invite.organization_id)
            .await
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Organization {} no longer exists",
                    invite.organization_id
                ))
            })?;
        let role = match invite.scope {
            InviteScope::Organization { role } => role,
            InviteScope::Workspace { .. } => return Err(Error::InvalidToken),
        };

        let (member, created) = match self
            .ledger
            .add_organization_member(organization.id, user.id, role)
            .await
        {
            Ok(member) => (member, true),
            Err(Error::DuplicateMembership(_)) => {
                let existing = self
                    .ledger
                    .get_organization_member(organization.id, user.id)
                    .await
                    .ok_or_else(|| {
                        Error::Storage("Membership row vanished during accept".to_string())
                    })?;
                (existing, false)
            }
            Err(err) => return Err(err),
        };

        let mut next = invites.clone();
        if let Some(entry) = next.get_mut(&invite.id) {
            entry.status = InviteStatus::Accepted;
            entry.updated_at = now;
        }
        if let Err(err) = self.persist_snapshot(&next).await {
            if created {
                let _ = self
                    .ledger
                    .remove_organization_member(organization.id, user.id)
                    .await;
            }
            return Err(err);
        }
        *invites = next;
        drop(invites);

        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::OrganizationMemberAdd,
                    "organization_member",
                    member.id.to_string(),
                )
                .in_organization(organization.id)
                .by_user(user.id)
                .with_details(json!({
                    "inviteId": invite.id,
                    "role": role.as_str(),
                    "via": "invite",
                }))
                .with_context(context),
            )
            .await?;

        Ok(member)
    }

    /// Accept a workspace invite. A user who is not yet an organization
    /// member is auto-provisioned an organization `member` row first, so
    /// the workspace row never exists without its organization row.
    pub async fn accept_workspace_invite(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        token: &str,
        context: &RequestContext,
    ) -> Result<WorkspaceAcceptance> {
        let user = self
            .identity
            .get(user_id)
            .await
            .ok_or_else(|| Error::Unauthorized("Unknown user".to_string()))?;
        let token_hash = hash_invite_token(token);
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = find_workspace_invite(&invites, workspace_id, &token_hash)
            .cloned()
            .ok_or(Error::InvalidToken)?;

        match invite.effective_status(now) {
            InviteStatus::Accepted => {
                if invite.email == user.email {
                    if let Some(existing) =
                        self.ledger.get_workspace_member(workspace_id, user.id).await
                    {
                        return Ok(WorkspaceAcceptance {
                            workspace_member: existing,
                            organization_member: None,
                        });
                    }
                }
                return Err(Error::InviteAlreadyResolved);
            }
            InviteStatus::Declined => return Err(Error::InviteAlreadyResolved),
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }
        if invite.email != user.email {
            return Err(Error::EmailMismatch);
        }
        let workspace = self
            .tenants
            .get_workspace(workspace_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Workspace {} no longer exists", workspace_id)))?;
        let organization = self
            .tenants
            .get_organization(workspace.organization_id)
            .await
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Organization {} no longer exists",
                    workspace.organization_id
                ))
            })?;
        let role = match invite.scope {
            InviteScope::Workspace { role, .. } => role,
            InviteScope::Organization { .. } => return Err(Error::InvalidToken),
        };

        let mut provisioned = None;
        if self
            .ledger
            .organization_role(organization.id, user.id)
            .await
            .is_none()
        {
            match self
                .ledger
                .add_organization_member(organization.id, user.id, OrgRole::Member)
                .await
            {
                Ok(member) => provisioned = Some(member),
                Err(Error::DuplicateMembership(_)) => {}
                Err(err) => return Err(err),
            }
        }

        let (member, created) = match self
            .ledger
            .add_workspace_member(workspace.id, organization.id, user.id, role)
            .await
        {
            Ok(member) => (member, true),
            Err(Error::DuplicateMembership(_)) => {
                let existing = self
                    .ledger
                    .get_workspace_member(workspace.id, user.id)
                    .await
                    .ok_or_else(|| {
                        Error::Storage("Membership row vanished during accept".to_string())
                    })?;
                (existing, false)
            }
            Err(err) => {
                if provisioned.is_some() {
                    let _ = self
                        .ledger
                        .remove_organization_member(organization.id, user.id)
                        .await;
                }
                return Err(err);
            }
        };

        let mut next = invites.clone();
        if let Some(entry) = next.get_mut(&invite.id) {
            entry.status = InviteStatus::Accepted;
            entry.updated_at = now;
        }
        if let Err(err) = self.persist_snapshot(&next).await {
            if created {
                let _ = self
                    .ledger
                    .remove_workspace_member(workspace.id, user.id)
                    .await;
            }
            if provisioned.is_some() {
                let _ = self
                    .ledger
                    .remove_organization_member(organization.id, user.id)
                    .await;
            }
            return Err(err);
        }
        *invites = next;
        drop(invites);

        if let Some(org_member) = &provisioned {
            self.audit
                .record(
                    AuditEvent::new(
                        AuditAction::OrganizationMemberAdd,
                        "organization_member",
                        org_member.id.to_string(),
                    )
                    .in_organization(organization.id)
                    .by_user(user.id)
                    .with_details(json!({
                        "inviteId": invite.id,
                        "role": OrgRole::Member.as_str(),
                        "via": "workspace_invite",
                    }))
                    .with_context(context),
                )
                .await?;
        }
        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::WorkspaceMemberAdd,
                    "workspace_member",
                    member.id.to_string(),
                )
                .in_organization(organization.id)
                .in_workspace(workspace.id)
                .by_user(user.id)
                .with_details(json!({
                    "inviteId": invite.id,
                    "role": role.as_str(),
                    "via": "invite",
                }))
                .with_context(context),
            )
            .await?;

        Ok(WorkspaceAcceptance {
            workspace_member: member,
            organization_member: provisioned,
        })
    }

    pub async fn decline_organization_invite(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        token: &str,
        context: &RequestContext,
    ) -> Result<InviteSummary> {
        let user = self
            .identity
            .get(user_id)
            .await
            .ok_or_else(|| Error::Unauthorized("Unknown user".to_string()))?;
        let token_hash = hash_invite_token(token);
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = find_organization_invite(&invites, organization_id, &token_hash)
            .cloned()
            .ok_or(Error::InvalidToken)?;

        match invite.effective_status(now) {
            InviteStatus::Accepted | InviteStatus::Declined => {
                return Err(Error::InviteAlreadyResolved)
            }
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }
        if invite.email != user.email {
            return Err(Error::EmailMismatch);
        }

        let mut next = invites.clone();
        let updated = transition(&mut next, &invite, InviteStatus::Declined, now);
        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::OrganizationInviteDecline,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(invite.organization_id)
                .by_user(user.id)
                .with_context(context),
            )
            .await?;

        Ok(InviteSummary::from_invite(&updated, now))
    }

    pub async fn decline_workspace_invite(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        token: &str,
        context: &RequestContext,
    ) -> Result<InviteSummary> {
        let user = self
            .identity
            .get(user_id)
            .await
            .ok_or_else(|| Error::Unauthorized("Unknown user".to_string()))?;
        let token_hash = hash_invite_token(token);
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = find_workspace_invite(&invites, workspace_id, &token_hash)
            .cloned()
            .ok_or(Error::InvalidToken)?;

        match invite.effective_status(now) {
            InviteStatus::Accepted | InviteStatus::Declined => {
                return Err(Error::InviteAlreadyResolved)
            }
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }
        if invite.email != user.email {
            return Err(Error::EmailMismatch);
        }

        let mut next = invites.clone();
        let updated = transition(&mut next, &invite, InviteStatus::Declined, now);
        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::WorkspaceInviteDecline,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(invite.organization_id)
                .in_workspace(workspace_id)
                .by_user(user.id)
                .with_context(context),
            )
            .await?;

        Ok(InviteSummary::from_invite(&updated, now))
    }

    pub async fn revoke_organization_invite(
        &self,
        actor: Uuid,
        organization_id: Uuid,
        invite_id: Uuid,
        context: &RequestContext,
    ) -> Result<InviteSummary> {
        self.authority
            .require(actor, &Action::RevokeOrganizationInvite { organization_id })
            .await?;
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = invites
            .get(&invite_id)
            .filter(|candidate| {
                candidate.organization_id == organization_id
                    && candidate.scope.workspace_id().is_none()
            })
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Invite {} not found", invite_id)))?;

        match invite.effective_status(now) {
            InviteStatus::Accepted | InviteStatus::Declined => {
                return Err(Error::InviteAlreadyResolved)
            }
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }

        let mut next = invites.clone();
        let updated = transition(&mut next, &invite, InviteStatus::Revoked, now);
        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::OrganizationInviteRevoke,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(organization_id)
                .by_user(actor)
                .with_details(json!({ "email": invite.email }))
                .with_context(context),
            )
            .await?;

        Ok(InviteSummary::from_invite(&updated, now))
    }

    pub async fn revoke_workspace_invite(
        &self,
        actor: Uuid,
        workspace_id: Uuid,
        invite_id: Uuid,
        context: &RequestContext,
    ) -> Result<InviteSummary> {
        self.authority
            .require(actor, &Action::RevokeWorkspaceInvite { workspace_id })
            .await?;
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = invites
            .get(&invite_id)
            .filter(|candidate| candidate.scope.workspace_id() == Some(workspace_id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Invite {} not found", invite_id)))?;

        match invite.effective_status(now) {
            InviteStatus::Accepted | InviteStatus::Declined => {
                return Err(Error::InviteAlreadyResolved)
            }
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }

        let mut next = invites.clone();
        let updated = transition(&mut next, &invite, InviteStatus::Revoked, now);
        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::WorkspaceInviteRevoke,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(invite.organization_id)
                .in_workspace(workspace_id)
                .by_user(actor)
                .with_details(json!({ "email": invite.email }))
                .with_context(context),
            )
            .await?;

        Ok(InviteSummary::from_invite(&updated, now))
    }

    /// Rotate the token and extend the expiry of a pending invite. The old
    /// link is dead from here on.
    pub async fn resend_organization_invite(
        &self,
        actor: Uuid,
        organization_id: Uuid,
        invite_id: Uuid,
        context: &RequestContext,
    ) -> Result<CreatedInvite> {
        self.authority
            .require(actor, &Action::InviteOrganizationMember { organization_id })
            .await?;
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = invites
            .get(&invite_id)
            .filter(|candidate| {
                candidate.organization_id == organization_id
                    && candidate.scope.workspace_id().is_none()
            })
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Invite {} not found", invite_id)))?;

        match invite.effective_status(now) {
            InviteStatus::Accepted | InviteStatus::Declined => {
                return Err(Error::InviteAlreadyResolved)
            }
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }

        let token = generate_invite_token();
        let mut next = invites.clone();
        let updated = rotate(&mut next, &invite, &token, now + self.invite_ttl, now);
        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::OrganizationInviteResend,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(organization_id)
                .by_user(actor)
                .with_details(json!({
                    "tokenPrefix": updated.token_prefix,
                    "expiresAt": updated.expires_at,
                }))
                .with_context(context),
            )
            .await?;

        Ok(CreatedInvite {
            invite: InviteSummary::from_invite(&updated, now),
            token,
        })
    }

    pub async fn resend_workspace_invite(
        &self,
        actor: Uuid,
        workspace_id: Uuid,
        invite_id: Uuid,
        context: &RequestContext,
    ) -> Result<CreatedInvite> {
        self.authority
            .require(actor, &Action::InviteWorkspaceMember { workspace_id })
            .await?;
        let now = Utc::now();

        let mut invites = self.invites.write().await;
        let invite = invites
            .get(&invite_id)
            .filter(|candidate| candidate.scope.workspace_id() == Some(workspace_id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Invite {} not found", invite_id)))?;

        match invite.effective_status(now) {
            InviteStatus::Accepted | InviteStatus::Declined => {
                return Err(Error::InviteAlreadyResolved)
            }
            InviteStatus::Revoked => return Err(Error::InviteRevoked),
            InviteStatus::Expired => {
                self.mark_expired(&mut invites, invite.id).await;
                return Err(Error::InviteExpired);
            }
            InviteStatus::Pending => {}
        }

        let token = generate_invite_token();
        let mut next = invites.clone();
        let updated = rotate(&mut next, &invite, &token, now + self.invite_ttl, now);
        self.persist_snapshot(&next).await?;
        *invites = next;
        drop(invites);

        self.audit
            .record(
                AuditEvent::new(
                    AuditAction::WorkspaceInviteResend,
                    "invite",
                    invite.id.to_string(),
                )
                .in_organization(invite.organization_id)
                .in_workspace(workspace_id)
                .by_user(actor)
                .with_details(json!({
                    "tokenPrefix": updated.token_prefix,
                    "expiresAt": updated.expires_at,
                }))
                .with_context(context),
            )
            .await?;

        Ok(CreatedInvite {
            invite: InviteSummary::from_invite(&updated, now),
            token,
        })
    }

    pub async fn list_organization_invites(
        &self,
        actor: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<InviteSummary>> {
        self.authority
            .require(actor, &Action::InviteOrganizationMember { organization_id })
            .await?;
        let now = Utc::now();
        let invites = self.invites.read().await;
        let mut summaries: Vec<_> = invites
            .values()
            .filter(|invite| {
                invite.organization_id == organization_id && invite.scope.workspace_id().is_none()
            })
            .map(|invite| InviteSummary::from_invite(invite, now))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    pub async fn list_workspace_invites(
        &self,
        actor: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<InviteSummary>> {
        self.authority
            .require(actor, &Action::InviteWorkspaceMember { workspace_id })
            .await?;
        let now = Utc::now();
        let invites = self.invites.read().await;
        let mut summaries: Vec<_> = invites
            .values()
            .filter(|invite| invite.scope.workspace_id() == Some(workspace_id))
            .map(|invite| InviteSummary::from_invite(invite, now))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    /// Persist the expired status noticed during a lazy-expiry check. The
    /// decision was already made from `effective_status`; a failed write
    /// here only delays the next persistence attempt.
    async fn mark_expired(&self, invites: &mut HashMap<Uuid, Invite>, invite_id: Uuid) {
        let Some(invite) = invites.get(&invite_id) else {
            return;
        };
        if invite.status != InviteStatus::Pending {
            return;
        }

        let mut next = invites.clone();
        if let Some(entry) = next.get_mut(&invite_id) {
            entry.status = InviteStatus::Expired;
            entry.updated_at = Utc::now();
        }
        match self.persist_snapshot(&next).await {
            Ok(()) => *invites = next,
            Err(err) => warn!("Failed to persist expired invite {}: {}", invite_id, err),
        }
    }

    async fn persist_snapshot(&self, invites: &HashMap<Uuid, Invite>) -> Result<()> {
        let content = serde_json::to_string_pretty(invites)
            .map_err(|e| Error::Storage(format!("Failed to serialize invites: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let parent = self.file_path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4().as_hyphenated()));

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write temp invites file: {}", e)))?;

        if let Err(err) = tokio::fs::rename(&temp_path, &self.file_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!(
                "Failed to finalize invites write: {}",
                err
            )));
        }

        Ok(())
    }
}

fn find_organization_invite<'a>(
    invites: &'a HashMap<Uuid, Invite>,
    organization_id: Uuid,
    token_hash: &str,
) -> Option<&'a Invite> {
    invites.values().find(|invite| {
        invite.organization_id == organization_id
            && invite.scope.workspace_id().is_none()
            && invite.token_hash == token_hash
    })
}

fn find_workspace_invite<'a>(
    invites: &'a HashMap<Uuid, Invite>,
    workspace_id: Uuid,
    token_hash: &str,
) -> Option<&'a Invite> {
    invites.values().find(|invite| {
        invite.scope.workspace_id() == Some(workspace_id) && invite.token_hash == token_hash
    })
}

/// Close out any live invite for the same grant so at most one token is
/// outstanding per (resource, email). Returns the superseded invite id.
fn supersede_pending(
    invites: &mut HashMap<Uuid, Invite>,
    matches: impl Fn(&Invite) -> bool,
) -> Option<Uuid> {
    let now = Utc::now();
    let candidate = invites
        .values()
        .find(|invite| invite.status == InviteStatus::Pending && matches(invite))
        .map(|invite| invite.id)?;

    let entry = invites.get_mut(&candidate)?;
    entry.status = if entry.effective_status(now) == InviteStatus::Expired {
        InviteStatus::Expired
    } else {
        InviteStatus::Revoked
    };
    entry.updated_at = now;
    Some(candidate)
}

fn transition(
    invites: &mut HashMap<Uuid, Invite>,
    invite: &Invite,
    status: InviteStatus,
    now: chrono::DateTime<Utc>,
) -> Invite {
    let mut updated = invite.clone();
    updated.status = status;
    updated.updated_at = now;
    invites.insert(updated.id, updated.clone());
    updated
}

fn rotate(
    invites: &mut HashMap<Uuid, Invite>,
    invite: &Invite,
    token: &str,
    expires_at: chrono::DateTime<Utc>,
    now: chrono::DateTime<Utc>,
) -> Invite {
    let mut updated = invite.clone();
    updated.token_hash = hash_invite_token(token);
    updated.token_prefix = token_prefix(token);
    updated.expires_at = expires_at;
    updated.updated_at = now;
    invites.insert(updated.id, updated.clone());
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditListQuery, AuditPolicy};
    use crate::identity::User;
    use crate::membership::WorkspaceRole;
    use crate::tenant::{CreateOrganizationRequest, CreateWorkspaceRequest, Organization, Workspace};
    use tempfile::TempDir;

    struct Fixture {
        manager: InviteLifecycleManager,
        identity: Arc<IdentityStore>,
        tenants: Arc<TenantStore>,
        ledger: Arc<MembershipLedger>,
        audit: Arc<AuditRecorder>,
        _dir: TempDir,
    }

    async fn build_fixture_with_ttl(ttl: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let identity = Arc::new(
            IdentityStore::new(dir.path().join("users.json"))
                .await
                .unwrap(),
        );
        let tenants = Arc::new(TenantStore::new(dir.path().join("tenants.json")).await.unwrap());
        let ledger = Arc::new(
            MembershipLedger::new(dir.path().join("memberships.json"))
                .await
                .unwrap(),
        );
        let audit = Arc::new(
            AuditRecorder::new(dir.path().join("audit"), AuditPolicy::FailClosed)
                .await
                .unwrap(),
        );
        let authority = RoleAuthority::new(Arc::clone(&ledger), Arc::clone(&tenants));
        let manager = InviteLifecycleManager::new(
            dir.path().join("invites.json"),
            Arc::clone(&ledger),
            Arc::clone(&tenants),
            Arc::clone(&identity),
            authority,
            Arc::clone(&audit),
            ttl,
        )
        .await
        .unwrap();

        Fixture {
            manager,
            identity,
            tenants,
            ledger,
            audit,
            _dir: dir,
        }
    }

    async fn build_fixture() -> Fixture {
        build_fixture_with_ttl(Duration::days(7)).await
    }

    async fn seed_user(fixture: &Fixture, name: &str, email: &str) -> User {
        fixture
            .identity
            .register(name, email, "verysecurepw", None)
            .await
            .unwrap()
    }

    async fn seed_organization(fixture: &Fixture, owner: &User, name: &str) -> Organization {
        let organization = fixture
            .tenants
            .create_organization(
                owner.id,
                CreateOrganizationRequest {
                    name: name.to_string(),
                    slug: None,
                    description: None,
                    logo_url: None,
                    website_url: None,
                },
            )
            .await
            .unwrap();
        fixture
            .ledger
            .add_organization_member(organization.id, owner.id, OrgRole::Owner)
            .await
            .unwrap();
        organization
    }

    async fn seed_workspace(fixture: &Fixture, organization: &Organization, name: &str) -> Workspace {
        fixture
            .tenants
            .create_workspace(
                organization.id,
                CreateWorkspaceRequest {
                    name: name.to_string(),
                    slug: None,
                    description: None,
                    icon_url: None,
                },
            )
            .await
            .unwrap()
    }

    async fn audit_count(fixture: &Fixture, action: AuditAction) -> usize {
        let (events, _) = fixture
            .audit
            .list_paginated(&AuditListQuery {
                action: Some(action),
                ..Default::default()
            })
            .await;
        events.len()
    }

    #[tokio::test]
    async fn create_requires_admin_standing() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let member = seed_user(&fixture, "Member", "member@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;
        fixture
            .ledger
            .add_organization_member(organization.id, member.id, OrgRole::Member)
            .await
            .unwrap();

        let denied = fixture
            .manager
            .create_organization_invite(
                member.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(denied, Err(Error::InsufficientRole(_))));

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert!(created.token.starts_with("civ_"));
        assert_eq!(created.invite.status, InviteStatus::Pending);
        assert_eq!(created.invite.email, "bob@example.com");
        assert_eq!(audit_count(&fixture, AuditAction::OrganizationInviteCreate).await, 1);
    }

    #[tokio::test]
    async fn create_rejects_owner_role_and_existing_members() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let as_owner = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Owner,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(as_owner, Err(Error::InvalidInput(_))));

        let duplicate = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "owner@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(duplicate, Err(Error::DuplicateMembership(_))));
    }

    #[tokio::test]
    async fn second_invite_supersedes_the_first() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let first = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        let second = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Admin,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        // The first token is dead, the second works.
        let stale = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &first.token,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(stale, Err(Error::InviteRevoked)));

        let member = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &second.token,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(member.role, OrgRole::Admin);

        let invites = fixture
            .manager
            .list_organization_invites(owner.id, organization.id)
            .await
            .unwrap();
        let statuses: Vec<_> = invites.iter().map(|invite| invite.status).collect();
        assert!(statuses.contains(&InviteStatus::Revoked));
        assert!(statuses.contains(&InviteStatus::Accepted));
    }

    #[tokio::test]
    async fn preview_is_vague_about_failures() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let preview = fixture
            .manager
            .preview_organization_invite(organization.id, &created.token)
            .await
            .unwrap();
        assert_eq!(preview.organization.name, "Acme");
        assert_eq!(preview.inviter.name, "Owner");
        assert_eq!(preview.role, "member");

        let wrong_token = fixture
            .manager
            .preview_organization_invite(organization.id, "civ_not-a-real-token")
            .await;
        assert!(matches!(wrong_token, Err(Error::InvalidToken)));

        fixture
            .manager
            .revoke_organization_invite(
                owner.id,
                organization.id,
                created.invite.id,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        let revoked = fixture
            .manager
            .preview_organization_invite(organization.id, &created.token)
            .await;
        assert!(matches!(revoked, Err(Error::InvalidToken)));
    }

    #[tokio::test]
    async fn accept_creates_membership_and_audit_row() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let member = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(member.role, OrgRole::Member);
        assert_eq!(
            fixture.ledger.organization_role(organization.id, bob.id).await,
            Some(OrgRole::Member)
        );
        assert_eq!(audit_count(&fixture, AuditAction::OrganizationMemberAdd).await, 1);

        // Repeat accept by the same user is a no-op success.
        let again = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(again.id, member.id);
        assert_eq!(audit_count(&fixture, AuditAction::OrganizationMemberAdd).await, 1);
    }

    #[tokio::test]
    async fn accept_rejects_other_accounts() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let mallory = seed_user(&fixture, "Mallory", "mallory@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let mismatch = fixture
            .manager
            .accept_organization_invite(
                mallory.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(mismatch, Err(Error::EmailMismatch)));
        assert!(fixture
            .ledger
            .organization_role(organization.id, mallory.id)
            .await
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_double_accept_yields_one_membership() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let manager_a = fixture.manager.clone();
        let manager_b = fixture.manager.clone();
        let token_a = created.token.clone();
        let token_b = created.token.clone();
        let org_id = organization.id;
        let bob_id = bob.id;

        let first = tokio::spawn(async move {
            manager_a
                .accept_organization_invite(bob_id, org_id, &token_a, &RequestContext::default())
                .await
        });
        let second = tokio::spawn(async move {
            manager_b
                .accept_organization_invite(bob_id, org_id, &token_b, &RequestContext::default())
                .await
        });

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.id, second.id);

        let members = fixture.ledger.list_organization_members(organization.id).await;
        let bob_rows = members.iter().filter(|m| m.user_id == bob.id).count();
        assert_eq!(bob_rows, 1);
    }

    #[tokio::test]
    async fn decline_closes_the_invite_without_membership() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let declined = fixture
            .manager
            .decline_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(declined.status, InviteStatus::Declined);
        assert!(fixture
            .ledger
            .organization_role(organization.id, bob.id)
            .await
            .is_none());

        let accept_after = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(accept_after, Err(Error::InviteAlreadyResolved)));
        assert_eq!(audit_count(&fixture, AuditAction::OrganizationInviteDecline).await, 1);
    }

    #[tokio::test]
    async fn scenario_revoke_then_accept_fails_with_invite_revoked() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Admin,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let revoked = fixture
            .manager
            .revoke_organization_invite(
                owner.id,
                organization.id,
                created.invite.id,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(revoked.status, InviteStatus::Revoked);

        let accept = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(accept, Err(Error::InviteRevoked)));
        assert!(fixture
            .ledger
            .organization_role(organization.id, bob.id)
            .await
            .is_none());

        let decline = fixture
            .manager
            .decline_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(decline, Err(Error::InviteRevoked)));
    }

    #[tokio::test]
    async fn scenario_expired_invite_never_accepts_despite_stored_pending() {
        // TTL already elapsed at creation: the stored status stays pending
        // while the effective status is expired.
        let fixture = build_fixture_with_ttl(Duration::hours(-1)).await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(created.invite.status, InviteStatus::Expired);

        let accept = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(accept, Err(Error::InviteExpired)));
        assert!(fixture
            .ledger
            .organization_role(organization.id, bob.id)
            .await
            .is_none());

        // The lazy check also persisted the terminal status.
        let invites = fixture
            .manager
            .list_organization_invites(owner.id, organization.id)
            .await
            .unwrap();
        assert_eq!(invites[0].status, InviteStatus::Expired);
    }

    #[tokio::test]
    async fn resend_rotates_the_token_and_extends_expiry() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let resent = fixture
            .manager
            .resend_organization_invite(
                owner.id,
                organization.id,
                created.invite.id,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_ne!(resent.token, created.token);
        assert_eq!(resent.invite.status, InviteStatus::Pending);
        assert!(resent.invite.expires_at >= created.invite.expires_at);

        // The leaked original link is dead.
        let stale = fixture
            .manager
            .preview_organization_invite(organization.id, &created.token)
            .await;
        assert!(matches!(stale, Err(Error::InvalidToken)));

        let member = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &resent.token,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(member.user_id, bob.id);
        assert_eq!(audit_count(&fixture, AuditAction::OrganizationInviteResend).await, 1);
    }

    #[tokio::test]
    async fn accept_fails_distinctly_when_organization_was_deleted() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;

        let created = fixture
            .manager
            .create_organization_invite(
                owner.id,
                organization.id,
                "bob@example.com",
                OrgRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        fixture
            .tenants
            .soft_delete_organization(organization.id)
            .await
            .unwrap();

        let accept = fixture
            .manager
            .accept_organization_invite(
                bob.id,
                organization.id,
                &created.token,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(accept, Err(Error::NotFound(_))));
        assert!(fixture
            .ledger
            .organization_role(organization.id, bob.id)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn workspace_accept_auto_provisions_organization_membership() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let bob = seed_user(&fixture, "Bob", "bob@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;
        let workspace = seed_workspace(&fixture, &organization, "Platform").await;

        let created = fixture
            .manager
            .create_workspace_invite(
                owner.id,
                workspace.id,
                "bob@example.com",
                WorkspaceRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let acceptance = fixture
            .manager
            .accept_workspace_invite(
                bob.id,
                workspace.id,
                &created.token,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(acceptance.workspace_member.role, WorkspaceRole::Member);
        let provisioned = acceptance.organization_member.unwrap();
        assert_eq!(provisioned.role, OrgRole::Member);
        assert_eq!(
            fixture.ledger.organization_role(organization.id, bob.id).await,
            Some(OrgRole::Member)
        );
        assert_eq!(audit_count(&fixture, AuditAction::OrganizationMemberAdd).await, 1);
        assert_eq!(audit_count(&fixture, AuditAction::WorkspaceMemberAdd).await, 1);
    }

    #[tokio::test]
    async fn scenario_workspace_invite_end_to_end() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;
        let workspace = seed_workspace(&fixture, &organization, "W1").await;

        let created = fixture
            .manager
            .create_workspace_invite(
                owner.id,
                workspace.id,
                "bob@x.com",
                WorkspaceRole::Admin,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let bob = seed_user(&fixture, "Bob", "bob@x.com").await;

        let preview = fixture
            .manager
            .preview_workspace_invite(workspace.id, &created.token)
            .await
            .unwrap();
        assert_eq!(preview.organization.name, "Acme");
        assert_eq!(preview.workspace.as_ref().unwrap().name, "W1");
        assert_eq!(preview.inviter.name, "Owner");

        let acceptance = fixture
            .manager
            .accept_workspace_invite(
                bob.id,
                workspace.id,
                &created.token,
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(acceptance.workspace_member.role, WorkspaceRole::Admin);
        assert_eq!(acceptance.workspace_member.workspace_id, workspace.id);

        let invites = fixture
            .manager
            .list_workspace_invites(owner.id, workspace.id)
            .await
            .unwrap();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].status, InviteStatus::Accepted);

        assert_eq!(audit_count(&fixture, AuditAction::WorkspaceMemberAdd).await, 1);
    }

    #[tokio::test]
    async fn workspace_admin_can_invite_without_org_admin_standing() {
        let fixture = build_fixture().await;
        let owner = seed_user(&fixture, "Owner", "owner@example.com").await;
        let lead = seed_user(&fixture, "Lead", "lead@example.com").await;
        let organization = seed_organization(&fixture, &owner, "Acme").await;
        let workspace = seed_workspace(&fixture, &organization, "Platform").await;

        fixture
            .ledger
            .add_organization_member(organization.id, lead.id, OrgRole::Member)
            .await
            .unwrap();
        fixture
            .ledger
            .add_workspace_member(workspace.id, organization.id, lead.id, WorkspaceRole::Admin)
            .await
            .unwrap();

        fixture
            .manager
            .create_workspace_invite(
                lead.id,
                workspace.id,
                "bob@example.com",
                WorkspaceRole::Member,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        // A plain workspace member cannot.
        let plain = seed_user(&fixture, "Plain", "plain@example.com").await;
        fixture
            .ledger
            .add_organization_member(organization.id, plain.id, OrgRole::Member)
            .await
            .unwrap();
        fixture
            .ledger
            .add_workspace_member(workspace.id, organization.id, plain.id, WorkspaceRole::Member)
            .await
            .unwrap();
        let denied = fixture
            .manager
            .create_workspace_invite(
                plain.id,
                workspace.id,
                "carol@example.com",
                WorkspaceRole::Member,
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(denied, Err(Error::InsufficientRole(_))));
    }
}
