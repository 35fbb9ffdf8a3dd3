//! Invite lifecycle
//!
//! Token-bearing offers of membership with a bounded lifetime and
//! single-use semantics.

mod manager;
mod model;

pub use manager::InviteLifecycleManager;
pub use model::{
    CreatedInvite, Invite, InvitePreview, InviteScope, InviteStatus, InviteSummary,
    PreviewInviter, PreviewOrganization, PreviewWorkspace, WorkspaceAcceptance,
};
