//! Membership ledger
//!
//! Single source of truth for who belongs to which organization or
//! workspace, and with what role.

mod ledger;
mod model;

pub use ledger::MembershipLedger;
pub use model::{OrgRole, OrganizationMember, WorkspaceMember, WorkspaceRole};
