//! Error types for the core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid or expired invite token")]
    InvalidToken,

    #[error("Invite has expired")]
    InviteExpired,

    #[error("Invite has been revoked")]
    InviteRevoked,

    #[error("Invite was already resolved")]
    InviteAlreadyResolved,

    #[error("Invite was issued to a different email address")]
    EmailMismatch,

    #[error("Insufficient role: {0}")]
    InsufficientRole(String),

    #[error("Not a member: {0}")]
    NotAMember(String),

    #[error("Organization owner cannot be modified")]
    CannotModifyOwner,

    #[error("Duplicate membership: {0}")]
    DuplicateMembership(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Stable machine-readable code, used verbatim in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::InviteExpired => "INVITE_EXPIRED",
            Self::InviteRevoked => "INVITE_REVOKED",
            Self::InviteAlreadyResolved => "INVITE_ALREADY_RESOLVED",
            Self::EmailMismatch => "EMAIL_MISMATCH",
            Self::InsufficientRole(_) => "INSUFFICIENT_ROLE",
            Self::NotAMember(_) => "NOT_A_MEMBER",
            Self::CannotModifyOwner => "CANNOT_MODIFY_OWNER",
            Self::DuplicateMembership(_) => "DUPLICATE_MEMBERSHIP",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Conflict(_) => "CONFLICT",
            Self::Io(_) | Self::Serialization(_) | Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}
