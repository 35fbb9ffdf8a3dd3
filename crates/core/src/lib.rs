//! Core library for Crewboard
//!
//! This crate contains the authorization and invitation core, including:
//! - Identity lookup and credentials
//! - Organization and workspace records
//! - The membership ledger (who belongs where, with what role)
//! - The role authority (pure allow/deny decisions)
//! - The invite lifecycle state machine
//! - The append-only audit recorder

pub mod audit;
pub mod authz;
pub mod error;
pub mod identity;
pub mod invite;
pub mod membership;
pub mod tenant;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
