//! PC group cloning service.
//!
//! Copies Active Directory group membership and OU placement from one
//! computer object to its replacement, retires the old object, and keeps an
//! audit trail of every attempt.

pub mod ad_client;
pub mod api;
pub mod audit_log;
pub mod cipher;
pub mod clone_orchestrator;
pub mod config;
pub mod credential_vault;
pub mod database;
pub mod errors;
mod ldap_helpers;
pub mod ldap_timeout;
pub mod ldap_utils;
pub mod office_remap;
pub mod ou_config;
pub mod secure_types;
