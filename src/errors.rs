//! Error handling module
//!
//! Directory operations return typed results instead of booleans so callers can
//! tell an idempotent no-op apart from a real failure, and a transient fault
//! apart from one that will never succeed.

use serde::Serialize;
use thiserror::Error;

/// Error type for directory operations
#[derive(Error, Debug, Clone)]
pub enum DirectoryError {
    /// LDAP connection error
    #[error("LDAP connection failed: {0}")]
    ConnectionError(String),

    /// LDAP query/search error
    #[error("LDAP query failed: {0}")]
    QueryError(String),

    /// Modify or modify-DN rejected by the server
    #[error("LDAP modify failed: {0}")]
    ModifyError(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Input validation error
    #[error("Invalid input: {0}")]
    ValidationError(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Coarse classification of a [`DirectoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Transient,
    Permanent,
}

impl DirectoryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DirectoryError::NotFound(_) => FailureKind::NotFound,
            DirectoryError::ConnectionError(_)
            | DirectoryError::Timeout(_) => FailureKind::Transient,
            DirectoryError::QueryError(_)
            | DirectoryError::ModifyError(_)
            | DirectoryError::AuthError(_)
            | DirectoryError::ValidationError(_)
            | DirectoryError::PermissionDenied(_)
            | DirectoryError::InternalError(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

/// Result of a mutating directory call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// The directory was changed
    Applied,
    /// The directory already had the requested state
    AlreadySatisfied,
}

impl ChangeOutcome {
    pub fn was_applied(self) -> bool {
        matches!(self, ChangeOutcome::Applied)
    }
}

/// Maps an LDAP result code to an error. Only called for non-success codes.
pub(crate) fn from_result_code(rc: u32, text: &str) -> DirectoryError {
    match rc {
        // 49 = Invalid credentials
        49 => DirectoryError::AuthError(format!("Invalid credentials: {}", text)),
        // 32 = No such object
        32 => DirectoryError::NotFound(format!("No such object: {}", text)),
        // 50 = Insufficient access rights
        50 => DirectoryError::PermissionDenied(format!("Insufficient access rights: {}", text)),
        // 51 = Busy
        51 => DirectoryError::Timeout(format!("Server is busy: {}", text)),
        // 52 = Unavailable
        52 => DirectoryError::ConnectionError(format!("Server unavailable: {}", text)),
        // 53 = Unwilling to perform
        53 => DirectoryError::ModifyError(format!(
            "Server unwilling to perform operation: {}",
            text
        )),
        // 19 = Constraint violation, 64 = Naming violation, 65 = Object class violation
        19 | 64 | 65 => DirectoryError::ModifyError(format!("LDAP error code {}: {}", rc, text)),
        _ => DirectoryError::QueryError(format!("LDAP error code {}: {}", rc, text)),
    }
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => from_result_code(result.rc, &result.text),
            // Connection-related errors
            ldap3::LdapError::EndOfStream => {
                DirectoryError::ConnectionError("Connection closed unexpectedly".to_string())
            }
            ldap3::LdapError::Io { source } => {
                DirectoryError::ConnectionError(format!("I/O error: {}", source))
            }
            ldap3::LdapError::Timeout { elapsed: _ } => {
                DirectoryError::Timeout("LDAP operation timed out".to_string())
            }
            _ => DirectoryError::QueryError(format!("LDAP error: {}", err)),
        }
    }
}

impl From<anyhow::Error> for DirectoryError {
    fn from(err: anyhow::Error) -> Self {
        DirectoryError::InternalError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DirectoryError {
    fn from(err: tokio::task::JoinError) -> Self {
        DirectoryError::InternalError(format!("LDAP worker task failed: {}", err))
    }
}

/// Result type alias for directory operations
pub type Result<T> = std::result::Result<T, DirectoryError>;
