//! Secure Types Module
//!
//! Credential containers that zero their contents when dropped and never print
//! the secret through `Debug` or `Display`.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string that zeros its contents when dropped.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    /// Temporarily exposes the secret.
    ///
    /// # Security
    /// The returned reference should be used immediately and not stored.
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Service account credentials used to bind to the directory.
///
/// The identity is domain-qualified (`DOMAIN\username`), the form Active
/// Directory accepts for a simple bind.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ServiceCredentials {
    identity: String,
    secret: SecureString,
}

impl ServiceCredentials {
    pub fn new(domain: &str, username: &str, secret: SecureString) -> Self {
        Self {
            identity: qualified_identity(domain, username),
            secret,
        }
    }

    /// Domain-qualified account name
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Exposes the plaintext secret for a bind.
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }
}

/// Joins domain and username as `DOMAIN\username`. A username that is already
/// qualified (down-level or UPN form) is kept as given.
pub fn qualified_identity(domain: &str, username: &str) -> String {
    let username = username.trim();
    if username.contains('\\') || username.contains('@') || domain.trim().is_empty() {
        username.to_string()
    } else {
        format!("{}\\{}", domain.trim(), username)
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceCredentials(identity: {}, secret: [REDACTED])", self.identity)
    }
}
