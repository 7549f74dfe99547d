//! Service account storage.
//!
//! The directory client binds as a dedicated service account rather than as
//! whoever is calling the API. The account lives in the versioned config store
//! under [`SERVICE_ACCOUNT_KEY`] with its secret encrypted by
//! [`SymmetricCipher`]; the plaintext only exists inside [`ServiceCredentials`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cipher::SymmetricCipher;
use crate::config::DirectorySettings;
use crate::database::{ConfigVersion, Database};
use crate::ldap_timeout::{
    ldap_bind_with_timeout, ldap_connect_with_timeout, ldap_unbind_with_timeout,
};
use crate::secure_types::{qualified_identity, SecureString, ServiceCredentials};

/// Config store key for the service account.
pub const SERVICE_ACCOUNT_KEY: &str = "service_account";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredIdentity {
    domain: String,
    username: String,
    encrypted_secret: String,
}

/// A stored service account, without its plaintext secret.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentity {
    pub domain: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub encrypted_secret: String,
    pub last_updated: DateTime<Utc>,
    pub updated_by: String,
    pub is_active: bool,
}

impl ServiceIdentity {
    fn from_version(version: ConfigVersion<StoredIdentity>) -> Self {
        Self {
            domain: version.value.domain,
            username: version.value.username,
            encrypted_secret: version.value.encrypted_secret,
            last_updated: version.updated_at,
            updated_by: version.updated_by,
            is_active: version.is_active,
        }
    }
}

/// Anything that can hand the directory client a service identity.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `Ok(None)` means no service account is configured and the caller
    /// should fall back to the ambient identity.
    async fn credentials(&self) -> Result<Option<ServiceCredentials>>;
}

#[derive(Clone)]
pub struct CredentialVault {
    db: Database,
    cipher: Arc<SymmetricCipher>,
    directory: DirectorySettings,
}

impl CredentialVault {
    pub fn new(db: Database, cipher: Arc<SymmetricCipher>, directory: DirectorySettings) -> Self {
        Self {
            db,
            cipher,
            directory,
        }
    }

    /// The active service account, if any.
    pub fn active_identity(&self) -> Result<Option<ServiceIdentity>> {
        Ok(self
            .db
            .current::<StoredIdentity>(SERVICE_ACCOUNT_KEY)?
            .map(ServiceIdentity::from_version))
    }

    /// Decrypted credentials for the active service account.
    ///
    /// A secret that cannot be decrypted comes back empty; the directory client
    /// refuses to bind with an empty secret, so this shows up as an
    /// authentication failure.
    pub fn get_credentials(&self) -> Result<Option<ServiceCredentials>> {
        let Some(identity) = self.active_identity()? else {
            return Ok(None);
        };

        let secret = self.cipher.decrypt(&identity.encrypted_secret);
        if secret.is_empty() && !identity.encrypted_secret.is_empty() {
            warn!(
                domain = %identity.domain,
                username = %identity.username,
                "Stored service account secret could not be decrypted"
            );
        }

        Ok(Some(ServiceCredentials::new(
            &identity.domain,
            &identity.username,
            SecureString::new(secret),
        )))
    }

    /// Replaces the active service account.
    pub fn save_identity(
        &self,
        domain: &str,
        username: &str,
        secret: &str,
        updated_by: &str,
    ) -> Result<ServiceIdentity> {
        let domain = domain.trim();
        let username = username.trim();
        if domain.is_empty() || username.is_empty() {
            return Err(anyhow!("Domain and username are required"));
        }

        let stored = StoredIdentity {
            domain: domain.to_string(),
            username: username.to_string(),
            encrypted_secret: self.cipher.encrypt(secret)?,
        };
        let version = self.db.replace(SERVICE_ACCOUNT_KEY, &stored, updated_by)?;

        info!(
            target: "audit",
            identity = %qualified_identity(domain, username),
            updated_by = updated_by,
            "Service account updated"
        );
        Ok(ServiceIdentity::from_version(version))
    }

    /// Checks that the directory accepts a bind with the supplied credentials.
    /// Nothing is stored.
    pub async fn test_identity(&self, domain: &str, username: &str, secret: &str) -> bool {
        let domain = domain.trim();
        let username = username.trim();
        // An empty password makes an unauthenticated bind, which servers accept.
        if domain.is_empty() || username.is_empty() || secret.is_empty() {
            return false;
        }

        let identity = qualified_identity(domain, username);
        let url = self.directory.url_for_domain(domain);

        let ldap = match ldap_connect_with_timeout(
            &url,
            self.directory.connect_timeout,
            self.directory.verify_tls,
        )
        .await
        {
            Ok(ldap) => ldap,
            Err(e) => {
                warn!(url = %url, error = %e, "Service account test: connection failed");
                return false;
            }
        };

        match ldap_bind_with_timeout(ldap, &identity, secret, self.directory.operation_timeout)
            .await
        {
            Ok(ldap) => {
                ldap_unbind_with_timeout(ldap, self.directory.operation_timeout).await;
                info!(identity = %identity, "Service account test succeeded");
                true
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Service account test: bind rejected");
                false
            }
        }
    }

    /// Re-encrypts the active secret when it was written with a scheme other
    /// than the configured one. Returns whether a new version was written.
    pub fn reencrypt_active(&self, updated_by: &str) -> Result<bool> {
        let Some(identity) = self.active_identity()? else {
            return Ok(false);
        };
        if !self.cipher.needs_reencryption(&identity.encrypted_secret) {
            return Ok(false);
        }

        let secret = self
            .cipher
            .try_decrypt(&identity.encrypted_secret)
            .map_err(|e| anyhow!("Cannot re-encrypt service account secret: {}", e))?;
        let secret = SecureString::new(secret);
        self.save_identity(
            &identity.domain,
            &identity.username,
            secret.expose_secret(),
            updated_by,
        )?;

        info!(scheme = %self.cipher.scheme(), "Service account secret re-encrypted");
        Ok(true)
    }
}

#[async_trait]
impl CredentialSource for CredentialVault {
    /// Store read and decryption run on the blocking pool.
    async fn credentials(&self) -> Result<Option<ServiceCredentials>> {
        let vault = self.clone();
        tokio::task::spawn_blocking(move || vault.get_credentials()).await?
    }
}
