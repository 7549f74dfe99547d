//! Timeout wrappers for synchronous LDAP operations
//!
//! `LdapConn` is blocking and can hang indefinitely on an unreachable or slow
//! domain controller. Every call here runs on `spawn_blocking` under a
//! `tokio::time::timeout`, hands the connection back to the caller, and maps
//! failures into [`DirectoryError`].

use ldap3::{LdapConn, LdapConnSettings, LdapResult, Mod, ResultEntry, Scope};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::errors::{DirectoryError, Result};

/// Default connection timeout (15 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default per-operation timeout (30 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a blocking LDAP closure with a deadline.
async fn run_blocking<T, F>(limit: Duration, what: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(joined) => joined?,
        Err(_) => {
            error!("{} timed out after {}s", what, limit.as_secs());
            Err(DirectoryError::Timeout(format!(
                "{} did not complete within {} seconds",
                what,
                limit.as_secs()
            )))
        }
    }
}

/// Opens an LDAP connection with a timeout.
///
/// `verify_tls` is passed through to the TLS layer; internal CAs and
/// self-signed domain controller certificates need it off.
pub async fn ldap_connect_with_timeout(
    url: &str,
    connect_timeout: Duration,
    verify_tls: bool,
) -> Result<LdapConn> {
    let url = url.to_string();

    run_blocking(connect_timeout, "LDAP connect", move || {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(connect_timeout)
            .set_no_tls_verify(!verify_tls);

        LdapConn::with_settings(settings, &url).map_err(|e| {
            DirectoryError::ConnectionError(format!("Could not reach {}: {}", url, e))
        })
    })
    .await
}

/// Performs a simple bind with a timeout, returning the bound connection.
pub async fn ldap_bind_with_timeout(
    ldap: LdapConn,
    identity: &str,
    secret: &str,
    bind_timeout: Duration,
) -> Result<LdapConn> {
    let identity = identity.to_string();
    let secret = zeroize::Zeroizing::new(secret.to_string());

    run_blocking(bind_timeout, "LDAP bind", move || {
        let mut ldap = ldap;
        ldap.simple_bind(&identity, &secret)?.success()?;
        Ok(ldap)
    })
    .await
}

/// Binds as the identity of the running process.
///
/// On Windows this is a Kerberos (SASL GSSAPI) bind using the service's logon
/// ticket. Elsewhere the connection's TLS client certificate or local socket
/// credentials are used through SASL EXTERNAL.
pub async fn ldap_ambient_bind_with_timeout(
    ldap: LdapConn,
    server_host: &str,
    bind_timeout: Duration,
) -> Result<LdapConn> {
    #[cfg(windows)]
    {
        let server_host = server_host.to_string();
        run_blocking(bind_timeout, "LDAP GSSAPI bind", move || {
            let mut ldap = ldap;
            ldap.sasl_gssapi_bind(&server_host)?.success()?;
            Ok(ldap)
        })
        .await
    }

    #[cfg(not(windows))]
    {
        debug!("Ambient bind via SASL EXTERNAL for {}", server_host);
        run_blocking(bind_timeout, "LDAP EXTERNAL bind", move || {
            let mut ldap = ldap;
            ldap.sasl_external_bind()?.success()?;
            Ok(ldap)
        })
        .await
    }
}

/// Unbinds with a timeout. Failures are not critical; the socket is dropped either way.
pub async fn ldap_unbind_with_timeout(ldap: LdapConn, unbind_timeout: Duration) {
    let result = run_blocking(unbind_timeout, "LDAP unbind", move || {
        let mut ldap = ldap;
        ldap.unbind().map_err(DirectoryError::from)
    })
    .await;

    if let Err(e) = result {
        debug!("Unbind failed: {}", e);
    }
}

/// Performs an LDAP search with a timeout.
///
/// sizeLimitExceeded (rc=4) returns the partial result set with a warning.
pub async fn ldap_search_with_timeout(
    ldap: LdapConn,
    base_dn: &str,
    scope: Scope,
    filter: &str,
    attrs: Vec<&str>,
    search_timeout: Duration,
) -> Result<(Vec<ResultEntry>, LdapConn)> {
    let base_dn = base_dn.to_string();
    let filter = filter.to_string();
    let attrs: Vec<String> = attrs.into_iter().map(|s| s.to_string()).collect();

    debug!("LDAP search in {} with filter {}", base_dn, filter);

    run_blocking(search_timeout, "LDAP search", move || {
        let mut ldap = ldap;
        let attrs_refs: Vec<&str> = attrs.iter().map(|s| s.as_str()).collect();
        let ldap3::SearchResult(entries, ldap_result) =
            ldap.search(&base_dn, scope, &filter, attrs_refs)?;

        match ldap_result.rc {
            0 => Ok((entries, ldap)),
            4 => {
                warn!(
                    "Size limit exceeded (rc=4), returning {} partial entries",
                    entries.len()
                );
                Ok((entries, ldap))
            }
            _ => Err(crate::errors::from_result_code(
                ldap_result.rc,
                &ldap_result.text,
            )),
        }
    })
    .await
}

/// Applies modifications to one entry. The raw result is returned unchecked so
/// callers can treat codes such as attributeOrValueExists as a no-op.
pub async fn ldap_modify_with_timeout(
    ldap: LdapConn,
    dn: &str,
    mods: Vec<Mod<String>>,
    modify_timeout: Duration,
) -> Result<(LdapResult, LdapConn)> {
    let dn = dn.to_string();

    run_blocking(modify_timeout, "LDAP modify", move || {
        let mut ldap = ldap;
        let result = ldap.modify(&dn, mods)?;
        Ok((result, ldap))
    })
    .await
}

/// Renames or moves an entry. Result is returned unchecked, as for modify.
pub async fn ldap_modifydn_with_timeout(
    ldap: LdapConn,
    dn: &str,
    rdn: &str,
    new_superior: &str,
    modify_timeout: Duration,
) -> Result<(LdapResult, LdapConn)> {
    let dn = dn.to_string();
    let rdn = rdn.to_string();
    let new_superior = new_superior.to_string();

    run_blocking(modify_timeout, "LDAP modify DN", move || {
        let mut ldap = ldap;
        let result = ldap.modifydn(&dn, &rdn, true, Some(new_superior.as_str()))?;
        Ok((result, ldap))
    })
    .await
}
