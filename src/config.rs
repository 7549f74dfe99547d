//! Application configuration loaded from environment variables.
//!
//! Everything has a default so the service starts on a domain-joined host with
//! no configuration at all. Invalid values fail fast with a [`ConfigError`].

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cipher::{CipherScheme, DEFAULT_KEY};
use crate::ldap_timeout::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};
use crate::ldap_utils::base_dn_from_domain;
use crate::secure_types::SecureString;

/// Domain used when `PCGC_DOMAIN` is unset.
pub const DEFAULT_DOMAIN: &str = "IBK.lan";

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Where and how to reach the directory.
#[derive(Debug, Clone)]
pub struct DirectorySettings {
    pub domain: String,
    /// Explicitly configured LDAP URL, if any
    pub ldap_url: Option<String>,
    pub base_dn: String,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub verify_tls: bool,
}

impl DirectorySettings {
    /// Settings derived entirely from a DNS domain name.
    pub fn for_domain(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ldap_url: None,
            base_dn: base_dn_from_domain(domain),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            verify_tls: true,
        }
    }

    /// URL used for directory operations.
    pub fn url(&self) -> String {
        self.url_for_domain(&self.domain)
    }

    /// URL used to test credentials for `domain`: the configured URL when one
    /// is set, otherwise `ldap://{domain}`.
    pub fn url_for_domain(&self, domain: &str) -> String {
        match &self.ldap_url {
            Some(url) => url.clone(),
            None => format!("ldap://{}", domain.trim()),
        }
    }

    /// Host part of the URL, used as the Kerberos service host.
    pub fn server_host(&self) -> String {
        host_of(&self.url())
    }
}

fn host_of(url: &str) -> String {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(host, _)| host)
        .unwrap_or(authority)
        .to_string()
}

/// Full service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub directory: DirectorySettings,
    pub encryption_key: SecureString,
    pub cipher_scheme: CipherScheme,
    pub database_path: Option<PathBuf>,
    pub bind_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration from any name -> value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let domain = get("PCGC_DOMAIN").unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
        let mut directory = DirectorySettings::for_domain(&domain);
        directory.ldap_url = get("PCGC_LDAP_URL");
        if let Some(url) = &directory.ldap_url {
            if !(url.starts_with("ldap://") || url.starts_with("ldaps://") || url.starts_with("ldapi://")) {
                return Err(ConfigError::InvalidValue {
                    var: "PCGC_LDAP_URL".to_string(),
                    message: format!("'{}' is not an ldap://, ldaps:// or ldapi:// URL", url),
                });
            }
        }
        if let Some(base_dn) = get("PCGC_BASE_DN") {
            directory.base_dn = base_dn;
        }
        if let Some(secs) = parse_secs(&get, "PCGC_CONNECT_TIMEOUT_SECS")? {
            directory.connect_timeout = secs;
        }
        if let Some(secs) = parse_secs(&get, "PCGC_OPERATION_TIMEOUT_SECS")? {
            directory.operation_timeout = secs;
        }
        if let Some(flag) = get("PCGC_TLS_VERIFY") {
            directory.verify_tls = parse_bool("PCGC_TLS_VERIFY", &flag)?;
        }

        // Used verbatim; whitespace is part of the key
        let encryption_key = lookup("PCGC_ENCRYPTION_KEY")
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| DEFAULT_KEY.to_string());

        let cipher_scheme = match get("PCGC_CIPHER_SCHEME") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                var: "PCGC_CIPHER_SCHEME".to_string(),
                message,
            })?,
            None => CipherScheme::default(),
        };

        let bind_raw = get("PCGC_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|e| ConfigError::InvalidValue {
            var: "PCGC_BIND_ADDR".to_string(),
            message: format!("'{}': {}", bind_raw, e),
        })?;

        Ok(Self {
            directory,
            encryption_key: SecureString::new(encryption_key),
            cipher_scheme,
            database_path: get("PCGC_DATABASE_PATH").map(PathBuf::from),
            bind_addr,
            log_dir: get("PCGC_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Whether secrets are protected by the built-in key.
    pub fn uses_default_key(&self) -> bool {
        self.encryption_key.expose_secret() == DEFAULT_KEY
    }
}

fn parse_secs<G>(get: &G, var: &str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(None),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue {
                var: var.to_string(),
                message: format!("'{}' is not a positive number of seconds", raw),
            }),
            Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        },
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("'{}' is not a boolean", raw),
        }),
    }
}
