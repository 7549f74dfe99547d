//! Retired-computers OU setting.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::{ConfigVersion, Database};
use crate::ldap_utils::is_distinguished_name;

/// Config store key for the retired-computers OU.
pub const RETIRED_OU_KEY: &str = "retired_computers_ou";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRetiredOu {
    retired_computers_ou: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetiredOuConfig {
    #[serde(rename = "retiredComputersOU")]
    pub retired_computers_ou: String,
    pub last_updated: DateTime<Utc>,
    pub updated_by: String,
    pub is_active: bool,
}

/// Where the clone workflow looks up the OU that replaced machines move to.
#[async_trait]
pub trait RetiredOuSource: Send + Sync {
    async fn retired_computers_ou(&self) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct OuConfigStore {
    db: Database,
}

impl OuConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The active retired-computers OU, if one has been configured.
    pub fn get_retired_ou(&self) -> Result<Option<RetiredOuConfig>> {
        Ok(self
            .db
            .current::<StoredRetiredOu>(RETIRED_OU_KEY)?
            .map(to_config))
    }

    /// Replaces the retired-computers OU.
    pub fn save_retired_ou(&self, path: &str, updated_by: &str) -> Result<RetiredOuConfig> {
        let path = path.trim();
        if !is_distinguished_name(path) {
            return Err(anyhow!(
                "'{}' is not a distinguished name (expected e.g. OU=Retired,DC=example,DC=com)",
                path
            ));
        }

        let version = self.db.replace(
            RETIRED_OU_KEY,
            &StoredRetiredOu {
                retired_computers_ou: path.to_string(),
            },
            updated_by,
        )?;

        info!(target: "audit", ou = path, updated_by = updated_by, "Retired computers OU updated");
        Ok(to_config(version))
    }

    /// Past and current settings, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<RetiredOuConfig>> {
        Ok(self
            .db
            .history::<StoredRetiredOu>(RETIRED_OU_KEY, limit)?
            .into_iter()
            .map(to_config)
            .collect())
    }
}

fn to_config(version: ConfigVersion<StoredRetiredOu>) -> RetiredOuConfig {
    RetiredOuConfig {
        retired_computers_ou: version.value.retired_computers_ou,
        last_updated: version.updated_at,
        updated_by: version.updated_by,
        is_active: version.is_active,
    }
}

#[async_trait]
impl RetiredOuSource for OuConfigStore {
    async fn retired_computers_ou(&self) -> Result<Option<String>> {
        let store = self.clone();
        let config = tokio::task::spawn_blocking(move || store.get_retired_ou()).await??;
        Ok(config.map(|config| config.retired_computers_ou))
    }
}
