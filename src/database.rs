//! SQLite-backed versioned configuration store.
//!
//! Each configuration key (the service account, the retired-computers OU) has
//! an append-only history in `config_versions` and exactly one row in
//! `config_current` pointing at the live version. Replacing a value inserts
//! the new version and moves the pointer inside one transaction, so a reader
//! sees either the old version or the new one, never none or two.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// One stored version of a configuration value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigVersion<T> {
    pub id: i64,
    pub key: String,
    pub value: T,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Database manager holding one shared connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Default database location under the platform data directory.
pub fn default_database_path() -> PathBuf {
    let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("PCGroupCloning");
    p.push("pc-group-cloning.db");
    p
}

impl Database {
    /// Opens (creating if needed) the database file and applies the schema.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(default_database_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }

        info!("Opening database at: {:?}", path);
        let conn = open_connection(&path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests and throwaway runs.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Failed to acquire database lock: {}", e))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                config_key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_config_versions_key
                ON config_versions(config_key, id DESC);
            CREATE TABLE IF NOT EXISTS config_current (
                config_key TEXT PRIMARY KEY,
                version_id INTEGER NOT NULL REFERENCES config_versions(id)
            );",
        )?;

        debug!("Configuration schema initialized");
        Ok(())
    }

    /// Stores `value` as the new current version of `key`.
    pub fn replace<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        updated_by: &str,
    ) -> Result<ConfigVersion<T>>
    where
        T: Clone,
    {
        let json = serde_json::to_string(value)?;
        let now = Utc::now();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO config_versions (config_key, value, updated_by, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, json, updated_by, now.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO config_current (config_key, version_id) VALUES (?1, ?2)
             ON CONFLICT(config_key) DO UPDATE SET version_id = excluded.version_id",
            params![key, id],
        )?;
        tx.commit()?;

        info!(target: "audit", key = key, version = id, updated_by = updated_by, "Configuration replaced");

        Ok(ConfigVersion {
            id,
            key: key.to_string(),
            value: value.clone(),
            updated_by: updated_by.to_string(),
            updated_at: now,
            is_active: true,
        })
    }

    /// The current version of `key`, if one was ever stored.
    pub fn current<T: DeserializeOwned>(&self, key: &str) -> Result<Option<ConfigVersion<T>>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT v.id, v.value, v.updated_by, v.updated_at
                 FROM config_current c
                 JOIN config_versions v ON v.id = c.version_id
                 WHERE c.config_key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, value, updated_by, updated_at)| {
            decode_version(key, id, &value, updated_by, &updated_at, true)
        })
        .transpose()
    }

    /// Stored versions of `key`, newest first.
    pub fn history<T: DeserializeOwned>(
        &self,
        key: &str,
        limit: usize,
    ) -> Result<Vec<ConfigVersion<T>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.value, v.updated_by, v.updated_at,
                    (c.version_id IS NOT NULL) AS is_active
             FROM config_versions v
             LEFT JOIN config_current c
                ON c.config_key = v.config_key AND c.version_id = v.id
             WHERE v.config_key = ?1
             ORDER BY v.id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![key, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut versions = Vec::new();
        for row in rows {
            let (id, value, updated_by, updated_at, is_active) = row?;
            versions.push(decode_version(
                key,
                id,
                &value,
                updated_by,
                &updated_at,
                is_active,
            )?);
        }
        Ok(versions)
    }
}

pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    // WAL lets the audit logger and the config store share the file
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", "5000")?;

    Ok(conn)
}

fn decode_version<T: DeserializeOwned>(
    key: &str,
    id: i64,
    value: &str,
    updated_by: String,
    updated_at: &str,
    is_active: bool,
) -> Result<ConfigVersion<T>> {
    let value = serde_json::from_str(value)
        .with_context(|| format!("Corrupt configuration value for '{}' (version {})", key, id))?;
    let updated_at = DateTime::parse_from_rfc3339(updated_at)
        .with_context(|| format!("Invalid timestamp on '{}' version {}", key, id))?
        .with_timezone(&Utc);

    Ok(ConfigVersion {
        id,
        key: key.to_string(),
        value,
        updated_by,
        updated_at,
        is_active,
    })
}
