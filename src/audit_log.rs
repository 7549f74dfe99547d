//! Audit trail for clone operations.
//!
//! Every clone attempt (successful, partially failed, or aborted) produces one
//! immutable row. Rows carry a SHA-256 checksum over their fields so edits made
//! directly in the database show up in [`AuditLogger::verify_integrity`].

use anyhow::{anyhow, Result};
use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::database::{default_database_path, open_connection};

/// Username recorded when the caller could not be identified.
pub const UNKNOWN_USER: &str = "Unknown";

/// Default number of rows for [`AuditLogger::recent`].
pub const DEFAULT_RECENT_COUNT: usize = 50;

/// Default page size for [`AuditLogger::query`].
pub const DEFAULT_PAGE_SIZE: usize = 25;

const MAX_PAGE_SIZE: usize = 500;

/// One audited operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub source_computer: String,
    pub target_computer: String,
    pub groups_cloned: String,
    pub additional_groups: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub details: String,
    pub username: String,
    #[serde(rename = "sourceComputerOU")]
    pub source_computer_ou: Option<String>,
    #[serde(rename = "targetComputerOU")]
    pub target_computer_ou: Option<String>,
    pub checksum: Option<String>,
}

impl AuditRecord {
    pub fn new(operation: &str, source: &str, target: &str, username: Option<&str>) -> Self {
        let username = username
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(UNKNOWN_USER);

        Self {
            id: None,
            timestamp: Utc::now(),
            operation: operation.to_string(),
            source_computer: source.to_string(),
            target_computer: target.to_string(),
            groups_cloned: String::new(),
            additional_groups: String::new(),
            success: false,
            error_message: None,
            details: String::new(),
            username: username.to_string(),
            source_computer_ou: None,
            target_computer_ou: None,
            checksum: None,
        }
    }

    pub fn with_groups(mut self, groups_cloned: &[String], additional_groups: &[String]) -> Self {
        self.groups_cloned = groups_cloned.join(", ");
        self.additional_groups = additional_groups.join(", ");
        self
    }

    pub fn with_result(mut self, success: bool, error_message: Option<String>) -> Self {
        self.success = success;
        self.error_message = error_message.filter(|e| !e.is_empty());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_ous(mut self, source_ou: Option<String>, target_ou: Option<String>) -> Self {
        self.source_computer_ou = source_ou.filter(|ou| !ou.is_empty());
        self.target_computer_ou = target_ou.filter(|ou| !ou.is_empty());
        self
    }

    fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// SHA-256 over the stored fields, pipe separated
    fn generate_checksum(&self) -> String {
        use sha2::{Digest, Sha256};
        let data = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.timestamp_string(),
            self.operation,
            self.source_computer,
            self.target_computer,
            self.groups_cloned,
            self.additional_groups,
            self.success,
            self.error_message.as_deref().unwrap_or(""),
            self.details,
            self.username,
            self.source_computer_ou.as_deref().unwrap_or(""),
            self.target_computer_ou.as_deref().unwrap_or("")
        );
        format!("{:x}", Sha256::digest(data.as_bytes()))
    }
}

/// Fixed-width timestamps so lexical order in SQLite is chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Persists `record`, stamping its timestamp. Returns the new row id.
    fn record(&self, record: AuditRecord) -> Result<i64>;
}

/// Columns the audit list can be sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSort {
    #[default]
    Timestamp,
    Username,
    Operation,
    Source,
    Target,
    Success,
}

impl AuditSort {
    fn column(self) -> &'static str {
        match self {
            AuditSort::Timestamp => "timestamp",
            AuditSort::Username => "username",
            AuditSort::Operation => "operation",
            AuditSort::Source => "source_computer",
            AuditSort::Target => "target_computer",
            AuditSort::Success => "success",
        }
    }
}

/// Query filters for the audit list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditFilter {
    /// First day included
    pub from: Option<NaiveDate>,
    /// Last day included
    pub to: Option<NaiveDate>,
    pub username: Option<String>,
    pub operation: Option<String>,
    /// Substring of the source computer name
    pub source: Option<String>,
    /// Substring of the target computer name
    pub target: Option<String>,
    /// Substring of the error text
    pub error: Option<String>,
    pub success: Option<bool>,
    pub sort: AuditSort,
    /// Newest / highest first when unset
    pub descending: Option<bool>,
    /// 1-based page number
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub items: Vec<AuditRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub total_entries: usize,
    pub verified: usize,
    pub tampered: Vec<i64>,
}

const SELECT_COLUMNS: &str = "id, timestamp, operation, source_computer, target_computer, \
     groups_cloned, additional_groups, success, error_message, details, username, \
     source_computer_ou, target_computer_ou, checksum";

/// Audit log manager with persistent storage
pub struct AuditLogger {
    db: Arc<Mutex<Connection>>,
}

impl AuditLogger {
    /// Opens the audit table in the given database file (the shared
    /// application database by default).
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(default_database_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("Initializing audit logger at: {:?}", path);
        Self::from_connection(open_connection(&path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                operation TEXT NOT NULL,
                source_computer TEXT NOT NULL,
                target_computer TEXT NOT NULL,
                groups_cloned TEXT NOT NULL,
                additional_groups TEXT NOT NULL,
                success INTEGER NOT NULL,
                error_message TEXT,
                details TEXT NOT NULL,
                username TEXT NOT NULL,
                source_computer_ou TEXT,
                target_computer_ou TEXT,
                checksum TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_username ON audit_log(username);
            CREATE INDEX IF NOT EXISTS idx_audit_operation ON audit_log(operation);",
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow!("Failed to acquire audit log lock: {}", e))
    }

    /// Stores a record with a fresh timestamp and checksum.
    pub fn log(&self, mut record: AuditRecord) -> Result<i64> {
        record.timestamp = Utc::now();
        record.checksum = Some(record.generate_checksum());

        let db = self.lock()?;
        db.execute(
            "INSERT INTO audit_log (
                timestamp, operation, source_computer, target_computer,
                groups_cloned, additional_groups, success, error_message,
                details, username, source_computer_ou, target_computer_ou, checksum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.timestamp_string(),
                record.operation,
                record.source_computer,
                record.target_computer,
                record.groups_cloned,
                record.additional_groups,
                record.success,
                record.error_message,
                record.details,
                record.username,
                record.source_computer_ou,
                record.target_computer_ou,
                record.checksum,
            ],
        )?;
        let id = db.last_insert_rowid();

        if record.success {
            info!(
                target: "audit",
                id = id,
                operation = %record.operation,
                source_computer = %record.source_computer,
                target_computer = %record.target_computer,
                user = %record.username,
                "Operation recorded"
            );
        } else {
            warn!(
                target: "audit",
                id = id,
                operation = %record.operation,
                source_computer = %record.source_computer,
                target_computer = %record.target_computer,
                user = %record.username,
                error = record.error_message.as_deref().unwrap_or(""),
                "Failed operation recorded"
            );
        }

        Ok(id)
    }

    /// Filtered, sorted, paginated listing.
    pub fn query(&self, filter: &AuditFilter) -> Result<AuditPage> {
        let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(anyhow!(
                "Invalid page size: must be between 1 and {}",
                MAX_PAGE_SIZE
            ));
        }
        let page = filter.page.unwrap_or(1).max(1);

        let mut clause = String::from(" WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(from) = filter.from {
            clause.push_str(" AND timestamp >= ?");
            params_vec.push(Box::new(day_start(from)));
        }
        if let Some(to) = filter.to {
            // `to` includes the whole day
            if let Some(next) = to.checked_add_days(Days::new(1)) {
                clause.push_str(" AND timestamp < ?");
                params_vec.push(Box::new(day_start(next)));
            }
        }
        if let Some(username) = non_blank(&filter.username) {
            clause.push_str(" AND username = ?");
            params_vec.push(Box::new(username.to_string()));
        }
        if let Some(operation) = non_blank(&filter.operation) {
            clause.push_str(" AND operation = ?");
            params_vec.push(Box::new(operation.to_string()));
        }
        for (column, value) in [
            ("source_computer", &filter.source),
            ("target_computer", &filter.target),
            ("error_message", &filter.error),
        ] {
            if let Some(value) = non_blank(value) {
                clause.push_str(&format!(" AND {} LIKE ? ESCAPE '\\'", column));
                params_vec.push(Box::new(format!("%{}%", escape_like(value))));
            }
        }
        if let Some(success) = filter.success {
            clause.push_str(" AND success = ?");
            params_vec.push(Box::new(success));
        }

        let db = self.lock()?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|b| b.as_ref()).collect();

        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM audit_log{}", clause),
            params_refs.as_slice(),
            |row| row.get(0),
        )?;
        let total = total as usize;

        let direction = if filter.descending.unwrap_or(true) {
            "DESC"
        } else {
            "ASC"
        };
        // Column and direction come from fixed enums, never from input
        let sql = format!(
            "SELECT {} FROM audit_log{} ORDER BY {} {}, id {} LIMIT {} OFFSET {}",
            SELECT_COLUMNS,
            clause,
            filter.sort.column(),
            direction,
            direction,
            page_size,
            (page - 1).saturating_mul(page_size)
        );

        let mut stmt = db.prepare(&sql)?;
        let items = stmt
            .query_map(params_refs.as_slice(), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AuditPage {
            items,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        })
    }

    /// A single record by id.
    pub fn get(&self, id: i64) -> Result<Option<AuditRecord>> {
        let db = self.lock()?;
        let record = db
            .query_row(
                &format!("SELECT {} FROM audit_log WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent records, newest first.
    pub fn recent(&self, count: usize) -> Result<Vec<AuditRecord>> {
        self.list_where("1=1", params![], count)
    }

    /// Most recent records of one user, newest first.
    pub fn by_user(&self, username: &str, count: usize) -> Result<Vec<AuditRecord>> {
        self.list_where("username = ?1", params![username], count)
    }

    fn list_where(
        &self,
        condition: &str,
        params: &[&dyn rusqlite::ToSql],
        count: usize,
    ) -> Result<Vec<AuditRecord>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM audit_log WHERE {} ORDER BY timestamp DESC, id DESC LIMIT {}",
            SELECT_COLUMNS,
            condition,
            count.min(MAX_PAGE_SIZE)
        ))?;
        let records = stmt
            .query_map(params, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Usernames that appear in the log, sorted.
    pub fn distinct_usernames(&self) -> Result<Vec<String>> {
        self.distinct("username")
    }

    /// Operation labels that appear in the log, sorted.
    pub fn distinct_operations(&self) -> Result<Vec<String>> {
        self.distinct("operation")
    }

    fn distinct(&self, column: &'static str) -> Result<Vec<String>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT DISTINCT {0} FROM audit_log ORDER BY {0}",
            column
        ))?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    /// Recomputes every checksum and lists rows that no longer match.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM audit_log ORDER BY id",
            SELECT_COLUMNS
        ))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = IntegrityReport {
            total_entries: records.len(),
            verified: 0,
            tampered: Vec::new(),
        };
        for record in records {
            if record.checksum.as_deref() == Some(record.generate_checksum().as_str()) {
                report.verified += 1;
            } else {
                report.tampered.push(record.id.unwrap_or(0));
            }
        }

        if !report.tampered.is_empty() {
            warn!(target: "audit", tampered = ?report.tampered, "Audit integrity check failed");
        }
        Ok(report)
    }
}

impl AuditSink for AuditLogger {
    fn record(&self, record: AuditRecord) -> Result<i64> {
        self.log(record)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let timestamp_str: String = row.get(1)?;
    let timestamp = timestamp_str.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AuditRecord {
        id: row.get(0)?,
        timestamp,
        operation: row.get(2)?,
        source_computer: row.get(3)?,
        target_computer: row.get(4)?,
        groups_cloned: row.get(5)?,
        additional_groups: row.get(6)?,
        success: row.get(7)?,
        error_message: row.get(8)?,
        details: row.get(9)?,
        username: row.get(10)?,
        source_computer_ou: row.get(11)?,
        target_computer_ou: row.get(12)?,
        checksum: row.get(13)?,
    })
}

fn day_start(day: NaiveDate) -> String {
    format_timestamp(&day.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
