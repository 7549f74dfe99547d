//! Shared fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pc_group_cloning::ad_client::{ComputerDetails, DirectoryClient};
use pc_group_cloning::audit_log::{AuditRecord, AuditSink};
use pc_group_cloning::clone_orchestrator::{CloneOrchestrator, CloneRequest};
use pc_group_cloning::errors::{ChangeOutcome, DirectoryError, Result};
use pc_group_cloning::ou_config::RetiredOuSource;

/// One recorded directory call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Search(String),
    Membership(String),
    Ou(String),
    Details(String),
    Add(String, String),
    Remove(String, String),
    Move(String, String),
}

#[derive(Default)]
struct FakeState {
    groups: HashMap<String, Vec<String>>,
    ous: HashMap<String, String>,
    known_groups: Vec<String>,
    calls: Vec<Call>,
    fail_lookups: bool,
    fail_snapshot: bool,
    fail_remove: HashSet<String>,
    fail_add: HashSet<String>,
    fail_move: HashSet<String>,
    panic_on_add: Option<String>,
}

/// In-memory directory keyed by computer name.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<FakeState>,
    delay: Option<Duration>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_computer(self, name: &str, groups: &[&str], ou: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .groups
                .insert(name.to_string(), groups.iter().map(|g| g.to_string()).collect());
            state.ous.insert(name.to_string(), ou.to_string());
        }
        self
    }

    pub fn with_groups(self, groups: &[&str]) -> Self {
        self.state.lock().unwrap().known_groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_lookups(self) -> Self {
        self.state.lock().unwrap().fail_lookups = true;
        self
    }

    pub fn failing_snapshot(self) -> Self {
        self.state.lock().unwrap().fail_snapshot = true;
        self
    }

    pub fn failing_remove(self, group: &str) -> Self {
        self.state.lock().unwrap().fail_remove.insert(group.to_string());
        self
    }

    pub fn failing_add(self, group: &str) -> Self {
        self.state.lock().unwrap().fail_add.insert(group.to_string());
        self
    }

    pub fn failing_move(self, computer: &str) -> Self {
        self.state.lock().unwrap().fail_move.insert(computer.to_string());
        self
    }

    pub fn panicking_on_add(self, group: &str) -> Self {
        self.state.lock().unwrap().panic_on_add = Some(group.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn groups_of(&self, computer: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(computer)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ou_of(&self, computer: &str) -> String {
        self.state
            .lock()
            .unwrap()
            .ous
            .get(computer)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn unavailable() -> DirectoryError {
        DirectoryError::ConnectionError("fake directory unavailable".to_string())
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn find_computers(&self, term: &str) -> Result<Vec<String>> {
        self.record(Call::Search(term.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_lookups {
            return Err(Self::unavailable());
        }
        let needle = term.to_lowercase();
        let mut names: Vec<String> = state
            .groups
            .keys()
            .filter(|name| name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn find_groups(&self, term: &str) -> Result<Vec<String>> {
        self.record(Call::Search(term.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_lookups {
            return Err(Self::unavailable());
        }
        let needle = term.to_lowercase();
        let mut names: Vec<String> = state
            .known_groups
            .iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn find_organizational_units(&self, term: &str) -> Result<Vec<String>> {
        self.record(Call::Search(term.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_lookups {
            return Err(Self::unavailable());
        }
        let needle = term.to_lowercase();
        let mut ous: Vec<String> = state
            .ous
            .values()
            .filter(|ou| ou.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        ous.sort();
        ous.dedup();
        Ok(ous)
    }

    async fn get_group_membership(&self, computer: &str) -> Result<Vec<String>> {
        self.record(Call::Membership(computer.to_string()));
        self.pause().await;
        let state = self.state.lock().unwrap();
        if state.fail_lookups || state.fail_snapshot {
            return Err(Self::unavailable());
        }
        let mut groups = state
            .groups
            .get(computer)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("computer {}", computer)))?;
        groups.sort();
        Ok(groups)
    }

    async fn get_organizational_unit(&self, computer: &str) -> Result<String> {
        self.record(Call::Ou(computer.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_lookups {
            return Err(Self::unavailable());
        }
        state
            .ous
            .get(computer)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("computer {}", computer)))
    }

    async fn get_computer_details(&self, computer: &str) -> Result<ComputerDetails> {
        self.record(Call::Details(computer.to_string()));
        let state = self.state.lock().unwrap();
        let ou = state
            .ous
            .get(computer)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("computer {}", computer)))?;
        Ok(ComputerDetails {
            name: computer.to_string(),
            distinguished_name: format!("CN={},{}", computer, ou),
            ou,
            ou_description: "Lab machines".to_string(),
            description: String::new(),
        })
    }

    async fn add_to_group(&self, computer: &str, group: &str) -> Result<ChangeOutcome> {
        self.record(Call::Add(computer.to_string(), group.to_string()));
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.panic_on_add.as_deref() == Some(group) {
            drop(state);
            panic!("fake directory exploded on {}", group);
        }
        if state.fail_add.contains(group) {
            return Err(DirectoryError::PermissionDenied(format!("cannot add to {}", group)));
        }
        let groups = state.groups.entry(computer.to_string()).or_default();
        if groups.iter().any(|g| g == group) {
            return Ok(ChangeOutcome::AlreadySatisfied);
        }
        groups.push(group.to_string());
        Ok(ChangeOutcome::Applied)
    }

    async fn remove_from_group(&self, computer: &str, group: &str) -> Result<ChangeOutcome> {
        self.record(Call::Remove(computer.to_string(), group.to_string()));
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_remove.contains(group) {
            return Err(DirectoryError::PermissionDenied(format!("cannot remove from {}", group)));
        }
        let groups = state.groups.entry(computer.to_string()).or_default();
        let before = groups.len();
        groups.retain(|g| g != group);
        Ok(if groups.len() < before {
            ChangeOutcome::Applied
        } else {
            ChangeOutcome::AlreadySatisfied
        })
    }

    async fn move_to_ou(&self, computer: &str, target_ou: &str) -> Result<ChangeOutcome> {
        self.record(Call::Move(computer.to_string(), target_ou.to_string()));
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_move.contains(computer) {
            return Err(DirectoryError::PermissionDenied(format!("cannot move {}", computer)));
        }
        let current = state.ous.insert(computer.to_string(), target_ou.to_string());
        Ok(if current.as_deref() == Some(target_ou) {
            ChangeOutcome::AlreadySatisfied
        } else {
            ChangeOutcome::Applied
        })
    }
}

/// Collects audit records in memory.
#[derive(Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
    failing: bool,
}

impl MemoryAudit {
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, record: AuditRecord) -> anyhow::Result<i64> {
        if self.failing {
            anyhow::bail!("audit store is read-only");
        }
        let mut records = self.records.lock().unwrap();
        records.push(record);
        Ok(records.len() as i64)
    }
}

/// Fixed retired-OU setting.
pub struct FixedRetiredOu(pub Option<String>);

#[async_trait]
impl RetiredOuSource for FixedRetiredOu {
    async fn retired_computers_ou(&self) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Settings store that cannot be read.
pub struct FailingRetiredOu;

#[async_trait]
impl RetiredOuSource for FailingRetiredOu {
    async fn retired_computers_ou(&self) -> anyhow::Result<Option<String>> {
        Err(anyhow::anyhow!("database is locked"))
    }
}

pub const LAB_OU: &str = "OU=Lab,OU=Computers,DC=IBK,DC=lan";
pub const RETIRED_OU: &str = "OU=Retired,DC=IBK,DC=lan";
pub const STAGING_OU: &str = "OU=Staging,DC=IBK,DC=lan";

/// Source PC-OLD in the lab OU, target PC-NEW in staging with one stale group.
pub fn standard_directory() -> FakeDirectory {
    FakeDirectory::new()
        .with_computer("PC-OLD", &["Domain Computers", "AppX", "AppZ"], LAB_OU)
        .with_computer(
            "PC-NEW",
            &["Domain Computers", "Domain Users", "OldApp"],
            STAGING_OU,
        )
}

pub fn orchestrator(
    directory: Arc<FakeDirectory>,
    audit: Arc<MemoryAudit>,
    retired_ou: Option<&str>,
) -> CloneOrchestrator {
    CloneOrchestrator::new(
        directory,
        audit,
        Arc::new(FixedRetiredOu(retired_ou.map(str::to_string))),
    )
}

pub fn request(source: &str, target: &str, selected: &[&str], additional: &[&str]) -> CloneRequest {
    CloneRequest {
        source_computer: source.to_string(),
        target_computer: target.to_string(),
        selected_groups: selected.iter().map(|g| g.to_string()).collect(),
        additional_groups: additional.iter().map(|g| g.to_string()).collect(),
        source_computer_ou: LAB_OU.to_string(),
        keep_source_in_place: false,
    }
}
