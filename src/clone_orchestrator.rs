//! The clone workflow.
//!
//! A clone copies group membership from a source computer to its replacement
//! and optionally moves both objects: the target into the source's OU, the
//! source into the retired-computers OU. The steps run strictly in order:
//!
//! 1. snapshot the target's current groups
//! 2. remove them (system groups excepted), stopping at the first failure
//! 3. resolve the groups to add (selected + additional, remapped, deduplicated)
//! 4. add each group, independently
//! 5. move the target into the source OU, if one was given
//! 6. move the source into the retired OU, unless asked to keep it in place
//!
//! Every attempt ends with exactly one audit record, including validation
//! failures, cancellation and panics inside the workflow.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dashmap::DashMap;

use crate::ad_client::DirectoryClient;
use crate::audit_log::{AuditRecord, AuditSink};
use crate::office_remap::{resolve_groups_to_add, GroupRemapPolicy, OfficeSuiteRemap};
use crate::ou_config::RetiredOuSource;

/// Audit label for clone attempts.
pub const CLONE_OPERATION: &str = "Clone Groups (Enhanced)";

/// Groups never removed from the target.
pub const SYSTEM_GROUPS: [&str; 2] = ["Domain Users", "Domain Computers"];

const REMOVAL_FAILED: &str =
    "Failed to remove existing groups from target computer - operation stopped";
const TARGET_MOVE_FAILED: &str = "Failed to move computer to source OU";
const SOURCE_MOVE_FAILED: &str = "Failed to move source computer to retired OU";
const NO_RETIRED_OU: &str = "No retired OU configured - source not moved";
const SOURCE_KEPT: &str = "Source computer kept in place";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloneRequest {
    pub source_computer: String,
    pub target_computer: String,
    pub selected_groups: Vec<String>,
    pub additional_groups: Vec<String>,
    #[serde(rename = "sourceComputerOU")]
    pub source_computer_ou: String,
    pub keep_source_in_place: bool,
}

/// Result of a clone that ran to completion or stopped on a handled failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneOutcome {
    pub success: bool,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub operations: Vec<String>,
    pub message: String,
}

/// Failures that abort a clone outright.
#[derive(Debug, Error)]
pub enum CloneFault {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CloneFault {
    fn audit_details(&self) -> &'static str {
        match self {
            CloneFault::Cancelled => "Operation cancelled",
            CloneFault::Internal(_) => "Operation failed with exception",
        }
    }
}

/// State accumulated while the workflow runs. Survives a fault so the fault
/// audit can still say what happened.
#[derive(Debug, Default)]
struct CloneProgress {
    success_count: usize,
    error_count: usize,
    errors: Vec<String>,
    operations: Vec<String>,
    groups_removed: usize,
    target_ou: Option<String>,
    // Set when the workflow stops early
    message: Option<String>,
    details: Option<String>,
}

impl CloneProgress {
    fn fail(&mut self, error: impl Into<String>) {
        self.error_count += 1;
        self.errors.push(error.into());
    }

    fn stop(&mut self, error: impl Into<String>, details: &str, message: impl Into<String>) {
        self.fail(error);
        self.details = Some(details.to_string());
        self.message = Some(message.into());
    }

    fn success(&self) -> bool {
        self.error_count == 0
    }

    fn message(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None if self.success() => format!(
                "Successfully completed clone operation! Added {} groups.",
                self.success_count
            ),
            None => format!(
                "Clone completed with {} successes and {} errors",
                self.success_count, self.error_count
            ),
        }
    }

    fn details(&self) -> String {
        match &self.details {
            Some(details) => details.clone(),
            None => format!(
                "Operations: {}. Success: {}, Errors: {}. Groups removed: {}",
                self.operations.join(", "),
                self.success_count,
                self.error_count,
                self.groups_removed
            ),
        }
    }

    fn error_text(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("; "))
    }

    fn into_outcome(self) -> CloneOutcome {
        CloneOutcome {
            success: self.success(),
            message: self.message(),
            success_count: self.success_count,
            error_count: self.error_count,
            errors: self.errors,
            operations: self.operations,
        }
    }
}

pub struct CloneOrchestrator {
    directory: Arc<dyn DirectoryClient>,
    audit: Arc<dyn AuditSink>,
    retired_ou: Arc<dyn RetiredOuSource>,
    remap: Arc<dyn GroupRemapPolicy>,
    target_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl CloneOrchestrator {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        audit: Arc<dyn AuditSink>,
        retired_ou: Arc<dyn RetiredOuSource>,
    ) -> Self {
        Self {
            directory,
            audit,
            retired_ou,
            remap: Arc::new(OfficeSuiteRemap),
            target_locks: DashMap::new(),
        }
    }

    /// Replaces the default Office-suite remapping.
    pub fn with_remap_policy(mut self, policy: Arc<dyn GroupRemapPolicy>) -> Self {
        self.remap = policy;
        self
    }

    /// Runs one clone. `actor` is recorded in the audit trail.
    ///
    /// Directory failures are reported inside the [`CloneOutcome`]; an `Err`
    /// means the run was cancelled or panicked. Audit writes are best-effort.
    pub async fn execute(
        &self,
        request: CloneRequest,
        actor: &str,
        cancel: CancellationToken,
    ) -> Result<CloneOutcome, CloneFault> {
        info!(
            source_computer = %request.source_computer,
            target_computer = %request.target_computer,
            selected = request.selected_groups.len(),
            additional = request.additional_groups.len(),
            keep_source = request.keep_source_in_place,
            user = actor,
            "Starting clone operation"
        );

        let key = request.target_computer.trim().to_lowercase();
        let lock = self
            .target_locks
            .entry(key.clone())
            .or_default()
            .value()
            .clone();

        let mut progress = CloneProgress::default();
        // Clones of the same target run one at a time
        let result = {
            let acquired = tokio::select! {
                guard = lock.lock() => Some(guard),
                _ = cancel.cancelled() => None,
            };
            match acquired {
                None => Err(CloneFault::Cancelled),
                Some(_guard) => {
                    let run = AssertUnwindSafe(self.run(&request, &cancel, &mut progress))
                        .catch_unwind()
                        .await;
                    match run {
                        Ok(result) => result,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            error!(target_computer = %request.target_computer, panic = %message, "Clone workflow panicked");
                            Err(CloneFault::Internal(message))
                        }
                    }
                }
            }
        };
        drop(lock);
        self.target_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        if let Err(fault) = result {
            return Err(self.report_fault(&request, actor, &progress, fault).await);
        }

        let record = self.completion_record(&request, actor, &progress);
        if let Err(e) = self.write_audit(record).await {
            // The directory changes stand; a lost audit record does not undo them
            error!(target_computer = %request.target_computer, error = %e, "Failed to write clone audit record");
        }
        let outcome = progress.into_outcome();

        if outcome.success {
            info!(target_computer = %request.target_computer, added = outcome.success_count, "Clone operation completed");
        } else {
            warn!(
                target_computer = %request.target_computer,
                successes = outcome.success_count,
                errors = outcome.error_count,
                "Clone operation completed with errors"
            );
        }
        Ok(outcome)
    }

    async fn run(
        &self,
        request: &CloneRequest,
        cancel: &CancellationToken,
        progress: &mut CloneProgress,
    ) -> Result<(), CloneFault> {
        let source = request.source_computer.trim();
        let target = request.target_computer.trim();

        let invalid = if target.is_empty() {
            Some("Target computer is required")
        } else if source.is_empty() {
            Some("Source computer is required")
        } else if source.eq_ignore_ascii_case(target) {
            Some("Source and target computer must be different")
        } else {
            None
        };
        if let Some(reason) = invalid {
            warn!(source_computer = source, target_computer = target, "{}", reason);
            progress.stop(reason, "Validation failed", reason);
            return Ok(());
        }

        // Snapshot
        let membership = match guarded(cancel, self.directory.get_group_membership(target)).await? {
            Ok(groups) => groups,
            Err(e) => {
                error!(target_computer = target, error = %e, "Could not read target group membership");
                progress.stop(
                    format!("Failed to read current groups of target computer: {}", e),
                    "Group snapshot failed",
                    "Operation failed while reading target computer groups",
                );
                return Ok(());
            }
        };

        // Bulk removal, stop at the first failure
        let to_remove: Vec<String> = membership
            .into_iter()
            .filter(|group| !SYSTEM_GROUPS.contains(&group.as_str()))
            .collect();
        for group in &to_remove {
            if let Err(e) = guarded(cancel, self.directory.remove_from_group(target, group)).await? {
                error!(target_computer = target, group = %group, error = %e, "Group removal failed, stopping");
                if progress.groups_removed > 0 {
                    progress.operations.push(format!(
                        "Removed {} of {} existing groups before failure",
                        progress.groups_removed,
                        to_remove.len()
                    ));
                }
                progress.stop(
                    REMOVAL_FAILED,
                    "Group removal failed",
                    "Operation failed during group removal",
                );
                return Ok(());
            }
            progress.groups_removed += 1;
        }
        progress.operations.push(if to_remove.is_empty() {
            "No existing groups to remove".to_string()
        } else {
            format!("Removed {} existing groups", to_remove.len())
        });

        // Additions are independent of each other
        let to_add = resolve_groups_to_add(
            &request.selected_groups,
            &request.additional_groups,
            target,
            self.remap.as_ref(),
        );
        let mut added = 0;
        for group in &to_add {
            match guarded(cancel, self.directory.add_to_group(target, group)).await? {
                Ok(_) => {
                    added += 1;
                    progress.success_count += 1;
                }
                Err(e) => {
                    warn!(target_computer = target, group = %group, error = %e, "Failed to add group");
                    progress.fail(format!("Failed to add to group: {}", group));
                }
            }
        }
        if !to_add.is_empty() {
            progress
                .operations
                .push(format!("Added {} of {} groups", added, to_add.len()));
        }

        // Target takes over the source's OU
        let source_ou = request.source_computer_ou.trim();
        if !source_ou.is_empty() {
            match guarded(cancel, self.directory.move_to_ou(target, source_ou)).await? {
                Ok(_) => {
                    progress
                        .operations
                        .push(format!("Moved target computer to {}", source_ou));
                    progress.target_ou = Some(source_ou.to_string());
                }
                Err(e) => {
                    warn!(target_computer = target, ou = source_ou, error = %e, "Failed to move target computer");
                    progress.fail(TARGET_MOVE_FAILED);
                }
            }
        }

        // Source is retired unless the caller keeps it
        if request.keep_source_in_place {
            progress.operations.push(SOURCE_KEPT.to_string());
            return Ok(());
        }

        let retired_ou = match guarded(cancel, self.retired_ou.retired_computers_ou()).await? {
            Ok(ou) => ou.map(|ou| ou.trim().to_string()).filter(|ou| !ou.is_empty()),
            Err(e) => {
                warn!(source_computer = source, error = %e, "Failed to read retired OU setting");
                progress.fail(format!("Failed to read retired OU setting: {}", e));
                progress.operations.push(NO_RETIRED_OU.to_string());
                return Ok(());
            }
        };

        match retired_ou {
            None => progress.operations.push(NO_RETIRED_OU.to_string()),
            Some(ou) => match guarded(cancel, self.directory.move_to_ou(source, &ou)).await? {
                Ok(_) => progress
                    .operations
                    .push(format!("Moved source computer to retired OU {}", ou)),
                Err(e) => {
                    warn!(source_computer = source, ou = %ou, error = %e, "Failed to retire source computer");
                    progress.fail(SOURCE_MOVE_FAILED);
                }
            },
        }

        Ok(())
    }

    fn completion_record(
        &self,
        request: &CloneRequest,
        actor: &str,
        progress: &CloneProgress,
    ) -> AuditRecord {
        AuditRecord::new(
            CLONE_OPERATION,
            request.source_computer.trim(),
            request.target_computer.trim(),
            Some(actor),
        )
        .with_groups(&request.selected_groups, &request.additional_groups)
        .with_result(progress.success(), progress.error_text())
        .with_details(progress.details())
        .with_ous(
            Some(request.source_computer_ou.trim().to_string()),
            progress.target_ou.clone(),
        )
    }

    /// Audits a fault and hands it back. If the audit write fails too, that
    /// failure is only logged.
    async fn report_fault(
        &self,
        request: &CloneRequest,
        actor: &str,
        progress: &CloneProgress,
        fault: CloneFault,
    ) -> CloneFault {
        error!(target_computer = %request.target_computer, error = %fault, "Clone operation failed");

        let record = AuditRecord::new(
            CLONE_OPERATION,
            request.source_computer.trim(),
            request.target_computer.trim(),
            Some(actor),
        )
        .with_groups(&request.selected_groups, &request.additional_groups)
        .with_result(false, Some(fault.to_string()))
        .with_details(fault.audit_details())
        .with_ous(
            Some(request.source_computer_ou.trim().to_string()),
            progress.target_ou.clone(),
        );

        if let Err(e) = self.write_audit(record).await {
            error!(error = %e, primary = %fault, "Failed to audit failed clone operation");
        }
        fault
    }

    async fn write_audit(&self, record: AuditRecord) -> anyhow::Result<i64> {
        let sink = Arc::clone(&self.audit);
        tokio::task::spawn_blocking(move || sink.record(record)).await?
    }
}

/// Runs one directory call unless cancelled first, and abandons it if
/// cancellation arrives while it is in flight.
async fn guarded<T, E, F>(cancel: &CancellationToken, call: F) -> Result<Result<T, E>, CloneFault>
where
    F: Future<Output = Result<T, E>>,
{
    if cancel.is_cancelled() {
        return Err(CloneFault::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CloneFault::Cancelled),
        result = call => Ok(result),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
