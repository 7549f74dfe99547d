mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::*;
use pc_group_cloning::clone_orchestrator::{CloneFault, CloneOrchestrator, CLONE_OPERATION};
use pc_group_cloning::office_remap::NoRemap;

#[tokio::test]
async fn test_full_clone_scenario() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX", "AppZ"], &["AppY"]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.success_count, 3);
    assert_eq!(outcome.error_count, 0);
    assert!(outcome.errors.is_empty());
    assert_eq!(
        outcome.operations,
        vec![
            "Removed 1 existing groups".to_string(),
            "Added 3 of 3 groups".to_string(),
            format!("Moved target computer to {}", LAB_OU),
            format!("Moved source computer to retired OU {}", RETIRED_OU),
        ]
    );
    assert_eq!(
        outcome.message,
        "Successfully completed clone operation! Added 3 groups."
    );

    assert_eq!(
        directory.groups_of("PC-NEW"),
        vec!["Domain Computers", "Domain Users", "AppX", "AppZ", "AppY"]
    );
    assert_eq!(directory.ou_of("PC-NEW"), LAB_OU);
    assert_eq!(directory.ou_of("PC-OLD"), RETIRED_OU);

    assert_eq!(
        directory.calls(),
        vec![
            Call::Membership("PC-NEW".into()),
            Call::Remove("PC-NEW".into(), "OldApp".into()),
            Call::Add("PC-NEW".into(), "AppX".into()),
            Call::Add("PC-NEW".into(), "AppZ".into()),
            Call::Add("PC-NEW".into(), "AppY".into()),
            Call::Move("PC-NEW".into(), LAB_OU.into()),
            Call::Move("PC-OLD".into(), RETIRED_OU.into()),
        ]
    );

    let records = audit.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.operation, CLONE_OPERATION);
    assert_eq!(record.username, "alice");
    assert!(record.success);
    assert!(record.error_message.is_none());
    assert_eq!(record.groups_cloned, "AppX, AppZ");
    assert_eq!(record.additional_groups, "AppY");
    assert_eq!(record.source_computer_ou.as_deref(), Some(LAB_OU));
    assert_eq!(
        record.details,
        format!(
            "Operations: Removed 1 existing groups, Added 3 of 3 groups, Moved target computer to {}, Moved source computer to retired OU {}. Success: 3, Errors: 0. Groups removed: 1",
            LAB_OU, RETIRED_OU
        )
    );
}

#[tokio::test]
async fn test_system_groups_are_never_removed() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_computer("PC-OLD", &[], LAB_OU)
            .with_computer("PC-NEW", &["Domain Computers", "Domain Users"], STAGING_OU),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.operations[0], "No existing groups to remove");
    assert!(!directory
        .calls()
        .iter()
        .any(|call| matches!(call, Call::Remove(..))));
}

#[tokio::test]
async fn test_removal_failure_stops_everything() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_computer("PC-OLD", &[], LAB_OU)
            .with_computer("PC-NEW", &["AppA", "AppB", "AppC"], STAGING_OU)
            .failing_remove("AppB"),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error_count, 1);
    assert_eq!(
        outcome.errors,
        vec!["Failed to remove existing groups from target computer - operation stopped"]
    );
    assert_eq!(outcome.message, "Operation failed during group removal");
    assert_eq!(
        outcome.operations,
        vec!["Removed 1 of 3 existing groups before failure"]
    );

    assert_eq!(
        directory.calls(),
        vec![
            Call::Membership("PC-NEW".into()),
            Call::Remove("PC-NEW".into(), "AppA".into()),
            Call::Remove("PC-NEW".into(), "AppB".into()),
        ]
    );
    assert_eq!(directory.ou_of("PC-OLD"), LAB_OU);

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].details, "Group removal failed");
}

#[tokio::test]
async fn test_add_failures_are_independent() {
    let directory = Arc::new(standard_directory().failing_add("AppZ"));
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX", "AppZ"], &["AppY"]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.error_count, 1);
    assert_eq!(outcome.errors, vec!["Failed to add to group: AppZ"]);
    assert_eq!(
        outcome.message,
        "Clone completed with 2 successes and 1 errors"
    );
    assert!(outcome
        .operations
        .contains(&"Added 2 of 3 groups".to_string()));

    // Later steps still ran
    assert_eq!(directory.ou_of("PC-NEW"), LAB_OU);
    assert_eq!(directory.ou_of("PC-OLD"), RETIRED_OU);
    assert!(directory.groups_of("PC-NEW").contains(&"AppY".to_string()));

    let records = audit.records();
    assert_eq!(
        records[0].error_message.as_deref(),
        Some("Failed to add to group: AppZ")
    );
    assert!(records[0].details.ends_with("Success: 2, Errors: 1. Groups removed: 1"));
}

#[tokio::test]
async fn test_existing_membership_counts_as_success() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_computer("PC-OLD", &[], LAB_OU)
            .with_computer("PC-NEW", &["Domain Users"], STAGING_OU),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, None);

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["Domain Users", "AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.success_count, 2);
}

#[tokio::test]
async fn test_target_move_failure_is_reported() {
    let directory = Arc::new(standard_directory().failing_move("PC-NEW"));
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.error_count, 1);
    assert_eq!(outcome.errors, vec!["Failed to move computer to source OU"]);
    assert_eq!(directory.ou_of("PC-NEW"), STAGING_OU);
    assert_eq!(directory.ou_of("PC-OLD"), RETIRED_OU);
}

#[tokio::test]
async fn test_source_move_failure_is_reported() {
    let directory = Arc::new(standard_directory().failing_move("PC-OLD"));
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome.errors,
        vec!["Failed to move source computer to retired OU"]
    );
    assert_eq!(outcome.success_count, 1);
}

#[tokio::test]
async fn test_empty_source_ou_skips_target_move() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, Some(RETIRED_OU));

    let mut req = request("PC-OLD", "PC-NEW", &["AppX"], &[]);
    req.source_computer_ou = "  ".to_string();
    let outcome = orchestrator
        .execute(req, "alice", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(!directory
        .calls()
        .contains(&Call::Move("PC-NEW".into(), "  ".into())));
    assert_eq!(directory.ou_of("PC-NEW"), STAGING_OU);
}

#[tokio::test]
async fn test_keep_source_in_place() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, Some(RETIRED_OU));

    let mut req = request("PC-OLD", "PC-NEW", &["AppX"], &[]);
    req.keep_source_in_place = true;
    let outcome = orchestrator
        .execute(req, "alice", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.operations.last().map(String::as_str),
        Some("Source computer kept in place")
    );
    assert!(!directory
        .calls()
        .iter()
        .any(|call| matches!(call, Call::Move(computer, _) if computer == "PC-OLD")));
    assert_eq!(directory.ou_of("PC-OLD"), LAB_OU);
}

#[tokio::test]
async fn test_no_retired_ou_configured() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, None);

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.operations.last().map(String::as_str),
        Some("No retired OU configured - source not moved")
    );
    assert_eq!(directory.ou_of("PC-OLD"), LAB_OU);
}

#[tokio::test]
async fn test_source_equal_to_target_is_rejected() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-NEW", " pc-new ", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error_count, 1);
    assert!(directory.calls().is_empty());

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].details, "Validation failed");
}

#[tokio::test]
async fn test_empty_target_is_rejected() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.errors, vec!["Target computer is required"]);
    assert!(directory.calls().is_empty());
    assert_eq!(audit.records().len(), 1);
}

#[tokio::test]
async fn test_snapshot_failure_is_structural() {
    let directory = Arc::new(standard_directory().failing_snapshot());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error_count, 1);
    assert!(outcome.errors[0].starts_with("Failed to read current groups of target computer"));
    assert_eq!(directory.calls(), vec![Call::Membership("PC-NEW".into())]);
    assert_eq!(audit.records()[0].details, "Group snapshot failed");
}

#[tokio::test]
async fn test_office_groups_remapped_for_targets_with_a() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_computer("PC-OLD", &[], LAB_OU)
            .with_computer("LAB-PC07", &[], STAGING_OU),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, None);

    let outcome = orchestrator
        .execute(
            request(
                "PC-OLD",
                "LAB-PC07",
                &[
                    "LSS-App-Office-Professional-2021-Academic",
                    "LSS-App-Office-Professional-2021-Corporate",
                ],
                &["AppX"],
            ),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(
        directory.groups_of("LAB-PC07"),
        vec!["LSS-App-Office-Professional", "AppX"]
    );
    assert!(outcome.operations.contains(&"Added 2 of 2 groups".to_string()));
}

#[tokio::test]
async fn test_office_groups_kept_without_a() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_computer("PC-OLD", &[], LAB_OU)
            .with_computer("PC-0007", &[], STAGING_OU),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, None);

    orchestrator
        .execute(
            request(
                "PC-OLD",
                "PC-0007",
                &["LSS-App-Office-Standard-2021-Corporate"],
                &[],
            ),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        directory.groups_of("PC-0007"),
        vec!["LSS-App-Office-Standard-2021-Corporate"]
    );
}

#[tokio::test]
async fn test_custom_remap_policy() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_computer("PC-OLD", &[], LAB_OU)
            .with_computer("LAB-01", &[], STAGING_OU),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator =
        orchestrator(directory.clone(), audit, None).with_remap_policy(Arc::new(NoRemap));

    orchestrator
        .execute(
            request("PC-OLD", "LAB-01", &["LSS-App-Office-Standard-2021-Academic"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        directory.groups_of("LAB-01"),
        vec!["LSS-App-Office-Standard-2021-Academic"]
    );
}

#[tokio::test]
async fn test_duplicate_groups_added_once() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, None);

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX", "AppZ"], &["AppZ", "AppX", ""]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.success_count, 2);
    let adds = directory
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Add(..)))
        .count();
    assert_eq!(adds, 2);
}

#[tokio::test]
async fn test_missing_actor_is_recorded_as_unknown() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory, audit.clone(), None);

    orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(audit.records()[0].username, "Unknown");
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = orchestrator
        .execute(request("PC-OLD", "PC-NEW", &["AppX"], &[]), "alice", cancel)
        .await;

    assert!(matches!(result, Err(CloneFault::Cancelled)));
    assert!(directory.calls().is_empty());

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].details, "Operation cancelled");
}

#[tokio::test]
async fn test_cancellation_mid_run_stops_and_audits() {
    let directory = Arc::new(standard_directory().with_delay(Duration::from_millis(500)));
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX", "AppZ", "AppY"], &[]),
            "alice",
            cancel,
        )
        .await;

    assert!(matches!(result, Err(CloneFault::Cancelled)));
    // The snapshot was in flight; nothing after it ran
    assert_eq!(directory.calls(), vec![Call::Membership("PC-NEW".into())]);
    assert_eq!(directory.groups_of("PC-NEW").len(), 3);
    assert_eq!(audit.records().len(), 1);
    assert_eq!(audit.records()[0].details, "Operation cancelled");
}

#[tokio::test]
async fn test_panic_becomes_internal_fault() {
    let directory = Arc::new(standard_directory().panicking_on_add("AppZ"));
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let result = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX", "AppZ"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await;

    match result {
        Err(CloneFault::Internal(message)) => assert!(message.contains("exploded")),
        other => panic!("expected internal fault, got {:?}", other),
    }

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].details, "Operation failed with exception");

    // The target lock was released
    let retry = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await;
    assert!(retry.is_ok());
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_the_clone() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::failing());
    let orchestrator = orchestrator(directory.clone(), audit.clone(), Some(RETIRED_OU));

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(directory.ou_of("PC-OLD"), RETIRED_OU);
    assert!(audit.records().is_empty());
}

#[tokio::test]
async fn test_audit_failure_keeps_the_primary_fault() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::failing());
    let orchestrator = orchestrator(directory.clone(), audit, Some(RETIRED_OU));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = orchestrator
        .execute(request("PC-OLD", "PC-NEW", &["AppX"], &[]), "alice", cancel)
        .await;

    assert!(matches!(result, Err(CloneFault::Cancelled)));
}

#[tokio::test]
async fn test_retired_ou_read_failure_is_reported_in_outcome() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = CloneOrchestrator::new(
        directory.clone(),
        audit.clone(),
        Arc::new(FailingRetiredOu),
    );

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["AppX"], &[]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.error_count, 1);
    assert_eq!(
        outcome.errors,
        vec!["Failed to read retired OU setting: database is locked".to_string()]
    );
    assert_eq!(
        outcome.operations.last().map(String::as_str),
        Some("No retired OU configured - source not moved")
    );

    assert!(directory.groups_of("PC-NEW").contains(&"AppX".to_string()));
    assert_eq!(directory.ou_of("PC-NEW"), LAB_OU);
    assert_eq!(directory.ou_of("PC-OLD"), LAB_OU);

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].details.starts_with("Operations:"));
}

#[tokio::test]
async fn test_same_target_clones_are_serialized() {
    let directory = Arc::new(
        standard_directory()
            .with_computer("PC-OLD-2", &[], LAB_OU)
            .with_delay(Duration::from_millis(20)),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = Arc::new(orchestrator(directory.clone(), audit.clone(), None));

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute(
                    request("PC-OLD", "PC-NEW", &["AppX"], &[]),
                    "alice",
                    CancellationToken::new(),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute(
                    request("PC-OLD-2", "pc-new", &["AppY"], &[]),
                    "bob",
                    CancellationToken::new(),
                )
                .await
        })
    };

    assert!(first.await.unwrap().is_ok());
    second.await.unwrap().ok();

    // Every call of the first run precedes the second run's snapshot
    let calls = directory.calls();
    let first_move = calls
        .iter()
        .position(|call| *call == Call::Move("PC-NEW".into(), LAB_OU.into()))
        .unwrap();
    let second_snapshot = calls
        .iter()
        .position(|call| *call == Call::Membership("pc-new".into()))
        .unwrap();
    assert!(first_move < second_snapshot);
    assert_eq!(audit.records().len(), 2);
}

#[tokio::test]
async fn test_single_group_replacement_without_retired_ou() {
    let floor2 = "OU=Floor2,OU=Workstations,DC=example,DC=com";
    let directory = Arc::new(
        FakeDirectory::new()
            .with_computer("PC-OLD01", &["AppX"], floor2)
            .with_computer(
                "PC-NEW01",
                &["Domain Users", "Domain Computers", "AppY"],
                STAGING_OU,
            ),
    );
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, None);

    let mut req = request("PC-OLD01", "PC-NEW01", &["AppX"], &[]);
    req.source_computer_ou = floor2.to_string();
    let outcome = orchestrator
        .execute(req, "alice", CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.error_count, 0);
    assert_eq!(
        outcome.operations,
        vec![
            "Removed 1 existing groups".to_string(),
            "Added 1 of 1 groups".to_string(),
            format!("Moved target computer to {}", floor2),
            "No retired OU configured - source not moved".to_string(),
        ]
    );
    assert_eq!(
        directory.calls(),
        vec![
            Call::Membership("PC-NEW01".into()),
            Call::Remove("PC-NEW01".into(), "AppY".into()),
            Call::Add("PC-NEW01".into(), "AppX".into()),
            Call::Move("PC-NEW01".into(), floor2.into()),
        ]
    );
}

#[tokio::test]
async fn test_repeated_group_is_added_once() {
    let directory = Arc::new(standard_directory());
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = orchestrator(directory.clone(), audit, None);

    let outcome = orchestrator
        .execute(
            request("PC-OLD", "PC-NEW", &["G1", "G1"], &["G1"]),
            "alice",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.success_count + outcome.error_count, 1);
    let adds: Vec<Call> = directory
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Add(..)))
        .collect();
    assert_eq!(adds, vec![Call::Add("PC-NEW".into(), "G1".into())]);
}
