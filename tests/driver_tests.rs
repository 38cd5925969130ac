/// Conflict-retry driver tests
///
/// Drives the state machine against the scripted provider so every conflict
/// and failure sequence is deterministic.
/// Run with: cargo test --test driver_tests

use colorskew::{
    Color, ConflictRetryDriver, DriverState, RetryPolicy, ScriptEvent, ScriptStep,
    ScriptedProvider, SkewError, TargetTable,
};
use std::sync::Arc;

fn driver(provider: &ScriptedProvider) -> ConflictRetryDriver<ScriptedProvider> {
    ConflictRetryDriver::new(Arc::new(provider.clone()), TargetTable::default())
}

#[tokio::test]
async fn test_outer_conflict_then_retry_resolves() {
    // outer session conflicts on commit, inner commits, first retry commits
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::ConflictOnCommit, ScriptStep::Commit, ScriptStep::Commit],
    );

    let report = driver(&provider).run().await.unwrap();

    assert_eq!(
        report.states,
        vec![
            DriverState::Start,
            DriverState::ConflictDetected,
            DriverState::Resolved
        ]
    );
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.retries, 1);
    assert_eq!(report.rows_affected, 1);
    assert_eq!(provider.rows(), vec![Color::Black]);
    assert_eq!(provider.rejected_commits(), 1);
    assert_eq!(provider.connect_attempts(), 3);
}

#[tokio::test]
async fn test_inner_commits_before_outer_commit_attempt() {
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::ConflictOnCommit, ScriptStep::Commit, ScriptStep::Commit],
    );

    driver(&provider).run().await.unwrap();

    let events = provider.events();
    let position = |wanted: &ScriptEvent| events.iter().position(|e| e == wanted).unwrap();

    let inner_commit = position(&ScriptEvent::Commit { session: 2 });
    let inner_release = position(&ScriptEvent::Release { session: 2 });
    let outer_rejected = position(&ScriptEvent::CommitRejected { session: 1 });
    let retry_connect = position(&ScriptEvent::Connect { session: 3 });

    assert!(inner_commit < outer_rejected);
    assert!(inner_release < outer_rejected);
    assert!(outer_rejected < retry_connect);
}

#[tokio::test]
async fn test_three_failed_retries_abort_without_fourth() {
    // database goes away right after the conflict
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::ConflictOnCommit, ScriptStep::Commit],
    )
    .with_fallback(ScriptStep::Unreachable);

    let err = driver(&provider).run().await.unwrap_err();

    match err {
        SkewError::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, SkewError::Connection(_)));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    // outer + inner + exactly three retries
    assert_eq!(provider.connect_attempts(), 5);
    assert_eq!(provider.rows(), vec![Color::White]);
}

#[tokio::test]
async fn test_success_on_last_allowed_retry() {
    let provider = ScriptedProvider::new(
        &[Color::White],
        [
            ScriptStep::ConflictOnCommit,
            ScriptStep::Commit,
            ScriptStep::ConflictOnCommit,
            ScriptStep::Unreachable,
            ScriptStep::Commit,
        ],
    )
    .with_fallback(ScriptStep::Unreachable);

    let report = driver(&provider).run().await.unwrap();

    assert_eq!(report.retries, 3);
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.final_state(), DriverState::Resolved);
    assert_eq!(provider.connect_attempts(), 5);
    assert_eq!(provider.rows(), vec![Color::Black]);
}

#[tokio::test]
async fn test_retry_budget_is_exact() {
    for max_retries in [1u32, 2, 5] {
        let provider = ScriptedProvider::new(
            &[Color::White],
            [ScriptStep::ConflictOnCommit, ScriptStep::Commit],
        )
        .with_fallback(ScriptStep::ConflictOnCommit);

        let err = driver(&provider)
            .with_policy(RetryPolicy::default().with_max_retries(max_retries))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SkewError::RetryExhausted { attempts, .. } if attempts == max_retries));
        assert_eq!(provider.connect_attempts(), 2 + max_retries as usize);
        // the outer conflict plus one rejection per retry
        assert_eq!(provider.rejected_commits(), 1 + max_retries as usize);
    }
}

#[tokio::test]
async fn test_zero_retries_aborts_after_conflict() {
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::ConflictOnCommit, ScriptStep::Commit],
    );

    let err = driver(&provider)
        .with_policy(RetryPolicy::default().with_max_retries(0))
        .run()
        .await
        .unwrap_err();

    match err {
        SkewError::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 0);
            assert!(last.is_serialization_failure());
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(provider.connect_attempts(), 2);
}

#[tokio::test]
async fn test_setup_failure_is_fatal_and_skips_inner() {
    let provider = ScriptedProvider::new(&[Color::White], [ScriptStep::Unreachable]);

    let err = driver(&provider).run().await.unwrap_err();

    assert!(matches!(err, SkewError::Connection(_)));
    assert!(err.is_fatal());
    assert_eq!(provider.connect_attempts(), 1);
    assert_eq!(provider.events(), vec![ScriptEvent::ConnectRefused { session: 1 }]);
}

#[tokio::test]
async fn test_inner_setup_failure_rolls_back_outer() {
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::Commit, ScriptStep::Unreachable],
    );

    let err = driver(&provider).run().await.unwrap_err();

    assert!(matches!(err, SkewError::Connection(_)));
    assert!(provider.events().contains(&ScriptEvent::Rollback { session: 1 }));
    assert_eq!(provider.commits(), 0);
    assert_eq!(provider.rows(), vec![Color::White]);
}

#[tokio::test]
async fn test_inner_conflict_is_relabelled_and_not_retried() {
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::Commit, ScriptStep::ConflictOnCommit],
    );

    let err = driver(&provider).run().await.unwrap_err();

    // must not look like the outer conflict, or the driver would retry it
    match err {
        SkewError::Execution(msg) => assert!(msg.starts_with("inner transaction failed")),
        other => panic!("expected Execution, got {other:?}"),
    }
    assert!(!retry_session_opened(&provider));
    assert_eq!(provider.connect_attempts(), 2);
    assert!(provider.events().contains(&ScriptEvent::Rollback { session: 1 }));
    assert_eq!(provider.commits(), 0);
    assert_eq!(provider.rows(), vec![Color::White]);
}

#[tokio::test]
async fn test_inner_update_failure_rolls_back_outer() {
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::Commit, ScriptStep::FailOnUpdate],
    );

    let err = driver(&provider).run().await.unwrap_err();

    assert!(matches!(err, SkewError::Execution(_)));
    assert!(!err.is_serialization_failure());
    assert_eq!(provider.connect_attempts(), 2);
    assert!(provider.events().contains(&ScriptEvent::Rollback { session: 1 }));
    assert_eq!(provider.rows(), vec![Color::White]);
}

fn retry_session_opened(provider: &ScriptedProvider) -> bool {
    provider
        .events()
        .iter()
        .any(|event| matches!(event, ScriptEvent::Connect { session } if *session > 2))
}

#[tokio::test]
async fn test_outer_non_conflict_error_is_not_retried() {
    let provider = ScriptedProvider::new(&[Color::White], [ScriptStep::FailOnUpdate]);

    let err = driver(&provider).run().await.unwrap_err();

    assert!(matches!(err, SkewError::Execution(_)));
    assert_eq!(provider.connect_attempts(), 1);
}

#[tokio::test]
async fn test_outer_commit_accepted_skips_retry() {
    let provider = ScriptedProvider::new(&[Color::White], []);

    let report = driver(&provider).run().await.unwrap();

    assert_eq!(report.states, vec![DriverState::Start, DriverState::Resolved]);
    assert_eq!(report.conflicts, 0);
    assert_eq!(report.retries, 0);
    assert_eq!(provider.connect_attempts(), 2);
    assert_eq!(provider.rows(), vec![Color::Black]);
}

#[tokio::test]
async fn test_final_state_is_last_successful_commit() {
    // however many retries it takes, the row ends where the outer update puts it
    for failures in 0..3 {
        let mut steps = vec![ScriptStep::ConflictOnCommit, ScriptStep::Commit];
        steps.extend(std::iter::repeat_n(ScriptStep::ConflictOnCommit, failures));
        steps.push(ScriptStep::Commit);
        let provider = ScriptedProvider::new(&[Color::White], steps);

        let report = driver(&provider).run().await.unwrap();

        assert_eq!(report.retries as usize, failures + 1);
        assert_eq!(provider.rows(), vec![Color::Black]);
        assert_eq!(provider.commits(), 2);
    }
}

#[tokio::test]
async fn test_backoff_policy_still_bounded() {
    let provider = ScriptedProvider::new(
        &[Color::White],
        [ScriptStep::ConflictOnCommit, ScriptStep::Commit],
    )
    .with_fallback(ScriptStep::Unreachable);

    let err = driver(&provider)
        .with_policy(RetryPolicy::default().with_backoff(1, 2))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SkewError::RetryExhausted { attempts: 3, .. }));
    assert_eq!(provider.connect_attempts(), 5);
}
