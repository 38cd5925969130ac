use super::policy::RetryPolicy;
use super::runner::{AttemptOutcome, TransactionRunner, rollback_quietly, run_in_transaction};
use crate::connection::{ConnectionProvider, IsolationLevel, TargetTable};
use crate::core::{ColorTransition, Result, SkewError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Driver state machine
///
/// ```text
/// Start ──outer commit rejected──> ConflictDetected ──retry commits──> Resolved
///   │                                     │
///   └──outer commit accepted──> Resolved  └──budget exhausted──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Start,
    ConflictDetected,
    Resolved,
    Aborted,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverState::Resolved | DriverState::Aborted)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DriverState::Start => "START",
            DriverState::ConflictDetected => "CONFLICT_DETECTED",
            DriverState::Resolved => "RESOLVED",
            DriverState::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}

/// What a driver run went through
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    /// Every state visited, in order, starting with `Start`.
    pub states: Vec<DriverState>,
    /// Serialization failures seen on the outer commit.
    pub conflicts: u32,
    /// Runner attempts issued after the conflict.
    pub retries: u32,
    /// Rows changed by the commit that finally went through.
    pub rows_affected: u64,
}

impl DriverReport {
    fn new() -> Self {
        Self {
            states: vec![DriverState::Start],
            conflicts: 0,
            retries: 0,
            rows_affected: 0,
        }
    }

    pub fn final_state(&self) -> DriverState {
        self.states.last().copied().unwrap_or(DriverState::Start)
    }

    fn enter(&mut self, state: DriverState) {
        info!(from = %self.final_state(), to = %state, "driver state change");
        self.states.push(state);
    }
}

/// Stages the nested conflict and recovers from it by bounded retry
///
/// The retry phase re-runs only the outer transition; the inner transaction
/// is never replayed.
pub struct ConflictRetryDriver<P: ?Sized> {
    provider: Arc<P>,
    target: TargetTable,
    transition: ColorTransition,
    policy: RetryPolicy,
}

impl<P: ConnectionProvider + ?Sized> ConflictRetryDriver<P> {
    /// Driver for the `white -> black` outer update on the given table
    pub fn new(provider: Arc<P>, target: TargetTable) -> Self {
        Self {
            provider,
            target,
            transition: ColorTransition::WHITE_TO_BLACK,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_transition(mut self, transition: ColorTransition) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the scenario to a terminal state
    ///
    /// # Errors
    /// - setup failures (the outer or inner connection cannot be acquired)
    ///   are returned as-is, before anything is retried;
    /// - a non-conflict failure of the outer or inner transaction is returned
    ///   as-is;
    /// - running out of retries returns [`SkewError::RetryExhausted`].
    pub async fn run(&self) -> Result<DriverReport> {
        let mut report = DriverReport::new();
        info!(
            backend = self.provider.name(),
            transition = %self.transition,
            max_retries = self.policy.max_retries,
            "starting nested serializable write"
        );

        let conflict = match self.nested_write().await {
            Ok(rows) => {
                info!(rows, "outer transaction committed without conflict");
                report.rows_affected = rows;
                report.enter(DriverState::Resolved);
                return Ok(report);
            }
            Err(err) if err.is_serialization_failure() => err,
            Err(err) => return Err(err),
        };

        warn!(error = %conflict, "outer commit rejected, retrying outer update");
        report.conflicts += 1;
        report.enter(DriverState::ConflictDetected);

        let runner = TransactionRunner::new(
            Arc::clone(&self.provider),
            self.target.clone(),
            self.transition,
        );

        let mut last = conflict;
        for attempt in 1..=self.policy.max_retries {
            if let Some(delay) = self.policy.backoff(attempt) {
                tokio::time::sleep(delay).await;
            }
            report.retries = attempt;
            info!(attempt, "retrying");

            match runner.attempt().await {
                AttemptOutcome::Committed { rows } => {
                    info!(attempt, rows, "retry successful");
                    report.rows_affected = rows;
                    report.enter(DriverState::Resolved);
                    return Ok(report);
                }
                AttemptOutcome::Failed(err) => last = err,
            }
        }

        report.enter(DriverState::Aborted);
        error!(
            attempts = report.retries,
            error = %last,
            "unable to complete serializable transaction"
        );
        Err(SkewError::RetryExhausted {
            attempts: report.retries,
            last: Box::new(last),
        })
    }

    /// Outer update left open while an inner inverse update commits, then the
    /// outer commit
    async fn nested_write(&self) -> Result<u64> {
        let mut outer = self.provider.connect().await?;

        outer.begin(IsolationLevel::Serializable).await?;
        let rows = match outer.update_colors(&self.target, self.transition).await {
            Ok(rows) => rows,
            Err(err) => {
                rollback_quietly(outer.as_mut()).await;
                return Err(err);
            }
        };

        let inner_result = match self.provider.connect().await {
            Ok(mut inner) => {
                run_in_transaction(
                    inner.as_mut(),
                    IsolationLevel::Serializable,
                    &self.target,
                    self.transition.inverse(),
                )
                .await
            }
            Err(err) => Err(err),
        };
        match inner_result {
            Ok(inner_rows) => info!(rows = inner_rows, "inner transaction committed"),
            Err(err) => {
                rollback_quietly(outer.as_mut()).await;
                return Err(match err {
                    SkewError::Serialization(msg) => {
                        SkewError::Execution(format!("inner transaction failed: {msg}"))
                    }
                    other => other,
                });
            }
        }

        outer.commit().await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(DriverState::ConflictDetected.to_string(), "CONFLICT_DETECTED");
        assert!(DriverState::Aborted.is_terminal());
        assert!(!DriverState::Start.is_terminal());
    }

    #[test]
    fn test_report_serializes_states_in_order() {
        let mut report = DriverReport::new();
        report.enter(DriverState::ConflictDetected);
        report.enter(DriverState::Resolved);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["states"],
            serde_json::json!(["start", "conflict_detected", "resolved"])
        );
        assert_eq!(report.final_state(), DriverState::Resolved);
    }
}
