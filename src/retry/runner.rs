use crate::connection::{Connection, ConnectionProvider, IsolationLevel, TargetTable};
use crate::core::{ColorTransition, Result, SkewError};
use std::sync::Arc;
use tracing::{debug, warn};

/// `BEGIN`, update, `COMMIT` on an already acquired connection
///
/// Any failure after `BEGIN` rolls the transaction back (best effort) and
/// returns the original error.
pub async fn run_in_transaction(
    conn: &mut dyn Connection,
    isolation: IsolationLevel,
    target: &TargetTable,
    transition: ColorTransition,
) -> Result<u64> {
    conn.begin(isolation).await?;

    let rows = match conn.update_colors(target, transition).await {
        Ok(rows) => rows,
        Err(err) => {
            rollback_quietly(conn).await;
            return Err(err);
        }
    };

    if let Err(err) = conn.commit().await {
        rollback_quietly(conn).await;
        return Err(err);
    }
    Ok(rows)
}

pub(crate) async fn rollback_quietly(conn: &mut dyn Connection) {
    if conn.is_in_transaction() {
        if let Err(err) = conn.rollback().await {
            debug!(error = %err, "rollback after failure also failed");
        }
    }
}

/// Result of one runner attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    Committed { rows: u64 },
    Failed(SkewError),
}

impl AttemptOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, AttemptOutcome::Committed { .. })
    }
}

/// Runs one fixed transition in its own serializable transaction
pub struct TransactionRunner<P: ?Sized> {
    provider: Arc<P>,
    target: TargetTable,
    transition: ColorTransition,
    isolation: IsolationLevel,
}

impl<P: ConnectionProvider + ?Sized> TransactionRunner<P> {
    pub fn new(provider: Arc<P>, target: TargetTable, transition: ColorTransition) -> Self {
        Self {
            provider,
            target,
            transition,
            isolation: IsolationLevel::Serializable,
        }
    }

    /// Acquire a connection, run the update, commit, release
    ///
    /// Never returns an error: every failure, conflicts and unreachable
    /// databases alike, comes back as [`AttemptOutcome::Failed`].
    pub async fn attempt(&self) -> AttemptOutcome {
        match self.try_commit().await {
            Ok(rows) => {
                debug!(transition = %self.transition, rows, "attempt committed");
                AttemptOutcome::Committed { rows }
            }
            Err(err) => {
                warn!(transition = %self.transition, error = %err, "attempt failed");
                AttemptOutcome::Failed(err)
            }
        }
    }

    async fn try_commit(&self) -> Result<u64> {
        let mut conn = self.provider.connect().await?;
        run_in_transaction(conn.as_mut(), self.isolation, &self.target, self.transition).await
    }
}
