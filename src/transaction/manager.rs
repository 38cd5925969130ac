// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Transaction, TransactionId};
use crate::connection::{IsolationLevel, TargetTable};
use crate::core::{Color, ColorTransition, Result, SkewError};
use crate::storage::ColorTable;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Owns the table and every in-flight transaction against it
///
/// Validation happens at commit (first committer wins):
/// - REPEATABLE READ aborts when a row it wrote was committed by someone else
///   after its snapshot.
/// - SERIALIZABLE additionally aborts when a row it read was committed by
///   someone else after its snapshot, which is what catches write skew.
///
/// The read check is stricter than PostgreSQL's serializable snapshot
/// isolation: a serializable transaction that wrote no rows is still
/// rejected when a row it read changed under it, where PostgreSQL would
/// usually let it commit. Rerunning the scenario on an all-black table
/// therefore reports a conflict here.
///
/// A std mutex is used so connections can roll back from `Drop`.
pub struct TransactionManager {
    inner: Mutex<ManagerState>,
}

struct ManagerState {
    table: ColorTable,
    commit_seq: u64,
    active: HashMap<TransactionId, Transaction>,
    conflicts: u64,
}

impl ManagerState {
    /// Reason the transaction cannot commit, if any
    fn validate(&self, txn: &Transaction) -> Option<&'static str> {
        let stale = |row: &usize| self.table.last_committed_at(*row) > txn.snapshot();

        match txn.isolation() {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead => txn
                .writes()
                .keys()
                .any(stale)
                .then_some("could not serialize access due to concurrent update"),
            IsolationLevel::Serializable => {
                if txn.writes().keys().any(stale) {
                    Some("could not serialize access due to concurrent update")
                } else if txn.read_set().iter().any(stale) {
                    Some(
                        "could not serialize access due to read/write dependencies among transactions",
                    )
                } else {
                    None
                }
            }
        }
    }
}

impl TransactionManager {
    pub fn new(table: ColorTable) -> Self {
        Self {
            inner: Mutex::new(ManagerState {
                table,
                commit_seq: 0,
                active: HashMap::new(),
                conflicts: 0,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ManagerState>> {
        self.inner
            .lock()
            .map_err(|_| SkewError::Execution("Transaction manager lock poisoned".into()))
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Result<TransactionId> {
        let mut state = self.lock()?;
        let id = TransactionId::new();
        let snapshot = state.commit_seq;
        state.active.insert(id, Transaction::new(id, isolation, snapshot));
        debug!(txn = %id, snapshot, ?isolation, "begin");
        Ok(id)
    }

    /// Scan every row, rewriting those that match `transition`
    pub fn update(
        &self,
        txn_id: TransactionId,
        target: &TargetTable,
        transition: ColorTransition,
    ) -> Result<u64> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        state.table.check_target(target)?;

        let txn = state
            .active
            .get_mut(&txn_id)
            .ok_or_else(|| SkewError::Execution(format!("Transaction {txn_id} not found")))?;
        txn.refresh_snapshot(state.commit_seq);

        let mut affected = 0;
        for row in 0..state.table.len() {
            let current = txn
                .pending_value(row)
                .or_else(|| state.table.visible(row, txn.snapshot()));
            txn.record_read(row)?;
            if current.is_some_and(|value| transition.matches(value)) {
                txn.record_write(row, transition.to)?;
                affected += 1;
            }
        }
        debug!(txn = %txn_id, %transition, affected, "update");
        Ok(affected)
    }

    /// Validate and publish the transaction's writes
    ///
    /// The transaction is finished afterwards either way.
    pub fn commit(&self, txn_id: TransactionId) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let mut txn = state
            .active
            .remove(&txn_id)
            .ok_or_else(|| SkewError::Execution(format!("Transaction {txn_id} not found")))?;

        if let Some(reason) = state.validate(&txn) {
            txn.rollback()?;
            state.conflicts += 1;
            debug!(txn = %txn_id, reason, elapsed = ?txn.duration(), "commit rejected");
            return Err(SkewError::Serialization(reason.to_string()));
        }

        if txn.write_count() > 0 {
            state.commit_seq += 1;
            let seq = state.commit_seq;
            for (&row, &value) in txn.writes() {
                state.table.install(row, value, seq)?;
            }
        }
        txn.commit()?;
        debug!(txn = %txn_id, seq = state.commit_seq, elapsed = ?txn.duration(), "commit");
        Ok(())
    }

    /// Discard the transaction; unknown ids are a no-op
    pub fn rollback(&self, txn_id: TransactionId) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(mut txn) = state.active.remove(&txn_id) {
            txn.rollback()?;
            debug!(txn = %txn_id, elapsed = ?txn.duration(), "rollback");
        }
        Ok(())
    }

    /// Latest committed values
    pub fn select(&self, target: &TargetTable) -> Result<Vec<Color>> {
        let state = self.lock()?;
        state.table.check_target(target)?;
        Ok(state.table.current_values())
    }

    pub fn active_count(&self) -> Result<usize> {
        Ok(self.lock()?.active.len())
    }

    /// Commits rejected by validation so far
    pub fn conflict_count(&self) -> Result<u64> {
        Ok(self.lock()?.conflicts)
    }
}
