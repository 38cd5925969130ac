// ============================================================================
// In-Memory Backend
// ============================================================================
//
// Runs the color table inside the process so the conflict scenario can be
// replayed without a server. All connections handed out by one provider
// share the same `TransactionManager`.
//
// ============================================================================

use super::{Connection, ConnectionProvider, IsolationLevel, TargetTable};
use crate::core::{Color, ColorTransition, Result, SkewError};
use crate::storage::ColorTable;
use crate::transaction::{TransactionId, TransactionManager};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rows seeded by [`MemoryProvider::write_skew`]: one of each color, the
/// smallest table on which the two opposite updates can skew
pub const WRITE_SKEW_SEED: [Color; 2] = [Color::White, Color::Black];

pub struct MemoryProvider {
    manager: Arc<TransactionManager>,
    connections_opened: AtomicU64,
}

impl MemoryProvider {
    pub fn new(target: TargetTable, seed: &[Color]) -> Self {
        Self {
            manager: Arc::new(TransactionManager::new(ColorTable::new(target, seed))),
            connections_opened: AtomicU64::new(0),
        }
    }

    pub fn write_skew(target: TargetTable) -> Self {
        Self::new(target, &WRITE_SKEW_SEED)
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::SeqCst)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::write_skew(TargetTable::default())
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            manager: Arc::clone(&self.manager),
            txn: None,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

pub struct MemoryConnection {
    manager: Arc<TransactionManager>,
    txn: Option<TransactionId>,
}

impl MemoryConnection {
    fn current(&self) -> Result<TransactionId> {
        self.txn
            .ok_or_else(|| SkewError::Execution("No active transaction".into()))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.txn.is_some() {
            return Err(SkewError::Execution("Transaction already active".into()));
        }
        self.txn = Some(self.manager.begin(isolation)?);
        Ok(())
    }

    async fn update_colors(
        &mut self,
        target: &TargetTable,
        transition: ColorTransition,
    ) -> Result<u64> {
        let txn = self.current()?;
        self.manager.update(txn, target, transition)
    }

    async fn commit(&mut self) -> Result<()> {
        let txn = self.current()?;
        self.txn = None;
        self.manager.commit(txn)
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.txn.take() {
            Some(txn) => self.manager.rollback(txn),
            None => Ok(()),
        }
    }

    async fn select_colors(&mut self, target: &TargetTable) -> Result<Vec<Color>> {
        self.manager.select(target)
    }

    fn is_in_transaction(&self) -> bool {
        self.txn.is_some()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            let _ = self.manager.rollback(txn);
        }
    }
}
