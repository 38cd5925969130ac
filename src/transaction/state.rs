// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// A transaction reads the table as of its snapshot sequence and buffers its
// writes privately until commit. The read and write sets are kept so the
// manager can validate the transaction against later commits.
//
// ============================================================================

use crate::connection::IsolationLevel;
use crate::core::{Color, Result, SkewError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    isolation: IsolationLevel,

    /// Commit sequence this transaction reads at
    snapshot: u64,

    /// Rows whose value this transaction looked at
    read_set: BTreeSet<usize>,

    /// Buffered writes, row index -> new value
    writes: BTreeMap<usize, Color>,

    /// When `BEGIN` ran
    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new(id: TransactionId, isolation: IsolationLevel, snapshot: u64) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            isolation,
            snapshot,
            read_set: BTreeSet::new(),
            writes: BTreeMap::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// READ COMMITTED takes a fresh snapshot for every statement
    pub fn refresh_snapshot(&mut self, snapshot: u64) {
        if self.isolation == IsolationLevel::ReadCommitted {
            self.snapshot = snapshot;
        }
    }

    pub fn read_set(&self) -> &BTreeSet<usize> {
        &self.read_set
    }

    pub fn writes(&self) -> &BTreeMap<usize, Color> {
        &self.writes
    }

    /// This transaction's own uncommitted value for `row`, if any
    pub fn pending_value(&self, row: usize) -> Option<Color> {
        self.writes.get(&row).copied()
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Time since `BEGIN`
    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn record_read(&mut self, row: usize) -> Result<()> {
        self.ensure_active("read")?;
        self.read_set.insert(row);
        Ok(())
    }

    pub fn record_write(&mut self, row: usize, value: Color) -> Result<()> {
        self.ensure_active("write")?;
        self.writes.insert(row, value);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted and discard buffered writes
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active("rollback")?;
        self.writes.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if !self.state.is_active() {
            return Err(SkewError::Execution(format!(
                "Cannot {}: transaction {} is already {}",
                action, self.id, self.state
            )));
        }
        Ok(())
    }
}
