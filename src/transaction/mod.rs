// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Snapshot isolation over the in-memory color table, with commit-time
// validation that turns stale reads and lost updates into serialization
// failures the same way a serializable server does.
//
// ============================================================================

pub mod manager;
pub mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionId, TransactionState};
