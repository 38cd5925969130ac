// ============================================================================
// colorskew Library
// ============================================================================
//
// Forces a serialization failure between two SERIALIZABLE transactions and
// recovers from it with a bounded retry loop.
//
// ============================================================================

pub mod connection;
pub mod core;
pub mod retry;
pub mod storage;
pub mod transaction;

pub use crate::core::{Color, ColorTransition, Result, SkewError};
pub use connection::{
    Connection, ConnectionProvider, IsolationLevel, TargetTable,
    config::ConnectionConfig,
    memory::MemoryProvider,
    postgres::PostgresProvider,
    scripted::{ScriptEvent, ScriptStep, ScriptedProvider},
};
pub use retry::{
    AttemptOutcome, ConflictRetryDriver, DriverReport, DriverState, RetryPolicy,
    TransactionRunner, run_in_transaction,
};
