// ============================================================================
// Conflict Retry
// ============================================================================
//
// `TransactionRunner` performs one self-contained serializable update and
// reports success or failure without raising. `ConflictRetryDriver` stages
// the nested outer/inner scenario, catches the resulting serialization
// failure and re-runs the outer update through the runner, at most
// `RetryPolicy::max_retries` times.
//
// ============================================================================

pub mod driver;
pub mod policy;
pub mod runner;

pub use driver::{ConflictRetryDriver, DriverReport, DriverState};
pub use policy::RetryPolicy;
pub use runner::{AttemptOutcome, TransactionRunner, run_in_transaction};
