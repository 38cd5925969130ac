pub mod config;
pub mod memory;
pub mod postgres;
pub mod scripted;

use crate::core::{Color, ColorTransition, Result, validate_identifier};
use async_trait::async_trait;
use serde::Serialize;

/// Transaction isolation level requested at `BEGIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Statement that opens a transaction at this level
    pub fn begin_statement(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "BEGIN ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Table and column the color updates are aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    table: String,
    column: String,
}

impl TargetTable {
    pub fn new(table: &str, column: &str) -> Result<Self> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        Ok(Self {
            table: table.to_string(),
            column: column.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn update_statement(&self, transition: ColorTransition) -> Result<String> {
        transition.update_statement(&self.table, &self.column)
    }

    pub fn select_statement(&self) -> String {
        format!("SELECT {} FROM {}", self.column, self.table)
    }
}

impl Default for TargetTable {
    fn default() -> Self {
        Self {
            table: "colors".to_string(),
            column: "color".to_string(),
        }
    }
}

/// A scoped database session
///
/// Dropping a connection releases it. A transaction still open at that point
/// is rolled back, never committed.
#[async_trait]
pub trait Connection: Send {
    /// Open a transaction at the given isolation level
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()>;

    /// Apply `transition` to every matching row, returning the affected count
    async fn update_colors(
        &mut self,
        target: &TargetTable,
        transition: ColorTransition,
    ) -> Result<u64>;

    /// Commit the open transaction
    ///
    /// The transaction is over afterwards whether or not the commit succeeded.
    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Read every row's color, outside of any explicit transaction
    async fn select_colors(&mut self, target: &TargetTable) -> Result<Vec<Color>>;

    fn is_in_transaction(&self) -> bool;
}

/// Hands out fresh connections
///
/// This is the seam that lets the retry logic run against a live server, the
/// in-process engine, or a scripted fake.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Short label used in logs
    fn name(&self) -> &str;
}
