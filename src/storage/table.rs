use crate::connection::TargetTable;
use crate::core::{Color, Result, SkewError};
use serde::Serialize;

/// One committed value of a row and the commit sequence that installed it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowVersion {
    pub value: Color,
    pub committed_at: u64,
}

/// Multi-versioned single-column table
///
/// Rows are never inserted or deleted after construction; every update
/// appends a version to the row's history.
#[derive(Debug, Clone)]
pub struct ColorTable {
    target: TargetTable,
    rows: Vec<Vec<RowVersion>>,
}

impl ColorTable {
    /// Seed the table; seed rows are committed at sequence 0
    pub fn new(target: TargetTable, seed: &[Color]) -> Self {
        let rows = seed
            .iter()
            .map(|&value| {
                vec![RowVersion {
                    value,
                    committed_at: 0,
                }]
            })
            .collect();
        Self { target, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fail the way a server does when a statement names an unknown relation
    pub fn check_target(&self, target: &TargetTable) -> Result<()> {
        if target.table() != self.target.table() {
            return Err(SkewError::Execution(format!(
                "relation \"{}\" does not exist",
                target.table()
            )));
        }
        if target.column() != self.target.column() {
            return Err(SkewError::Execution(format!(
                "column \"{}\" does not exist",
                target.column()
            )));
        }
        Ok(())
    }

    /// Value of `row` as seen by a snapshot taken at commit sequence `snapshot`
    pub fn visible(&self, row: usize, snapshot: u64) -> Option<Color> {
        self.rows
            .get(row)?
            .iter()
            .rev()
            .find(|version| version.committed_at <= snapshot)
            .map(|version| version.value)
    }

    /// Sequence of the most recent commit that touched `row`
    pub fn last_committed_at(&self, row: usize) -> u64 {
        self.rows
            .get(row)
            .and_then(|versions| versions.last())
            .map_or(0, |version| version.committed_at)
    }

    pub fn install(&mut self, row: usize, value: Color, committed_at: u64) -> Result<()> {
        let versions = self
            .rows
            .get_mut(row)
            .ok_or_else(|| SkewError::Execution(format!("Row {row} out of range")))?;
        versions.push(RowVersion {
            value,
            committed_at,
        });
        Ok(())
    }

    /// Latest committed value of every row
    pub fn current_values(&self) -> Vec<Color> {
        self.rows
            .iter()
            .filter_map(|versions| versions.last().map(|version| version.value))
            .collect()
    }
}
