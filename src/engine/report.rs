//! Counters collected while a run progresses.

use serde::Serialize;

/// Outcome of one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    /// Source rows streamed
    pub rows_read: u64,
    /// Destination rows inserted, after expansion
    pub rows_written: u64,
    pub deleted_by_rule: u64,
    pub deleted_by_cascade: u64,
    /// Deletions overridden because the row was retained
    pub retention_overrides: u64,
    /// Rows skipped after a row-local error
    pub failed_rows: u64,
    /// Batches lost to an insert error
    pub failed_batches: u64,
}

impl TableReport {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn deleted(&self) -> u64 {
        self.deleted_by_rule + self.deleted_by_cascade
    }
}

/// Outcome of a run: one entry per table in processing order plus the
/// strategies' summary lines
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
    pub summaries: Vec<String>,
    pub elapsed_seconds: f64,
}

impl RunReport {
    /// Report of `table`, ignoring case
    pub fn table(&self, table: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table.eq_ignore_ascii_case(table))
    }

    pub fn rows_written(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_written).sum()
    }

    pub fn failed_batches(&self) -> u64 {
        self.tables.iter().map(|t| t.failed_batches).sum()
    }
}
