//! Persisted retention marks.
//!
//! A mark is a row of `<TABLE>_RETAINED` in the transformation database
//! holding the key values of a source row. A marked row is never deleted by a
//! rule or by a cascade. Marks are written on demand and survive across runs.

use crate::database::Database;
use crate::error::{DbError, StrategyError};
use crate::model::PrimaryKey;
use crate::value::Row;
use std::cell::RefCell;
use std::collections::HashMap;

const SUFFIX: &str = "_RETAINED";

/// Name of the retention table for `table`
pub fn retention_table_name(table: &str) -> String {
    format!("{}{SUFFIX}", table.to_uppercase())
}

/// The set of retention tables known to exist, keyed by upper-case base table
#[derive(Debug, Default)]
pub struct RetentionLedger {
    schema: String,
    known: RefCell<HashMap<String, String>>,
}

impl RetentionLedger {
    /// Scan `schema` for existing retention tables.
    ///
    /// A failed scan is logged and leaves the ledger empty; marks are then
    /// only honoured once written in this run.
    pub fn open(db: &dyn Database, schema: &str) -> Self {
        let ledger = Self {
            schema: schema.to_string(),
            known: RefCell::new(HashMap::new()),
        };
        match db.table_names(schema) {
            Ok(names) => {
                let mut known = ledger.known.borrow_mut();
                for name in names {
                    let upper = name.to_uppercase();
                    if let Some(base) = upper.strip_suffix(SUFFIX) {
                        if !base.is_empty() {
                            known.insert(base.to_string(), name);
                        }
                    }
                }
                log::debug!("{} retention tables found in {schema}", known.len());
            }
            Err(e) => log::warn!("cannot scan {schema} for retention tables: {e}"),
        }
        ledger
    }

    /// Whether any row of `table` may be retained
    pub fn has_marks_for(&self, table: &str) -> bool {
        self.known.borrow().contains_key(&table.to_uppercase())
    }

    /// Whether `row` carries a retention mark
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the retention table cannot be queried.
    pub fn should_retain(&self, db: &dyn Database, key: &PrimaryKey, row: &Row) -> Result<bool, DbError> {
        let Some(table) = self.known.borrow().get(&row.table().to_uppercase()).cloned() else {
            return Ok(false);
        };
        let Some(values) = key.values_of(row) else {
            return Ok(false);
        };
        let found = db.find_rows(&self.schema, &table, &key.column_names(), &key.filter_for(&values))?;
        Ok(!found.is_empty())
    }

    /// Mark `row` as retained, creating the retention table on first use.
    /// Marking a row twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StrategyError::RetentionMarkFailed` if the table cannot be
    /// created or the mark cannot be written.
    pub fn retain(&self, db: &dyn Database, key: &PrimaryKey, row: &Row) -> Result<(), StrategyError> {
        let base = row.table().to_uppercase();
        let failed = |source: DbError| StrategyError::RetentionMarkFailed {
            table: row.table().to_string(),
            source,
        };
        let values = key.values_of(row).ok_or_else(|| {
            failed(DbError::Query(format!("row of {} lacks its key columns", row.table())))
        })?;

        let existing = self.known.borrow().get(&base).cloned();
        let table = match existing {
            Some(table) => table,
            None => {
                let table = retention_table_name(&base);
                db.create_table(&self.schema, &table, key.columns(), &key.column_names())
                    .map_err(failed)?;
                log::info!("created retention table {}.{table}", self.schema);
                self.known.borrow_mut().insert(base, table.clone());
                table
            }
        };

        let columns = key.column_names();
        let present = db
            .find_rows(&self.schema, &table, &columns, &key.filter_for(&values))
            .map_err(failed)?;
        if present.is_empty() {
            db.insert_rows(&self.schema, &table, &columns, &[values])
                .map_err(failed)?;
        }
        Ok(())
    }
}
