//! Persisted `OLDVALUE -> NEWVALUE` mapping tables.

use crate::database::{ColumnMeta, Database};
use crate::error::DbError;
use crate::value::Value;
use std::collections::HashMap;

pub const OLD_VALUE: &str = "OLDVALUE";
pub const NEW_VALUE: &str = "NEWVALUE";

/// Rows per insert statement when filling a mapping table.
const INSERT_CHUNK: usize = 5_000;

/// One mapping table in the transformation database.
///
/// Both columns copy the declared type of the mapped column; `OLDVALUE` is the
/// primary key, so every original value has at most one replacement. Entries
/// are only ever appended.
#[derive(Debug, Clone)]
pub struct MappingTable {
    schema: String,
    name: String,
    value_type: ColumnMeta,
}

impl MappingTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, value_type: &ColumnMeta) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            value_type: value_type.renamed(OLD_VALUE),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn columns() -> [String; 2] {
        [OLD_VALUE.to_string(), NEW_VALUE.to_string()]
    }

    /// Create the table unless it exists
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the DDL fails.
    pub fn create(&self, db: &dyn Database) -> Result<(), DbError> {
        let old = self.value_type.clone().not_null();
        let mut new = self.value_type.renamed(NEW_VALUE);
        new.nullable = true;
        db.create_table(&self.schema, &self.name, &[old, new], &[OLD_VALUE.to_string()])
    }

    /// Every mapping in the table
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the table cannot be read.
    pub fn load(&self, db: &dyn Database) -> Result<HashMap<Value, Value>, DbError> {
        let mut map = HashMap::new();
        for row in db.rows(&self.schema, &self.name, &Self::columns())? {
            let mut values = row?.into_values().into_iter();
            if let (Some(old), Some(new)) = (values.next(), values.next()) {
                map.insert(old, new);
            }
        }
        Ok(map)
    }

    /// Replacement for a single value, straight from the table
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the lookup fails.
    pub fn lookup(&self, db: &dyn Database, old: &Value) -> Result<Option<Value>, DbError> {
        let rows = db.find_rows(
            &self.schema,
            &self.name,
            &[NEW_VALUE.to_string()],
            &[(OLD_VALUE.to_string(), old.clone())],
        )?;
        Ok(rows.into_iter().next().and_then(|r| r.into_values().into_iter().next()))
    }

    /// Append new mappings
    ///
    /// # Errors
    ///
    /// Returns `DbError` if any chunk is rejected.
    pub fn insert(&self, db: &dyn Database, pairs: &[(Value, Value)]) -> Result<u64, DbError> {
        let columns = Self::columns();
        let mut inserted = 0;
        for chunk in pairs.chunks(INSERT_CHUNK) {
            let rows: Vec<Vec<Value>> = chunk
                .iter()
                .map(|(old, new)| vec![old.clone(), new.clone()])
                .collect();
            inserted += db.insert_rows(&self.schema, &self.name, &columns, &rows)?;
        }
        Ok(inserted)
    }
}
