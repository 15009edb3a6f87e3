//! Row identity.

use crate::database::{ColumnMeta, Database};
use crate::error::{DbError, SchemaIntrospectionError};
use crate::value::{Row, Value};

/// Ordered key columns of one table, with their declared types.
///
/// A table without a declared key is identified by all of its columns, each
/// treated as not nullable. Such a synthetic key can be wide and need not be
/// unique; callers accept that.
#[derive(Debug, Clone)]
pub struct PrimaryKey {
    name: Option<String>,
    columns: Vec<ColumnMeta>,
}

impl PrimaryKey {
    pub fn new(name: Option<String>, columns: Vec<ColumnMeta>) -> Self {
        Self { name, columns }
    }

    /// Read the key of `schema.table` from the catalog
    ///
    /// # Errors
    ///
    /// Returns `SchemaIntrospectionError` if the columns or key constraint
    /// cannot be read, or if the key names a column the table does not have.
    pub fn resolve(db: &dyn Database, schema: &str, table: &str) -> Result<Self, SchemaIntrospectionError> {
        let wrap = |source: DbError| SchemaIntrospectionError {
            schema: schema.to_string(),
            table: table.to_string(),
            source,
        };
        let columns = db.columns(schema, table).map_err(wrap)?;
        match db.primary_key(schema, table).map_err(wrap)? {
            Some(constraint) => {
                let key_columns = constraint
                    .columns
                    .iter()
                    .map(|name| {
                        columns
                            .iter()
                            .find(|c| c.name == *name)
                            .map(|c| c.clone().not_null())
                            .ok_or_else(|| {
                                wrap(DbError::Query(format!("key column {name} is not a column of {table}")))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::new(constraint.name, key_columns))
            }
            None => {
                log::debug!("{schema}.{table} has no primary key, identifying rows by every column");
                Ok(Self::new(None, columns.into_iter().map(ColumnMeta::not_null).collect()))
            }
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Whether the key was synthesized from every column
    pub fn is_synthetic(&self) -> bool {
        self.name.is_none()
    }

    /// The key value vector of `row`, or `None` if the row lacks a key column
    pub fn values_of(&self, row: &Row) -> Option<Vec<Value>> {
        self.columns
            .iter()
            .map(|c| row.get(&c.name).cloned())
            .collect()
    }

    /// Column/value pairs selecting the row with key `values`
    pub fn filter_for(&self, values: &[Value]) -> Vec<(String, Value)> {
        self.columns
            .iter()
            .zip(values)
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect()
    }
}

impl PartialEq for PrimaryKey {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name && a.data_type == b.data_type)
    }
}

impl Eq for PrimaryKey {}
