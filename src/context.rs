//! Run-scoped state shared by the engine and the strategies.
//!
//! Holds the three endpoints, catalog caches for the source schema, the
//! retention ledger and the process-wide randomness (shuffled alphabets and a
//! single RNG). Everything is single-threaded, so caches use `RefCell`.

use crate::database::{resolve_name, ColumnMeta, Database};
use crate::error::{DbError, SchemaIntrospectionError, StrategyError};
use crate::model::{PrimaryKey, TableField};
use crate::pseudonym::ShufflePools;
use crate::retention::RetentionLedger;
use crate::value::Row;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::sync::Arc;

/// The three databases of a run
#[derive(Clone, Copy)]
pub struct Endpoints<'a> {
    /// Read only
    pub source: &'a dyn Database,
    /// Truncated and loaded
    pub destination: &'a dyn Database,
    /// Pseudonym and retention tables
    pub transformation: &'a dyn Database,
}

/// Catalog name and columns of a source table
#[derive(Debug, Clone)]
pub struct TableShape {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableShape {
    /// Column by name, ignoring case
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

pub struct RunContext<'a> {
    schema: String,
    endpoints: Endpoints<'a>,
    source_tables: RefCell<Option<Vec<String>>>,
    shapes: RefCell<HashMap<String, Arc<TableShape>>>,
    keys: RefCell<HashMap<String, Arc<PrimaryKey>>>,
    retention: RetentionLedger,
    pools: ShufflePools,
    rng: RefCell<StdRng>,
}

impl<'a> RunContext<'a> {
    /// Create the context; with a `seed` every random choice is reproducible.
    pub fn new(schema: impl Into<String>, endpoints: Endpoints<'a>, seed: Option<u64>) -> Self {
        let schema = schema.into();
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pools = ShufflePools::new(&mut rng);
        let retention = RetentionLedger::open(endpoints.transformation, &schema);
        Self {
            schema,
            endpoints,
            source_tables: RefCell::new(None),
            shapes: RefCell::new(HashMap::new()),
            keys: RefCell::new(HashMap::new()),
            retention,
            pools,
            rng: RefCell::new(rng),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn source(&self) -> &'a dyn Database {
        self.endpoints.source
    }

    pub fn destination(&self) -> &'a dyn Database {
        self.endpoints.destination
    }

    pub fn transformation(&self) -> &'a dyn Database {
        self.endpoints.transformation
    }

    pub fn pools(&self) -> &ShufflePools {
        &self.pools
    }

    /// The run's RNG. Do not hold the guard across calls back into the context.
    pub fn rng(&self) -> RefMut<'_, StdRng> {
        self.rng.borrow_mut()
    }

    pub fn retention(&self) -> &RetentionLedger {
        &self.retention
    }

    fn introspection(&self, table: &str, source: DbError) -> SchemaIntrospectionError {
        SchemaIntrospectionError {
            schema: self.schema.clone(),
            table: table.to_string(),
            source,
        }
    }

    /// Catalog spelling of a source table name
    ///
    /// # Errors
    ///
    /// Returns `SchemaIntrospectionError` if the catalog cannot be read or the
    /// table does not exist.
    pub fn resolve_table(&self, table: &str) -> Result<String, SchemaIntrospectionError> {
        if self.source_tables.borrow().is_none() {
            let names = self
                .source()
                .table_names(&self.schema)
                .map_err(|e| self.introspection(table, e))?;
            *self.source_tables.borrow_mut() = Some(names);
        }
        let tables = self.source_tables.borrow();
        tables
            .as_deref()
            .and_then(|names| resolve_name(names, table))
            .map(str::to_string)
            .ok_or_else(|| self.introspection(table, DbError::TableNotFound(table.to_string())))
    }

    /// Columns of a source table, cached for the run
    ///
    /// # Errors
    ///
    /// Returns `SchemaIntrospectionError` if the table cannot be resolved or read.
    pub fn table_shape(&self, table: &str) -> Result<Arc<TableShape>, SchemaIntrospectionError> {
        let cache_key = table.to_uppercase();
        if let Some(shape) = self.shapes.borrow().get(&cache_key) {
            return Ok(Arc::clone(shape));
        }
        let name = self.resolve_table(table)?;
        let columns = self
            .source()
            .columns(&self.schema, &name)
            .map_err(|e| self.introspection(&name, e))?;
        let shape = Arc::new(TableShape { name, columns });
        self.shapes.borrow_mut().insert(cache_key, Arc::clone(&shape));
        Ok(shape)
    }

    /// Source metadata of the column a site designates
    ///
    /// # Errors
    ///
    /// Returns `SchemaIntrospectionError` if the table cannot be read or has
    /// no such column.
    pub fn column_of(&self, field: &TableField) -> Result<(Arc<TableShape>, ColumnMeta), SchemaIntrospectionError> {
        let shape = self.table_shape(field.table())?;
        let column = field.column().unwrap_or_default();
        let meta = shape.column(column).cloned().ok_or_else(|| {
            self.introspection(
                &shape.name,
                DbError::Query(format!("column {column} does not exist in {}", shape.name)),
            )
        })?;
        Ok((shape, meta))
    }

    /// Primary key of a source table, cached for the run
    ///
    /// # Errors
    ///
    /// Returns `SchemaIntrospectionError` if the key cannot be read.
    pub fn primary_key(&self, table: &str) -> Result<Arc<PrimaryKey>, SchemaIntrospectionError> {
        let cache_key = table.to_uppercase();
        if let Some(key) = self.keys.borrow().get(&cache_key) {
            return Ok(Arc::clone(key));
        }
        let name = self.resolve_table(table)?;
        let key = Arc::new(PrimaryKey::resolve(self.source(), &self.schema, &name)?);
        self.keys.borrow_mut().insert(cache_key, Arc::clone(&key));
        Ok(key)
    }

    /// Whether `row` carries a retention mark
    ///
    /// # Errors
    ///
    /// Returns `KeyFetchFailed` if the row's key is unknown and
    /// `RetentionLookupFailed` if the retention table cannot be queried.
    pub fn is_retained(&self, row: &Row) -> Result<bool, StrategyError> {
        if !self.retention.has_marks_for(row.table()) {
            return Ok(false);
        }
        let key = self.primary_key(row.table())?;
        self.retention
            .should_retain(self.transformation(), &key, row)
            .map_err(|source| StrategyError::RetentionLookupFailed {
                table: row.table().to_string(),
                source,
            })
    }

    /// Write a retention mark for `row`
    ///
    /// # Errors
    ///
    /// Returns `KeyFetchFailed` if the row's key is unknown and
    /// `RetentionMarkFailed` if the mark cannot be written.
    pub fn retain(&self, row: &Row) -> Result<(), StrategyError> {
        let key = self.primary_key(row.table())?;
        self.retention.retain(self.transformation(), &key, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::value::Value;

    fn source() -> MemoryDatabase {
        MemoryDatabase::new().with_table(
            "public",
            "visitor",
            vec![ColumnMeta::new("id", "integer"), ColumnMeta::new("surname", "text")],
            &["id"],
        )
    }

    #[test]
    fn test_resolves_names_case_insensitively() {
        let (src, dst, tr) = (source(), MemoryDatabase::new(), MemoryDatabase::new());
        let ctx = RunContext::new(
            "public",
            Endpoints { source: &src, destination: &dst, transformation: &tr },
            Some(1),
        );
        assert_eq!(ctx.resolve_table("VISITOR").unwrap(), "visitor");
        let (shape, meta) = ctx
            .column_of(&TableField::new("public", "VISITOR", Some("SURNAME")))
            .unwrap();
        assert_eq!(shape.name, "visitor");
        assert_eq!(meta.name, "surname");
        assert_eq!(ctx.primary_key("Visitor").unwrap().column_names(), vec!["id".to_string()]);
        assert!(ctx.resolve_table("ORDERS").is_err());
        assert!(ctx
            .column_of(&TableField::new("public", "VISITOR", Some("SHOE_SIZE")))
            .is_err());
    }

    #[test]
    fn test_retain_round_trip() {
        let (src, dst, tr) = (source(), MemoryDatabase::new(), MemoryDatabase::new());
        let ctx = RunContext::new(
            "public",
            Endpoints { source: &src, destination: &dst, transformation: &tr },
            None,
        );
        let columns: Arc<[String]> = vec!["id".to_string(), "surname".to_string()].into();
        let row = Row::new(Arc::from("visitor"), columns, vec![Value::Int(3), "x".into()]);
        assert!(!ctx.is_retained(&row).unwrap());
        ctx.retain(&row).unwrap();
        assert!(ctx.is_retained(&row).unwrap());
        assert!(tr.has_table("public", "VISITOR_RETAINED"));
    }

    #[test]
    fn test_seeded_pools_are_reproducible() {
        let (src, dst, tr) = (source(), MemoryDatabase::new(), MemoryDatabase::new());
        let endpoints = Endpoints { source: &src, destination: &dst, transformation: &tr };
        let a = RunContext::new("public", endpoints, Some(5));
        let b = RunContext::new("public", endpoints, Some(5));
        assert_eq!(a.pools().alphanumeric(), b.pools().alphanumeric());
    }
}
