//! Database seam.
//!
//! Provides the [`Database`] trait that abstracts every operation the engine
//! performs against its three endpoints (source, destination and the
//! transformation store holding pseudonym and retention tables).
//!
//! Two implementations exist:
//! - [`postgres::PostgresDatabase`] over a `may_postgres` client
//! - [`memory::MemoryDatabase`] (feature `mock`, always available to unit tests)

use crate::error::DbError;
use crate::value::{Row, Value};

#[cfg(any(test, feature = "mock"))]
pub mod memory;
pub mod pg_value;
pub mod postgres;
pub mod type_mapping;

#[cfg(any(test, feature = "mock"))]
pub use memory::MemoryDatabase;
pub use postgres::PostgresDatabase;

/// Coarse classification of a declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Integer,
    Decimal,
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
    Uuid,
    Json,
    Binary,
    Other,
}

impl ColumnKind {
    /// Classify a declared type name as reported by `information_schema.columns.data_type`
    /// or `pg_type.typname`.
    pub fn from_type_name(type_name: &str) -> Self {
        let lower = type_name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "smallint" | "integer" | "bigint" | "int" | "int2" | "int4" | "int8" | "serial"
            | "bigserial" | "smallserial" => ColumnKind::Integer,
            "numeric" | "decimal" => ColumnKind::Decimal,
            "real" | "double precision" | "float" | "float4" | "float8" => ColumnKind::Float,
            "character varying" | "varchar" | "character" | "char" | "bpchar" | "text"
            | "name" | "citext" => ColumnKind::Text,
            "boolean" | "bool" => ColumnKind::Boolean,
            "date" => ColumnKind::Date,
            "uuid" => ColumnKind::Uuid,
            "json" | "jsonb" => ColumnKind::Json,
            "bytea" => ColumnKind::Binary,
            other if other.starts_with("timestamp") => ColumnKind::Timestamp,
            _ => ColumnKind::Other,
        }
    }
}

/// Column metadata as read from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared type name (`character varying`, `integer`, ...)
    pub data_type: String,
    pub max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub nullable: bool,
}

impl ColumnMeta {
    /// Nullable column of the given declared type
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            nullable: true,
        }
    }

    pub fn with_max_length(mut self, length: i32) -> Self {
        self.max_length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Same type under another name (side tables copy the source column's type).
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_type_name(&self.data_type)
    }
}

/// A declared primary key: optional constraint name and ordered columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConstraint {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

/// One column pair of a foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyMeta {
    pub constraint: String,
    pub child_table: String,
    pub child_column: String,
    pub parent_table: String,
    pub parent_column: String,
    /// 1-based position of the pair within a multi-column constraint
    pub position: i32,
}

/// Streaming cursor over source rows
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Row, DbError>> + 'a>;

/// Operations the engine needs from a database endpoint
///
/// All methods take `&self`: backends keep connection state behind the client
/// (Postgres) or behind interior mutability (in-memory). Table and column names
/// are matched case-insensitively against the catalog by the callers that resolve
/// them; backends receive the resolved names.
pub trait Database {
    /// Names of all base tables in `schema`
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the catalog cannot be read.
    fn table_names(&self, schema: &str) -> Result<Vec<String>, DbError>;

    /// Columns of a table in declaration order
    ///
    /// # Errors
    ///
    /// Returns `DbError::TableNotFound` if the table has no columns, or any
    /// backend error raised while reading the catalog.
    fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>, DbError>;

    /// The declared primary key, or `None` when the table has none
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the catalog cannot be read.
    fn primary_key(&self, schema: &str, table: &str) -> Result<Option<KeyConstraint>, DbError>;

    /// Every foreign key column pair whose child table lives in `schema`
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the catalog cannot be read.
    fn foreign_keys(&self, schema: &str) -> Result<Vec<ForeignKeyMeta>, DbError>;

    /// Create `schema` if it does not exist
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn create_schema(&self, schema: &str) -> Result<(), DbError>;

    /// Create a table if it does not exist, with a (possibly composite) primary key
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnMeta],
        key_columns: &[String],
    ) -> Result<(), DbError>;

    /// Remove every row of a table
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn truncate(&self, schema: &str, table: &str) -> Result<(), DbError>;

    /// Stream the given columns of every row, in cursor order
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the cursor cannot be opened. Errors while fetching
    /// are yielded per item.
    fn rows<'a>(&'a self, schema: &str, table: &str, columns: &[String])
        -> Result<RowStream<'a>, DbError>;

    /// Rows whose `filter` columns equal the given values (NULL matches NULL)
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    fn find_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        filter: &[(String, Value)],
    ) -> Result<Vec<Row>, DbError>;

    /// Frequency of every distinct value of a column, NULL included
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    fn value_counts(&self, schema: &str, table: &str, column: &str)
        -> Result<Vec<(Value, u64)>, DbError>;

    /// Insert rows, returning the number inserted
    ///
    /// # Errors
    ///
    /// Returns `DbError` if any row is rejected; the caller decides whether the
    /// batch is lost.
    fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64, DbError>;

    /// Start an explicit transaction (auto-commit is in effect otherwise)
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the transaction cannot be started.
    fn begin(&self) -> Result<(), DbError>;

    /// Commit the current transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the commit fails.
    fn commit(&self) -> Result<(), DbError>;

    /// Roll back the current transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the rollback fails.
    fn rollback(&self) -> Result<(), DbError>;

    /// Enable or disable foreign key enforcement for this session
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the session setting cannot be changed.
    fn set_referential_integrity(&self, enabled: bool) -> Result<(), DbError>;
}

/// Resolve `name` against a list of catalog names, ignoring ASCII case.
pub fn resolve_name<'a>(names: &'a [String], name: &str) -> Option<&'a str> {
    names
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(name))
        .map(String::as_str)
}
