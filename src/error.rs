//! Error types for the anonymization engine.
//!
//! Errors are layered the same way the run is:
//! - [`DbError`] for anything a [`Database`](crate::database::Database) backend reports
//! - [`StrategyError`] for transformation strategies (setup and per-row)
//! - [`AnonymizerError`] for failures that abort a whole run
//!
//! Row-local and batch-local failures are logged and recovered by the engine;
//! only [`AnonymizerError`] ever leaves [`Anonymizer::run`](crate::engine::Anonymizer::run).

use std::error::Error as StdError;
use thiserror::Error;

/// Backend error reported by a [`Database`](crate::database::Database) implementation
#[derive(Debug, Error)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] may_postgres::Error),
    /// Query construction or execution error
    #[error("Query error: {0}")]
    Query(String),
    /// A column type the value layer cannot read or write
    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),
    /// Referenced table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),
    /// Uniqueness or key constraint violated
    #[error("Constraint violation: {0}")]
    Constraint(String),
    /// Invalid connection string or failed connection attempt
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Key or column metadata could not be read for a table
#[derive(Debug, Error)]
#[error("cannot read schema metadata for {schema}.{table}")]
pub struct SchemaIntrospectionError {
    pub schema: String,
    pub table: String,
    #[source]
    pub source: DbError,
}

/// Errors raised by transformation strategies
#[derive(Debug, Error)]
pub enum StrategyError {
    /// One-time preparation (reading source values, loading mappings) failed
    #[error("preparation of rule {rule} failed")]
    PreparationFailed {
        rule: String,
        #[source]
        source: DbError,
    },
    /// A pseudonym or character table could not be created or filled
    #[error("transformation table {table} could not be created")]
    TransformationTableCreationFailed {
        table: String,
        #[source]
        source: DbError,
    },
    /// The rule's column has a type the strategy cannot handle
    #[error("column {field} has unsupported type {column_type}")]
    UnsupportedColumnType { field: String, column_type: String },
    /// Primary key of a table could not be resolved
    #[error("primary key could not be fetched")]
    KeyFetchFailed(#[from] SchemaIntrospectionError),
    /// Strategy-internal fault while transforming a value
    #[error("transformation failed for rule {rule}: {reason}")]
    TransformationFailed { rule: String, reason: String },
    /// No pseudonym exists for a value
    #[error("no pseudonym for value {value} in {table}")]
    KeyNotFound { table: String, value: String },
    /// The rule cannot be checked against a column
    #[error("rule validation error: {0}")]
    RuleValidation(String),
    /// A row predicate could not be parsed or evaluated
    #[error("invalid predicate `{predicate}`: {reason}")]
    InvalidPredicate { predicate: String, reason: String },
    /// The retention table of a table could not be queried
    #[error("retention lookup on {table} failed")]
    RetentionLookupFailed {
        table: String,
        #[source]
        source: DbError,
    },
    /// A retention mark could not be persisted
    #[error("failed to mark a row of {table} as retained")]
    RetentionMarkFailed {
        table: String,
        #[source]
        source: DbError,
    },
}

impl StrategyError {
    /// Whether this error must abort the run even when raised while streaming rows.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StrategyError::RetentionMarkFailed { .. })
    }
}

/// Errors that abort an anonymization run
#[derive(Debug, Error)]
pub enum AnonymizerError {
    /// Destination schema lacks tables that are in scope
    #[error("destination is missing tables: {}", .0.join(", "))]
    MissingDestinationTables(Vec<String>),
    /// A rule names a strategy the registry does not know
    #[error("unknown strategy `{strategy}` for rule on {field}")]
    UnknownStrategy { strategy: String, field: String },
    /// Key or column metadata unavailable
    #[error(transparent)]
    SchemaIntrospection(#[from] SchemaIntrospectionError),
    /// Strategy setup failed before rows of a table were streamed
    #[error("strategy {strategy} failed to set up for table {table}")]
    Setup {
        table: String,
        strategy: String,
        #[source]
        source: StrategyError,
    },
    /// A retention mark could not be written while processing rows
    #[error("retention mark failed while processing {table}")]
    RetentionMarkFailed {
        table: String,
        #[source]
        source: StrategyError,
    },
    /// Unrecoverable database error (for example truncating the destination)
    #[error("database error on {context}")]
    Database {
        context: String,
        #[source]
        source: DbError,
    },
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Render an error followed by every `source()` in its chain.
///
/// ```
/// use veilguard::error::{error_chain, DbError, SchemaIntrospectionError};
///
/// let err = SchemaIntrospectionError {
///     schema: "public".into(),
///     table: "visitor".into(),
///     source: DbError::TableNotFound("visitor".into()),
/// };
/// assert_eq!(
///     error_chain(&err),
///     "cannot read schema metadata for public.visitor: Table not found: visitor"
/// );
/// ```
pub fn error_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain_walks_sources() {
        let err = AnonymizerError::Setup {
            table: "VISITOR".to_string(),
            strategy: "Pseudonymize".to_string(),
            source: StrategyError::TransformationTableCreationFailed {
                table: "VISITOR_SURNAME".to_string(),
                source: DbError::Query("permission denied".to_string()),
            },
        };
        let chain = error_chain(&err);
        assert!(chain.starts_with("strategy Pseudonymize failed to set up for table VISITOR"));
        assert!(chain.contains("transformation table VISITOR_SURNAME could not be created"));
        assert!(chain.ends_with("Query error: permission denied"));
    }

    #[test]
    fn test_db_error_display() {
        assert_eq!(DbError::Query("bad".to_string()).to_string(), "Query error: bad");
        assert!(DbError::UnsupportedType("tsvector".to_string())
            .to_string()
            .contains("Unsupported column type"));
        assert!(DbError::TableNotFound("visitor".to_string())
            .to_string()
            .contains("Table not found"));
        assert!(DbError::Connection("refused".to_string())
            .to_string()
            .starts_with("Connection error"));
    }

    #[test]
    fn test_missing_tables_display() {
        let err = AnonymizerError::MissingDestinationTables(vec!["A".to_string(), "B".to_string()]);
        assert_eq!(err.to_string(), "destination is missing tables: A, B");
    }

    #[test]
    fn test_only_retention_failures_are_fatal() {
        let fatal = StrategyError::RetentionMarkFailed {
            table: "T".to_string(),
            source: DbError::Constraint("dup".to_string()),
        };
        assert!(fatal.is_fatal());
        let local = StrategyError::KeyNotFound {
            table: "T_C".to_string(),
            value: "x".to_string(),
        };
        assert!(!local.is_fatal());
    }
}
