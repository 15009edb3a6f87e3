//! # Veilguard
//!
//! Rule-driven anonymization of a PostgreSQL schema.
//!
//! A run copies every table of an ordered scope from a source database into a
//! destination database. On the way each row passes through the rules bound to
//! its table: values are pseudonymized, masked or replaced, rows are deleted
//! (with cascading deletion of rows that reference them) or fanned out.
//! Pseudonyms and retention marks are persisted in a third, transformation
//! database so that reruns stay consistent.
//!
//! ```no_run
//! use veilguard::{AnonymizerConfig, Anonymizer, Endpoints, PostgresDatabase, RunContext, StrategyRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AnonymizerConfig::load(None)?;
//! let source = PostgresDatabase::connect(&config.source.url)?;
//! let destination = PostgresDatabase::connect(&config.destination.url)?;
//! let transformation = PostgresDatabase::connect(&config.transformation.url)?;
//! let endpoints = Endpoints {
//!     source: &source,
//!     destination: &destination,
//!     transformation: &transformation,
//! };
//! let ctx = RunContext::new(config.schema.clone(), endpoints, config.seed);
//! let report = Anonymizer::new(ctx, StrategyRegistry::with_defaults(), config.to_rules(), config.tables.clone())?
//!     .with_batch_size(config.batch_size)
//!     .run()?;
//! println!("{} rows written", report.rows_written());
//! # Ok(())
//! # }
//! ```

pub mod cascade;
pub mod config;
pub mod connection;
pub mod context;
pub mod database;
pub mod engine;
pub mod error;
pub mod executor;
#[cfg(any(feature = "metrics", feature = "tracing"))]
pub mod metrics;
pub mod model;
pub mod predicate;
pub mod pseudonym;
pub mod retention;
pub mod strategy;
pub mod validation;
pub mod value;

pub use config::{AnonymizerConfig, DatabaseConfig, RuleConfig};
pub use context::{Endpoints, RunContext};
pub use database::{Database, PostgresDatabase};
pub use engine::{Anonymizer, RunReport, TableReport};
pub use error::{AnonymizerError, DbError, StrategyError};
pub use model::{Rule, TableField};
pub use strategy::{Strategy, StrategyRegistry};
pub use validation::{validate_rules, Violation};
pub use value::{Row, Value};

#[cfg(any(test, feature = "mock"))]
pub use database::MemoryDatabase;
