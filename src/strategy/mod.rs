//! Transformation strategies.
//!
//! A [`Strategy`] turns one input value into zero, one or many output values.
//! Zero values delete the row; more than one fans the row out into several
//! destination rows. Strategies are resolved by name through the
//! [`StrategyRegistry`] once at startup and receive the run's
//! [`RunContext`] on every call.

mod character;
mod delete_row;
mod noop;
mod pseudonymize;
mod registry;
mod retain;
mod set_default;
mod uniform;

pub use character::Character;
pub use delete_row::DeleteRow;
pub use noop::NoOp;
pub use pseudonymize::Pseudonymize;
pub use registry::StrategyRegistry;
pub use retain::Retain;
pub use set_default::{SetDefault, NULL_MARKER};
pub use uniform::UniformDistribution;

use crate::context::{RunContext, TableShape};
use crate::database::{ColumnKind, ColumnMeta};
use crate::error::StrategyError;
use crate::model::Rule;
use crate::predicate::Predicate;
use crate::value::{Row, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Slot of a strategy in a [`StrategyRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrategyId(pub usize);

/// A transformation strategy
///
/// `set_up` runs at most once per rule, before the first table holding one of
/// the rule's sites is streamed. `prepare_for_table` runs before the rows of
/// every table the strategy has rules on. Whole-row rules receive
/// [`Value::Null`] as `value`.
pub trait Strategy {
    /// Registry key, used in logs and summaries
    fn name(&self) -> &str;

    /// One-time preparation of `rules`
    ///
    /// # Errors
    ///
    /// Returns `PreparationFailed`, `TransformationTableCreationFailed`,
    /// `UnsupportedColumnType` or `KeyFetchFailed`. Any error aborts the run.
    fn set_up(&mut self, _ctx: &RunContext<'_>, _rules: &[Arc<Rule>]) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Per-table warm-up for the rules touching `table`
    ///
    /// # Errors
    ///
    /// Returns a `StrategyError` if cached state cannot be loaded.
    fn prepare_for_table(
        &mut self,
        _ctx: &RunContext<'_>,
        _table: &str,
        _rules: &[Arc<Rule>],
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Transform `value`, read from `row` under `rule`
    ///
    /// # Errors
    ///
    /// Returns `TransformationFailed` or `KeyNotFound`; the engine handles both
    /// per row. `RetentionMarkFailed` aborts the run.
    fn transform(
        &mut self,
        ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        row: &Row,
    ) -> Result<Vec<Value>, StrategyError>;

    /// Whether `rule` can be applied to `column` (`None` for whole-row sites)
    ///
    /// # Errors
    ///
    /// Returns `RuleValidation` when the rule's parameters cannot be checked.
    fn is_rule_valid(&self, rule: &Rule, column: Option<&ColumnMeta>) -> Result<bool, StrategyError>;

    /// End-of-run summary line
    fn summary(&self) -> Option<String> {
        None
    }
}

/// Parsed predicates keyed by their source text
#[derive(Debug, Default)]
pub(crate) struct PredicateCache {
    parsed: HashMap<String, Predicate>,
}

impl PredicateCache {
    /// Parse the predicate of `rule` unless already known
    pub(crate) fn load(&mut self, rule: &Rule) -> Result<&Predicate, StrategyError> {
        let source = rule.additional_info();
        if !self.parsed.contains_key(source) {
            let predicate = Predicate::parse(source)?;
            self.parsed.insert(source.to_string(), predicate);
        }
        self.parsed
            .get(source)
            .ok_or_else(|| StrategyError::TransformationFailed {
                rule: rule.to_string(),
                reason: "predicate cache lost an entry".to_string(),
            })
    }
}

/// Bring a value read from a dependant column to the representation of the
/// origin column. `None` when it has none.
pub(crate) fn coerce_to(value: &Value, kind: ColumnKind) -> Option<Value> {
    match (kind, value) {
        (_, Value::Null) => Some(Value::Null),
        (ColumnKind::Integer, Value::Int(_)) => Some(value.clone()),
        (ColumnKind::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Int),
        (ColumnKind::Integer, Value::Decimal(d)) if d.fract().is_zero() => {
            rust_decimal::prelude::ToPrimitive::to_i64(d).map(Value::Int)
        }
        (ColumnKind::Text, Value::Text(_)) => Some(value.clone()),
        (ColumnKind::Text, other) => Some(Value::Text(other.to_string())),
        _ => None,
    }
}

fn setup_error(rule: &Rule, source: crate::error::SchemaIntrospectionError) -> StrategyError {
    StrategyError::PreparationFailed {
        rule: rule.to_string(),
        source: source.source,
    }
}

/// Source table and column metadata of the origin of a column rule
pub(crate) fn origin_column(
    ctx: &RunContext<'_>,
    rule: &Rule,
) -> Result<(Arc<TableShape>, ColumnMeta), StrategyError> {
    if rule.field().is_whole_row() {
        return Err(StrategyError::RuleValidation(format!(
            "{rule} needs a column but targets a whole row"
        )));
    }
    ctx.column_of(rule.field()).map_err(|e| setup_error(rule, e))
}
