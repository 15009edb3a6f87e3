//! Replace every value by a fixed literal.

use super::Strategy;
use crate::context::RunContext;
use crate::database::{ColumnKind, ColumnMeta};
use crate::error::StrategyError;
use crate::model::Rule;
use crate::value::{Row, Value};

/// `additional_info` spelling of SQL NULL
pub const NULL_MARKER: &str = "<NULL>";

/// Ignores the old value and returns the rule's literal, or NULL for
/// [`NULL_MARKER`]. Integer-looking literals replace integer values as
/// integers.
#[derive(Debug, Default)]
pub struct SetDefault;

impl Strategy for SetDefault {
    fn name(&self) -> &str {
        "SetDefault"
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        _row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        let literal = rule.additional_info();
        let out = if literal == NULL_MARKER {
            Value::Null
        } else {
            match (value, literal.trim().parse::<i64>()) {
                (Value::Int(_), Ok(i)) => Value::Int(i),
                _ => Value::Text(literal.to_string()),
            }
        };
        Ok(vec![out])
    }

    fn is_rule_valid(&self, rule: &Rule, column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        let Some(column) = column else {
            return Ok(false);
        };
        let literal = rule.additional_info();
        if literal == NULL_MARKER {
            return Ok(column.nullable);
        }
        let fits = column
            .max_length
            .map_or(true, |max| literal.chars().count() <= max.max(0) as usize);
        let typed = match column.kind() {
            ColumnKind::Integer => literal.trim().parse::<i64>().is_ok(),
            ColumnKind::Boolean => literal.trim().parse::<bool>().is_ok(),
            _ => true,
        };
        Ok(fits && typed)
    }
}
