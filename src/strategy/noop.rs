use super::Strategy;
use crate::context::RunContext;
use crate::database::ColumnMeta;
use crate::error::StrategyError;
use crate::model::Rule;
use crate::value::{Row, Value};

/// Copies the value unchanged
#[derive(Debug, Default)]
pub struct NoOp;

impl Strategy for NoOp {
    fn name(&self) -> &str {
        "NoOp"
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        _rule: &Rule,
        _row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        Ok(vec![value.clone()])
    }

    fn is_rule_valid(&self, _rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Ok(true)
    }
}
