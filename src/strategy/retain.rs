use super::{PredicateCache, Strategy};
use crate::context::RunContext;
use crate::database::ColumnMeta;
use crate::error::StrategyError;
use crate::model::Rule;
use crate::predicate::Predicate;
use crate::value::{Row, Value};
use std::sync::Arc;

/// Marks rows matching the rule's predicate as retained. Never deletes and
/// never changes the value.
#[derive(Debug, Default)]
pub struct Retain {
    predicates: PredicateCache,
    marked: u64,
}

impl Retain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for Retain {
    fn name(&self) -> &str {
        "Retain"
    }

    fn set_up(&mut self, _ctx: &RunContext<'_>, rules: &[Arc<Rule>]) -> Result<(), StrategyError> {
        for rule in rules {
            self.predicates.load(rule)?;
        }
        Ok(())
    }

    fn transform(
        &mut self,
        ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        if self.predicates.load(rule)?.matches(row)? {
            ctx.retain(row)?;
            self.marked += 1;
        }
        Ok(vec![value.clone()])
    }

    fn is_rule_valid(&self, rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Predicate::parse(rule.additional_info())
            .map(|_| true)
            .map_err(|e| StrategyError::RuleValidation(e.to_string()))
    }

    fn summary(&self) -> Option<String> {
        (self.marked > 0).then(|| format!("{} rows marked as retained", self.marked))
    }
}
