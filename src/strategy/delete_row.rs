use super::{PredicateCache, Strategy};
use crate::context::RunContext;
use crate::database::ColumnMeta;
use crate::error::StrategyError;
use crate::model::Rule;
use crate::predicate::Predicate;
use crate::value::{Row, Value};
use std::sync::Arc;

/// Deletes rows matching the rule's predicate; other rows pass unchanged
#[derive(Debug, Default)]
pub struct DeleteRow {
    predicates: PredicateCache,
    matched: u64,
}

impl DeleteRow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for DeleteRow {
    fn name(&self) -> &str {
        "DeleteRow"
    }

    fn set_up(&mut self, _ctx: &RunContext<'_>, rules: &[Arc<Rule>]) -> Result<(), StrategyError> {
        for rule in rules {
            self.predicates.load(rule)?;
        }
        Ok(())
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        if self.predicates.load(rule)?.matches(row)? {
            self.matched += 1;
            return Ok(Vec::new());
        }
        Ok(vec![value.clone()])
    }

    fn is_rule_valid(&self, rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Predicate::parse(rule.additional_info())
            .map(|_| true)
            .map_err(|e| StrategyError::RuleValidation(e.to_string()))
    }

    fn summary(&self) -> Option<String> {
        (self.matched > 0).then(|| format!("{} rows matched a delete predicate", self.matched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::model::TableField;
    use crate::strategy::test_support::{context, visitor, visitor_source};

    #[test]
    fn test_matching_rows_are_deleted() {
        let src = visitor_source(vec![]);
        let (dst, tr) = (MemoryDatabase::new(), MemoryDatabase::new());
        let ctx = context(&src, &dst, &tr);
        let rule = Arc::new(Rule::new(
            TableField::new("public", "VISITOR", None),
            "DeleteRow",
            "ZIPCODE IS NULL",
        ));
        let mut strategy = DeleteRow::new();
        strategy.set_up(&ctx, &[Arc::clone(&rule)]).unwrap();
        assert!(strategy
            .transform(&ctx, &Value::Null, &rule, &visitor(1, "Smith", None))
            .unwrap()
            .is_empty());
        assert_eq!(
            strategy
                .transform(&ctx, &Value::Null, &rule, &visitor(2, "Jones", Some("12345")))
                .unwrap(),
            vec![Value::Null]
        );
        assert_eq!(strategy.summary().as_deref(), Some("1 rows matched a delete predicate"));
    }

    #[test]
    fn test_bad_predicate_fails_setup_and_validation() {
        let src = visitor_source(vec![]);
        let (dst, tr) = (MemoryDatabase::new(), MemoryDatabase::new());
        let ctx = context(&src, &dst, &tr);
        let rule = Arc::new(Rule::new(TableField::new("public", "VISITOR", None), "DeleteRow", "ZIPCODE IS"));
        let mut strategy = DeleteRow::new();
        assert!(matches!(
            strategy.set_up(&ctx, &[Arc::clone(&rule)]),
            Err(StrategyError::InvalidPredicate { .. })
        ));
        assert!(matches!(
            strategy.is_rule_valid(&rule, None),
            Err(StrategyError::RuleValidation(_))
        ));
    }
}
