//! Downsample a column to a uniform value distribution.

use super::{origin_column, Strategy};
use crate::context::RunContext;
use crate::database::ColumnMeta;
use crate::error::StrategyError;
use crate::model::{Rule, TableField};
use crate::value::{Row, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Keeps, for every distinct value of the column, only as many rows as the
/// rarest value has. Rows past their value's quota are deleted.
#[derive(Debug, Default)]
pub struct UniformDistribution {
    quotas: HashMap<TableField, HashMap<Value, u64>>,
    deleted: u64,
}

impl UniformDistribution {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for UniformDistribution {
    fn name(&self) -> &str {
        "UniformDistribution"
    }

    fn set_up(&mut self, ctx: &RunContext<'_>, rules: &[Arc<Rule>]) -> Result<(), StrategyError> {
        for rule in rules {
            let (shape, column) = origin_column(ctx, rule)?;
            let counts = ctx
                .source()
                .value_counts(ctx.schema(), &shape.name, &column.name)
                .map_err(|source| StrategyError::PreparationFailed {
                    rule: rule.to_string(),
                    source,
                })?;
            let quota = counts.iter().map(|(_, n)| *n).min().unwrap_or(0);
            log::info!(
                "{} keeps {quota} rows for each of its {} values",
                rule.field(),
                counts.len()
            );
            self.quotas.insert(
                rule.field().clone(),
                counts.into_iter().map(|(value, _)| (value, quota)).collect(),
            );
        }
        Ok(())
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        _row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        let quotas = self
            .quotas
            .get_mut(rule.field())
            .ok_or_else(|| StrategyError::TransformationFailed {
                rule: rule.to_string(),
                reason: "rule was never set up".to_string(),
            })?;
        match quotas.get_mut(value) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(vec![value.clone()])
            }
            _ => {
                self.deleted += 1;
                Ok(Vec::new())
            }
        }
    }

    fn is_rule_valid(&self, rule: &Rule, column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Ok(column.is_some() && rule.dependants().is_empty())
    }

    fn summary(&self) -> Option<String> {
        Some(format!("{} rows deleted by uniform distribution", self.deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::strategy::test_support::{context, visitor, visitor_source};

    #[test]
    fn test_every_value_keeps_the_minimum_frequency() {
        let rows = vec![
            vec![Value::Int(1), "a".into(), "1000".into()],
            vec![Value::Int(2), "b".into(), "1000".into()],
            vec![Value::Int(3), "c".into(), "1000".into()],
            vec![Value::Int(4), "d".into(), "2000".into()],
            vec![Value::Int(5), "e".into(), "2000".into()],
            vec![Value::Int(6), "f".into(), Value::Null],
            vec![Value::Int(7), "g".into(), Value::Null],
        ];
        let src = visitor_source(rows.clone());
        let (dst, tr) = (MemoryDatabase::new(), MemoryDatabase::new());
        let ctx = context(&src, &dst, &tr);
        let rule = Arc::new(Rule::new(
            TableField::new("public", "VISITOR", Some("ZIPCODE")),
            "UniformDistribution",
            "",
        ));
        let mut strategy = UniformDistribution::new();
        strategy.set_up(&ctx, &[Arc::clone(&rule)]).unwrap();

        let mut kept = Vec::new();
        for r in &rows {
            let row = visitor(r[0].as_i64().unwrap(), r[1].as_str().unwrap(), r[2].as_str());
            if !strategy.transform(&ctx, &r[2], &rule, &row).unwrap().is_empty() {
                kept.push(r[2].clone());
            }
        }
        assert_eq!(kept, vec!["1000".into(), "1000".into(), "2000".into(), "2000".into(), Value::Null, Value::Null]);
        assert_eq!(strategy.summary().as_deref(), Some("1 rows deleted by uniform distribution"));
    }

    #[test]
    fn test_dependants_are_not_allowed() {
        let rule = Rule::new(TableField::new("public", "A", Some("X")), "UniformDistribution", "")
            .with_dependants([TableField::new("public", "B", Some("X"))]);
        let column = ColumnMeta::new("X", "integer");
        assert!(!UniformDistribution::new().is_rule_valid(&rule, Some(&column)).unwrap());
    }
}
