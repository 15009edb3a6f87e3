//! Replace values by stable, collision-free pseudonyms.

use super::{coerce_to, origin_column, Strategy};
use crate::context::RunContext;
use crate::database::{ColumnKind, ColumnMeta};
use crate::error::StrategyError;
use crate::model::{Rule, TableField};
use crate::pseudonym::{generate, normalize_integer, pool_length, MappingTable};
use crate::value::{Row, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Mapping of one rule: the persisted table and the origin column's kind
#[derive(Debug)]
struct Mapping {
    table: MappingTable,
    kind: ColumnKind,
}

/// Pseudonymize strategy
///
/// Every distinct value found in the origin column and in all dependant
/// columns gets an entry in the mapping table `<TABLE>_<COLUMN>` during
/// setup, so dependants receive the same pseudonym as the origin. Text
/// pseudonyms are drawn from the shuffled alphanumeric pool and carry the
/// rule's `additional_info` as prefix; integer pseudonyms are drawn from the
/// shuffled digit pool.
#[derive(Debug, Default)]
pub struct Pseudonymize {
    mappings: HashMap<TableField, Mapping>,
    cache: HashMap<TableField, HashMap<Value, Value>>,
    generated: u64,
}

impl Pseudonymize {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_up_rule(&mut self, ctx: &RunContext<'_>, rule: &Rule) -> Result<(), StrategyError> {
        let (_, meta) = origin_column(ctx, rule)?;
        let kind = meta.kind();
        if !matches!(kind, ColumnKind::Integer | ColumnKind::Text) {
            return Err(StrategyError::UnsupportedColumnType {
                field: rule.field().to_string(),
                column_type: meta.data_type.clone(),
            });
        }

        let table = MappingTable::new(ctx.schema(), rule.field().side_table_name(), &meta);
        let creation_failed = |source| StrategyError::TransformationTableCreationFailed {
            table: table.name().to_string(),
            source,
        };
        table.create(ctx.transformation()).map_err(creation_failed)?;
        let existing = table
            .load(ctx.transformation())
            .map_err(|source| StrategyError::PreparationFailed {
                rule: rule.to_string(),
                source,
            })?;

        let fresh = distinct_values(ctx, rule, kind, &existing)?;
        let pseudonyms = self.draw(ctx, rule, &meta, &existing, fresh.len())?;
        let pairs: Vec<(Value, Value)> = fresh.into_iter().zip(pseudonyms).collect();
        if !pairs.is_empty() {
            table.insert(ctx.transformation(), &pairs).map_err(creation_failed)?;
        }
        log::info!(
            "{} has {} pseudonyms, {} new",
            table.name(),
            existing.len() + pairs.len(),
            pairs.len()
        );
        self.generated += pairs.len() as u64;
        self.mappings.insert(rule.field().clone(), Mapping { table, kind });
        Ok(())
    }

    /// Draw `count` unused pseudonyms for the origin column `meta`
    fn draw(
        &self,
        ctx: &RunContext<'_>,
        rule: &Rule,
        meta: &ColumnMeta,
        existing: &HashMap<Value, Value>,
        count: usize,
    ) -> Result<Vec<Value>, StrategyError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let failed = |reason: String| StrategyError::TransformationFailed {
            rule: rule.to_string(),
            reason,
        };

        if meta.kind() == ColumnKind::Integer {
            let used: HashSet<String> = existing.values().map(|v| normalize_integer(&v.to_string())).collect();
            let alphabet = ctx.pools().digits();
            let drawn = generate(count, &used, alphabet, normalize_integer, &mut *ctx.rng()).map_err(failed)?;
            return drawn
                .iter()
                .map(|s| {
                    s.parse::<i64>()
                        .map(Value::Int)
                        .map_err(|e| failed(format!("pseudonym {s} is not an integer: {e}")))
                })
                .collect();
        }

        let prefix = rule.additional_info();
        let used: HashSet<String> = existing
            .values()
            .filter_map(Value::as_str)
            .map(|s| s.strip_prefix(prefix).unwrap_or(s).to_string())
            .collect();
        let alphabet = ctx.pools().alphanumeric();
        let length = pool_length(alphabet.len(), count + used.len()) as usize;
        if let Some(max) = meta.max_length {
            let needed = prefix.chars().count() + length;
            if needed > max.max(0) as usize {
                return Err(failed(format!(
                    "pseudonyms of {needed} characters do not fit {} of length {max}",
                    rule.field()
                )));
            }
        }
        let drawn = generate(count, &used, alphabet, str::to_string, &mut *ctx.rng()).map_err(failed)?;
        Ok(drawn.into_iter().map(|s| Value::Text(format!("{prefix}{s}"))).collect())
    }
}

/// Distinct non-null values over every site of `rule` that have no mapping
/// yet, in display order so runs over the same data draw in the same order.
fn distinct_values(
    ctx: &RunContext<'_>,
    rule: &Rule,
    kind: ColumnKind,
    existing: &HashMap<Value, Value>,
) -> Result<Vec<Value>, StrategyError> {
    let mut seen = HashSet::new();
    for site in rule.sites() {
        let (shape, column) = ctx
            .column_of(site)
            .map_err(|e| StrategyError::PreparationFailed {
                rule: rule.to_string(),
                source: e.source,
            })?;
        let counts = ctx
            .source()
            .value_counts(ctx.schema(), &shape.name, &column.name)
            .map_err(|source| StrategyError::PreparationFailed {
                rule: rule.to_string(),
                source,
            })?;
        for (value, _) in counts {
            match coerce_to(&value, kind) {
                Some(Value::Null) => {}
                Some(v) => {
                    if !existing.contains_key(&v) {
                        seen.insert(v);
                    }
                }
                None => log::warn!("{site} holds {value}, which cannot be pseudonymized as {kind:?}"),
            }
        }
    }
    let mut fresh: Vec<Value> = seen.into_iter().collect();
    fresh.sort_by_cached_key(ToString::to_string);
    Ok(fresh)
}

impl Strategy for Pseudonymize {
    fn name(&self) -> &str {
        "Pseudonymize"
    }

    fn set_up(&mut self, ctx: &RunContext<'_>, rules: &[Arc<Rule>]) -> Result<(), StrategyError> {
        for rule in rules {
            self.set_up_rule(ctx, rule)?;
        }
        Ok(())
    }

    fn prepare_for_table(
        &mut self,
        ctx: &RunContext<'_>,
        table: &str,
        rules: &[Arc<Rule>],
    ) -> Result<(), StrategyError> {
        self.cache.clear();
        for rule in rules {
            let Some(mapping) = self.mappings.get(rule.field()) else {
                continue;
            };
            let loaded = mapping
                .table
                .load(ctx.transformation())
                .map_err(|source| StrategyError::PreparationFailed {
                    rule: rule.to_string(),
                    source,
                })?;
            log::debug!("loaded {} pseudonyms of {} for {table}", loaded.len(), mapping.table.name());
            self.cache.insert(rule.field().clone(), loaded);
        }
        Ok(())
    }

    fn transform(
        &mut self,
        ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        _row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        if value.is_null() {
            return Ok(vec![Value::Null]);
        }
        let mapping = self
            .mappings
            .get(rule.field())
            .ok_or_else(|| StrategyError::TransformationFailed {
                rule: rule.to_string(),
                reason: "rule was never set up".to_string(),
            })?;
        let key = coerce_to(value, mapping.kind).ok_or_else(|| StrategyError::TransformationFailed {
            rule: rule.to_string(),
            reason: format!("{} value {value} cannot be pseudonymized", value.type_name()),
        })?;

        let cache = self.cache.entry(rule.field().clone()).or_default();
        if let Some(found) = cache.get(&key) {
            return Ok(vec![found.clone()]);
        }
        let found = mapping
            .table
            .lookup(ctx.transformation(), &key)
            .map_err(|e| StrategyError::TransformationFailed {
                rule: rule.to_string(),
                reason: e.to_string(),
            })?;
        match found {
            Some(pseudonym) => {
                cache.insert(key, pseudonym.clone());
                Ok(vec![pseudonym])
            }
            None => Err(StrategyError::KeyNotFound {
                table: mapping.table.name().to_string(),
                value: key.to_string(),
            }),
        }
    }

    fn is_rule_valid(&self, rule: &Rule, column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        let Some(column) = column else {
            return Ok(false);
        };
        Ok(match column.kind() {
            ColumnKind::Text => true,
            ColumnKind::Integer => rule.additional_info().is_empty(),
            _ => false,
        })
    }

    fn summary(&self) -> Option<String> {
        (self.generated > 0).then(|| format!("{} pseudonyms generated", self.generated))
    }
}
