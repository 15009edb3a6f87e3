//! Character-by-character substitution under a keep/substitute pattern.

use super::{origin_column, Strategy};
use crate::context::RunContext;
use crate::database::{ColumnKind, ColumnMeta};
use crate::error::StrategyError;
use crate::model::{Rule, TableField};
use crate::pseudonym::MappingTable;
use crate::value::{Row, Value};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const SUBSTITUTE: char = 'P';
const KEEP: char = 'K';

const CLASSES: [&str; 3] = [
    "abcdefghijklmnopqrstuvwxyz",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "0123456789",
];

/// Name of the character table of a site, `<TABLE>_<COLUMN>_CHARACTERS`
pub fn character_table_name(field: &TableField) -> String {
    format!("{}_CHARACTERS", field.side_table_name())
}

/// Character strategy
///
/// Each rule owns a permutation of lower case letters, upper case letters and
/// digits, each class mapped onto itself and persisted in the character table
/// of the rule's site. Positions flagged `P` in the pattern are substituted,
/// positions flagged `K` and positions past the end of the pattern are kept,
/// as are characters outside the three classes.
#[derive(Debug, Default)]
pub struct Character {
    tables: HashMap<TableField, HashMap<char, char>>,
}

impl Character {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_up_rule(&mut self, ctx: &RunContext<'_>, rule: &Rule) -> Result<(), StrategyError> {
        let (_, meta) = origin_column(ctx, rule)?;
        let value_type = match meta.kind() {
            ColumnKind::Text => meta.clone(),
            ColumnKind::Integer => ColumnMeta::new(&meta.name, "character").with_max_length(1),
            _ => {
                return Err(StrategyError::UnsupportedColumnType {
                    field: rule.field().to_string(),
                    column_type: meta.data_type.clone(),
                })
            }
        };

        let table = MappingTable::new(ctx.schema(), character_table_name(rule.field()), &value_type);
        let creation_failed = |source| StrategyError::TransformationTableCreationFailed {
            table: table.name().to_string(),
            source,
        };
        table.create(ctx.transformation()).map_err(creation_failed)?;
        let stored = table
            .load(ctx.transformation())
            .map_err(|source| StrategyError::PreparationFailed {
                rule: rule.to_string(),
                source,
            })?;

        let mut map: HashMap<char, char> = stored
            .iter()
            .filter_map(|(old, new)| Some((single_char(old)?, single_char(new)?)))
            .collect();
        let added = complete(&mut map, &mut *ctx.rng());
        if !added.is_empty() {
            let pairs: Vec<(Value, Value)> = added
                .iter()
                .map(|(old, new)| (Value::Text(old.to_string()), Value::Text(new.to_string())))
                .collect();
            table.insert(ctx.transformation(), &pairs).map_err(creation_failed)?;
            log::info!("{} extended by {} characters", table.name(), pairs.len());
        }
        self.tables.insert(rule.field().clone(), map);
        Ok(())
    }
}

fn single_char(value: &Value) -> Option<char> {
    let s = value.as_str()?.trim_end();
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Extend `map` to a permutation of every character class, returning the new
/// pairs in class order.
fn complete<R: rand::Rng + ?Sized>(map: &mut HashMap<char, char>, rng: &mut R) -> Vec<(char, char)> {
    let mut added = Vec::new();
    for class in CLASSES {
        let taken: HashSet<char> = map.values().copied().collect();
        let sources: Vec<char> = class.chars().filter(|c| !map.contains_key(c)).collect();
        let mut targets: Vec<char> = class.chars().filter(|c| !taken.contains(c)).collect();
        targets.shuffle(rng);
        for (old, new) in sources.into_iter().zip(targets) {
            map.insert(old, new);
            added.push((old, new));
        }
    }
    added
}

fn substitute(text: &str, pattern: &str, map: &HashMap<char, char>) -> String {
    let mut flags = pattern.chars();
    text.chars()
        .map(|c| match flags.next() {
            Some(flag) if flag.eq_ignore_ascii_case(&SUBSTITUTE) => map.get(&c).copied().unwrap_or(c),
            _ => c,
        })
        .collect()
}

impl Strategy for Character {
    fn name(&self) -> &str {
        "Character"
    }

    fn set_up(&mut self, ctx: &RunContext<'_>, rules: &[Arc<Rule>]) -> Result<(), StrategyError> {
        for rule in rules {
            self.set_up_rule(ctx, rule)?;
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
        let map = self
            .tables
            .get(rule.field())
            .ok_or_else(|| StrategyError::TransformationFailed {
                rule: rule.to_string(),
                reason: "rule was never set up".to_string(),
            })?;
        let pattern = rule.additional_info();
        let out = match value {
            Value::Null => Value::Null,
            Value::Text(s) => Value::Text(substitute(s, pattern, map)),
            Value::Int(i) => {
                let (sign, digits) = if *i < 0 { ("-", i.unsigned_abs().to_string()) } else { ("", i.to_string()) };
                let mapped = format!("{sign}{}", substitute(&digits, pattern, map));
                mapped
                    .parse()
                    .map(Value::Int)
                    .map_err(|e| StrategyError::TransformationFailed {
                        rule: rule.to_string(),
                        reason: format!("{mapped} is not an integer: {e}"),
                    })?
            }
            other => {
                return Err(StrategyError::UnsupportedColumnType {
                    field: rule.field().to_string(),
                    column_type: other.type_name().to_string(),
                })
            }
        };
        Ok(vec![out])
    }

    fn is_rule_valid(&self, rule: &Rule, column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        let Some(column) = column else {
            return Ok(false);
        };
        let pattern = rule.additional_info();
        if let Some(bad) = pattern
            .chars()
            .find(|c| !c.eq_ignore_ascii_case(&SUBSTITUTE) && !c.eq_ignore_ascii_case(&KEEP))
        {
            return Err(StrategyError::RuleValidation(format!(
                "pattern of {rule} contains `{bad}`, only {SUBSTITUTE} and {KEEP} are allowed"
            )));
        }
        let fits = column
            .max_length
            .map_or(true, |max| pattern.chars().count() <= max.max(0) as usize);
        Ok(fits && matches!(column.kind(), ColumnKind::Text | ColumnKind::Integer))
    }
}
