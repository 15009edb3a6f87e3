//! Per-table index of the rules to apply.

use super::Rule;
use crate::strategy::StrategyId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A rule together with the registry slot of its strategy
#[derive(Debug, Clone)]
pub struct BoundRule {
    /// Position of the rule in the rule set
    pub id: usize,
    pub rule: Arc<Rule>,
    pub strategy: StrategyId,
}

/// Rules of one table, keyed by column (`None` for whole-row rules)
#[derive(Debug, Default)]
pub struct TableRules {
    entries: BTreeMap<Option<String>, Vec<BoundRule>>,
}

impl TableRules {
    fn push(&mut self, column: Option<&str>, bound: BoundRule) {
        self.entries
            .entry(column.map(str::to_uppercase))
            .or_default()
            .push(bound);
    }

    /// Column-less rules in rule order
    pub fn whole_row(&self) -> &[BoundRule] {
        self.entries.get(&None).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The rule chain of `column` (case-insensitive), possibly empty
    pub fn for_column(&self, column: &str) -> &[BoundRule] {
        self.entries
            .get(&Some(column.to_uppercase()))
            .map(Vec::as_slice).unwrap_or(&[])
    }

    /// Columns that carry rules
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().filter_map(|k| k.as_deref())
    }

    /// Every distinct rule touching this table, whole-row rules first
    pub fn rules(&self) -> Vec<&BoundRule> {
        let mut seen = HashSet::new();
        self.entries
            .values()
            .flatten()
            .filter(|b| seen.insert(b.id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Index from table name to [`TableRules`], restricted to the tables in scope
#[derive(Debug, Default)]
pub struct TableRuleMap {
    tables: HashMap<String, TableRules>,
}

impl TableRuleMap {
    /// Index `rules` by the tables in `scope`.
    ///
    /// A rule whose origin table is out of scope is dropped with a warning,
    /// together with all of its dependants. Dependants outside the scope are
    /// skipped.
    pub fn build(rules: &[BoundRule], scope: &[String]) -> Self {
        let in_scope: HashSet<String> = scope.iter().map(|t| t.to_uppercase()).collect();
        let mut tables: HashMap<String, TableRules> = HashMap::new();

        for bound in rules {
            let origin = bound.rule.field();
            if !in_scope.contains(origin.table()) {
                log::warn!(
                    "rule {} targets table {} which is not in scope, ignoring it and its dependants",
                    bound.rule,
                    origin.table()
                );
                continue;
            }
            for site in bound.rule.sites() {
                if !in_scope.contains(site.table()) {
                    log::debug!("dependant {site} of {} is not in scope", bound.rule);
                    continue;
                }
                tables
                    .entry(site.table().to_string())
                    .or_default()
                    .push(site.column(), bound.clone());
            }
        }
        Self { tables }
    }

    pub fn for_table(&self, table: &str) -> Option<&TableRules> {
        self.tables.get(&table.to_uppercase())
    }
}
