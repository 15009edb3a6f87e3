//! Foreign key cascade tracking.
//!
//! Records the key of every row deleted during a run and tells whether a row
//! references a deleted parent. Only foreign keys between tables in scope are
//! considered, and only parents processed earlier in the run are seen.

pub mod ordering;

use crate::context::RunContext;
use crate::database::ForeignKeyMeta;
use crate::model::PrimaryKey;
use crate::value::{Row, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// One foreign key of a child table, with child columns in parent key order
#[derive(Debug, Clone, PartialEq, Eq)]
struct ForeignKey {
    constraint: String,
    parent_table: String,
    child_columns: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CascadeTracker {
    parent_keys: HashMap<String, Arc<PrimaryKey>>,
    dependencies: HashMap<String, Vec<ForeignKey>>,
    deleted: HashMap<String, HashSet<Vec<Value>>>,
}

impl CascadeTracker {
    /// A tracker with no foreign keys; nothing cascades.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from the source catalog's foreign keys, resolving parent keys
    /// through `ctx`. Parents whose key cannot be read are logged and skipped.
    pub fn build(ctx: &RunContext<'_>, foreign_keys: &[ForeignKeyMeta], scope: &[String]) -> Self {
        Self::from_foreign_keys(foreign_keys, scope, |table| match ctx.primary_key(table) {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!("cascade tracking skips references to {table}: {e}");
                None
            }
        })
    }

    /// Build from foreign key column pairs. Constraints are grouped by name and
    /// child table; constraints leaving the scope are ignored, as are those not
    /// referencing the parent's primary key.
    pub fn from_foreign_keys(
        fks: &[ForeignKeyMeta],
        scope: &[String],
        mut parent_key: impl FnMut(&str) -> Option<Arc<PrimaryKey>>,
    ) -> Self {
        let in_scope: HashSet<String> = scope.iter().map(|t| t.to_uppercase()).collect();
        let mut grouped: BTreeMap<(String, String), Vec<&ForeignKeyMeta>> = BTreeMap::new();
        for fk in fks {
            if in_scope.contains(&fk.child_table.to_uppercase())
                && in_scope.contains(&fk.parent_table.to_uppercase())
            {
                grouped
                    .entry((fk.child_table.to_uppercase(), fk.constraint.clone()))
                    .or_default()
                    .push(fk);
            }
        }

        let mut tracker = Self::empty();
        for ((child, constraint), mut pairs) in grouped {
            pairs.sort_by_key(|p| p.position);
            let parent = pairs[0].parent_table.to_uppercase();
            let Some(key) = tracker
                .parent_keys
                .get(&parent)
                .cloned()
                .or_else(|| parent_key(&pairs[0].parent_table))
            else {
                continue;
            };

            let mapping: HashMap<String, &str> = pairs
                .iter()
                .map(|p| (p.parent_column.to_uppercase(), p.child_column.as_str()))
                .collect();
            let child_columns: Option<Vec<String>> = key
                .columns()
                .iter()
                .map(|c| mapping.get(&c.name.to_uppercase()).map(|s| (*s).to_string()))
                .collect();
            match child_columns {
                Some(child_columns) if child_columns.len() == pairs.len() => {
                    tracker.parent_keys.insert(parent.clone(), key);
                    tracker.dependencies.entry(child).or_default().push(ForeignKey {
                        constraint,
                        parent_table: parent,
                        child_columns,
                    });
                }
                _ => log::warn!(
                    "foreign key {constraint} of {child} does not reference the primary key of {parent}, \
                     rows of {child} will not cascade"
                ),
            }
        }
        tracker
    }

    /// Remember that the row of `table` with key `key_values` was deleted
    pub fn record_deleted(&mut self, table: &str, key_values: Vec<Value>) {
        self.deleted
            .entry(table.to_uppercase())
            .or_default()
            .insert(key_values);
    }

    /// Whether any parent row referenced by `row` was deleted earlier in the run.
    /// References with a NULL component point nowhere and never match.
    pub fn parent_was_deleted(&self, row: &Row) -> bool {
        let Some(fks) = self.dependencies.get(&row.table().to_uppercase()) else {
            return false;
        };
        fks.iter().any(|fk| {
            let Some(deleted) = self.deleted.get(&fk.parent_table) else {
                return false;
            };
            let reference: Option<Vec<Value>> = fk
                .child_columns
                .iter()
                .map(|c| row.get(c).filter(|v| !v.is_null()).cloned())
                .collect();
            reference.is_some_and(|r| {
                let hit = deleted.contains(&r);
                if hit {
                    log::debug!("{} row references a deleted {} row via {}", row.table(), fk.parent_table, fk.constraint);
                }
                hit
            })
        })
    }

    /// Parent tables `table` cascades from
    pub fn parents_of(&self, table: &str) -> Vec<&str> {
        self.dependencies
            .get(&table.to_uppercase())
            .map(|fks| fks.iter().map(|fk| fk.parent_table.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn deleted_count(&self, table: &str) -> usize {
        self.deleted.get(&table.to_uppercase()).map_or(0, HashSet::len)
    }
}
