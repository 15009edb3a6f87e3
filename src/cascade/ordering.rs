//! Processing order of the tables in scope.
//!
//! Cascade deletion only sees parent rows deleted earlier in the run, so a
//! parent table has to be processed before its children. These helpers find
//! scope orders that break this and compute one that does not.

use crate::database::ForeignKeyMeta;
use std::collections::{HashMap, HashSet, VecDeque};

/// A table and the in-scope tables it references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    /// Parent tables, in first-reference order, without the table itself
    pub dependencies: Vec<String>,
}

/// Build [`TableInfo`] for every table of `scope` from foreign key metadata.
/// Names are matched case-insensitively and reported as spelled in `scope`.
pub fn dependency_graph(foreign_keys: &[ForeignKeyMeta], scope: &[String]) -> Vec<TableInfo> {
    let spelled: HashMap<String, &String> = scope.iter().map(|t| (t.to_uppercase(), t)).collect();
    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();

    for fk in foreign_keys {
        let child = fk.child_table.to_uppercase();
        let parent = fk.parent_table.to_uppercase();
        if child == parent {
            continue;
        }
        let (Some(_), Some(parent_name)) = (spelled.get(&child), spelled.get(&parent)) else {
            continue;
        };
        let deps = dependencies.entry(child).or_default();
        if !deps.contains(*parent_name) {
            deps.push((*parent_name).clone());
        }
    }

    scope
        .iter()
        .map(|name| TableInfo {
            name: name.clone(),
            dependencies: dependencies.remove(&name.to_uppercase()).unwrap_or_default(),
        })
        .collect()
}

/// `(child, parent)` pairs where the child is listed before its parent
pub fn misordered(tables: &[TableInfo]) -> Vec<(String, String)> {
    let position: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();
    let mut pairs = Vec::new();
    for (i, table) in tables.iter().enumerate() {
        for dep in &table.dependencies {
            if position.get(dep.as_str()).is_some_and(|&p| p > i) {
                pairs.push((table.name.clone(), dep.clone()));
            }
        }
    }
    pairs
}

/// Topologically sort tables: parents first, children last.
///
/// Ties keep the input order. Returns the tables caught in a cycle as the error.
pub fn topological_sort(tables: &[TableInfo]) -> Result<Vec<String>, Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let known: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();

    for table in tables {
        let deps: Vec<&str> = table
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| known.contains(d))
            .collect();
        in_degree.insert(table.name.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(table.name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = tables
        .iter()
        .map(|t| t.name.as_str())
        .filter(|n| in_degree.get(n) == Some(&0))
        .collect();
    let mut result = Vec::with_capacity(tables.len());

    while let Some(current) = queue.pop_front() {
        result.push(current.to_string());
        for dependent in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if result.len() != tables.len() {
        let placed: HashSet<&str> = result.iter().map(String::as_str).collect();
        return Err(tables
            .iter()
            .map(|t| t.name.clone())
            .filter(|n| !placed.contains(n.as_str()))
            .collect());
    }
    Ok(result)
}
