//! Transformation rules.

use super::TableField;
use std::collections::BTreeSet;
use std::fmt;

/// Binds an origin site to a strategy, with strategy-specific parameters and
/// the sites that must receive the same transformation.
///
/// Dependants never include the origin itself. Rules are read-only once the
/// engine starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    field: TableField,
    strategy: String,
    additional_info: String,
    dependants: BTreeSet<TableField>,
    potential_dependants: BTreeSet<TableField>,
}

impl Rule {
    pub fn new(field: TableField, strategy: impl Into<String>, additional_info: impl Into<String>) -> Self {
        Self {
            field,
            strategy: strategy.into(),
            additional_info: additional_info.into(),
            dependants: BTreeSet::new(),
            potential_dependants: BTreeSet::new(),
        }
    }

    /// Add confirmed dependants; the origin is silently dropped.
    pub fn with_dependants(mut self, dependants: impl IntoIterator<Item = TableField>) -> Self {
        let origin = self.field.clone();
        self.dependants
            .extend(dependants.into_iter().filter(|d| *d != origin));
        self
    }

    /// Add informational dependants. The engine never acts on these.
    pub fn with_potential_dependants(mut self, potential: impl IntoIterator<Item = TableField>) -> Self {
        self.potential_dependants.extend(potential);
        self
    }

    pub fn field(&self) -> &TableField {
        &self.field
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn additional_info(&self) -> &str {
        &self.additional_info
    }

    pub fn dependants(&self) -> &BTreeSet<TableField> {
        &self.dependants
    }

    pub fn potential_dependants(&self) -> &BTreeSet<TableField> {
        &self.potential_dependants
    }

    /// The origin followed by every dependant
    pub fn sites(&self) -> impl Iterator<Item = &TableField> {
        std::iter::once(&self.field).chain(self.dependants.iter())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.field, self.strategy)
    }
}
