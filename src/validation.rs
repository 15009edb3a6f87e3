//! Rule set checks against source metadata, run before an anonymization.

use crate::context::RunContext;
use crate::error::error_chain;
use crate::model::{Rule, TableField};
use crate::strategy::StrategyRegistry;
use std::fmt;

/// A rule that cannot be applied at one of its sites
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// `Display` of the offending rule
    pub rule: String,
    pub site: TableField,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.rule, self.site, self.reason)
    }
}

/// Check every rule at its origin and at each dependant
///
/// Unknown strategies, missing tables or columns and strategies rejecting the
/// column all produce a [`Violation`]; an empty result means the rule set can
/// be run.
pub fn validate_rules(ctx: &RunContext<'_>, registry: &StrategyRegistry, rules: &[Rule]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for rule in rules {
        let violation = |site: &TableField, reason: String| Violation {
            rule: rule.to_string(),
            site: site.clone(),
            reason,
        };
        let Some(strategy) = registry.resolve(rule.strategy()).and_then(|id| registry.get(id)) else {
            violations.push(violation(rule.field(), format!("unknown strategy {}", rule.strategy())));
            continue;
        };

        for site in rule.sites() {
            let column = if site.is_whole_row() {
                ctx.table_shape(site.table()).map(|_| None)
            } else {
                ctx.column_of(site).map(|(_, column)| Some(column))
            };
            let column = match column {
                Ok(column) => column,
                Err(e) => {
                    violations.push(violation(site, error_chain(&e)));
                    continue;
                }
            };
            match strategy.is_rule_valid(rule, column.as_ref()) {
                Ok(true) => {}
                Ok(false) => {
                    let reason = match &column {
                        Some(c) => format!("{} cannot be applied to {} column {}", strategy.name(), c.data_type, c.name),
                        None => format!("{} cannot be applied to whole rows", strategy.name()),
                    };
                    violations.push(violation(site, reason));
                }
                Err(e) => violations.push(violation(site, e.to_string())),
            }
        }
    }
    for v in &violations {
        log::warn!("invalid rule {v}");
    }
    violations
}
