//! Rule set data model: sites, rules, the per-table rule index and row keys.

mod primary_key;
mod rule;
mod rule_map;
mod table_field;

pub use primary_key::PrimaryKey;
pub use rule::Rule;
pub use rule_map::{BoundRule, TableRuleMap, TableRules};
pub use table_field::{natural_cmp, TableField};
