use super::{
    Character, DeleteRow, NoOp, Pseudonymize, Retain, SetDefault, Strategy, StrategyId,
    UniformDistribution,
};
use std::collections::HashMap;

/// Strategy instances addressed by name
///
/// Names are matched case-insensitively, ignoring any package-style
/// qualification (`anonymizer.strategy.Pseudonymize`) and a trailing
/// `Strategy` (`PseudonymizeStrategy`).
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
    index: HashMap<String, StrategyId>,
}

fn key_of(name: &str) -> String {
    let last = name.rsplit(&['.', ':'][..]).next().unwrap_or(name);
    let lower = last.trim().to_ascii_lowercase();
    match lower.strip_suffix("strategy") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => lower,
    }
}

impl StrategyRegistry {
    /// A registry without strategies
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The built-in strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("NoOp", Box::new(NoOp));
        registry.register("Pseudonymize", Box::new(Pseudonymize::new()));
        registry.register("Character", Box::new(Character::new()));
        registry.register("SetDefault", Box::new(SetDefault));
        registry.register("DeleteRow", Box::new(DeleteRow::new()));
        let retain = registry.register("Retain", Box::new(Retain::new()));
        registry.alias("RetainRow", retain);
        registry.register("UniformDistribution", Box::new(UniformDistribution::new()));
        registry
    }

    /// Add a strategy under `name`, replacing the binding of an existing name
    pub fn register(&mut self, name: &str, strategy: Box<dyn Strategy>) -> StrategyId {
        let id = StrategyId(self.strategies.len());
        self.strategies.push(strategy);
        if self.index.insert(key_of(name), id).is_some() {
            log::debug!("strategy name {name} rebound");
        }
        id
    }

    /// Make `name` resolve to an already registered strategy
    pub fn alias(&mut self, name: &str, id: StrategyId) {
        self.index.insert(key_of(name), id);
    }

    pub fn resolve(&self, name: &str) -> Option<StrategyId> {
        self.index.get(&key_of(name)).copied()
    }

    pub fn get(&self, id: StrategyId) -> Option<&dyn Strategy> {
        self.strategies.get(id.0).map(Box::as_ref)
    }

    pub fn get_mut(&mut self, id: StrategyId) -> Option<&mut (dyn Strategy + 'static)> {
        self.strategies.get_mut(id.0).map(Box::as_mut)
    }

    /// Every strategy instance in registration order
    pub fn iter(&self) -> impl Iterator<Item = &dyn Strategy> {
        self.strategies.iter().map(Box::as_ref)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_resolve_loosely() {
        let registry = StrategyRegistry::with_defaults();
        let pseudonymize = registry.resolve("Pseudonymize").unwrap();
        assert_eq!(registry.resolve("pseudonymize"), Some(pseudonymize));
        assert_eq!(registry.resolve("PseudonymizeStrategy"), Some(pseudonymize));
        assert_eq!(registry.resolve("org.anonymizer.Pseudonymize"), Some(pseudonymize));
        assert_eq!(registry.resolve("RetainRow"), registry.resolve("Retain"));
        assert_eq!(registry.resolve("Scramble"), None);
        assert_eq!(registry.get(pseudonymize).map(|s| s.name()), Some("Pseudonymize"));
    }

    #[test]
    fn test_custom_strategy_replaces_binding() {
        let mut registry = StrategyRegistry::with_defaults();
        let before = registry.resolve("NoOp").unwrap();
        let custom = registry.register("NoOpStrategy", Box::new(NoOp));
        assert_ne!(before, custom);
        assert_eq!(registry.resolve("noop"), Some(custom));
        assert_eq!(registry.iter().count(), 8);
    }
}
