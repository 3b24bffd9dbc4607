use std::collections::HashMap;
use tracing::debug;

use crate::error::{HaloError, Result};

/// Name-keyed table of operators (finding methods, callbacks).
///
/// Registering under an existing name replaces the previous entry. There is
/// no removal; registries are built once by the orchestrator at startup.
pub struct OperatorRegistry<T> {
    kind: &'static str,
    operators: HashMap<String, T>,
}

impl<T> OperatorRegistry<T> {
    /// Create an empty registry; `kind` names the operators in lookup errors
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            operators: HashMap::new(),
        }
    }

    /// Register an operator, overwriting any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, operator: T) {
        let name = name.into();
        if self.operators.insert(name.clone(), operator).is_some() {
            debug!(kind = self.kind, name = %name, "Replaced registered operator");
        } else {
            debug!(kind = self.kind, name = %name, "Registered operator");
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&T> {
        self.operators
            .get(name)
            .ok_or_else(|| HaloError::not_found(self.kind, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_registration_wins() {
        let mut registry: OperatorRegistry<u32> = OperatorRegistry::new("operator");
        registry.register("fof", 1);
        registry.register("fof", 2);

        assert_eq!(*registry.lookup("fof").unwrap(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let mut registry: OperatorRegistry<u32> = OperatorRegistry::new("finding method");
        registry.register("hop", 1);

        match registry.lookup("subfind") {
            Err(HaloError::NotFound { kind, name }) => {
                assert_eq!(kind, "finding method");
                assert_eq!(name, "subfind");
            }
            other => panic!("expected NotFound, got {:?}", other.map(|v| *v)),
        }
    }

    #[test]
    fn test_names_are_sorted() {
        let mut registry: OperatorRegistry<()> = OperatorRegistry::new("operator");
        registry.register("rockstar", ());
        registry.register("fof", ());
        registry.register("hop", ());

        assert_eq!(registry.names(), vec!["fof", "hop", "rockstar"]);
        assert!(registry.contains("hop"));
        assert!(!registry.contains("subfind"));
    }
}
