//! Name-to-target lookup for the published configuration.

use crate::config::{Config, Target};
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable map from target name to its delivery configuration.
///
/// Built once per configuration load; names are validated by the loader, so
/// lookups never fail with an error. A miss is a client problem, not a
/// server one.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, Arc<Target>>,
}

impl TargetRegistry {
    pub fn from_config(config: &Config) -> Self {
        let targets = config
            .targets
            .iter()
            .map(|(name, target)| (name.clone(), Arc::new(target.clone())))
            .collect();
        Self { targets }
    }

    /// Looks up a target by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<Target>> {
        self.targets.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Target names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
