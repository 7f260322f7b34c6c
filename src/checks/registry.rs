use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use crate::checks::Plugin;

#[derive(Error, Debug, PartialEq)]
pub enum LookupError {
    #[error("plugin not found: {0}")]
    NotFound(String),
}

/// Maps plugin names to their implementations.
///
/// The registry is filled while plugins load and is only read once checks start running; the
/// checker shares it behind an `Arc` to enforce that. Registering a name twice replaces the
/// earlier plugin.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            warn!("Plugin {} was already registered, replacing it", name);
        } else {
            debug!("Registered plugin {}", name);
        }
    }

    /// Moves every plugin of `other` into this registry.
    pub fn merge(&mut self, other: PluginRegistry) {
        for (_, plugin) in other.plugins {
            self.register_plugin(plugin);
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Plugin>, LookupError> {
        self.plugins
            .get(name)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        result: Result<(), String>,
    }

    #[async_trait]
    impl Plugin for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self, _url: &str, _args: &Args) -> Result<(), String> {
            self.result.clone()
        }
    }

    #[test]
    fn test_lookup_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(
            registry.lookup("Missing").err(),
            Some(LookupError::NotFound("Missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register_plugin(Arc::new(Fixed {
            name: "Up",
            result: Ok(()),
        }));
        assert!(registry.contains("Up"));
        let plugin = registry.lookup("Up").unwrap();
        assert_eq!(plugin.name(), "Up");
        assert!(plugin.check("tcp://a:1", &Args::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_registering_same_name_replaces() {
        let mut registry = PluginRegistry::new();
        registry.register_plugin(Arc::new(Fixed {
            name: "Svc",
            result: Ok(()),
        }));
        registry.register_plugin(Arc::new(Fixed {
            name: "Svc",
            result: Err("down".to_string()),
        }));
        assert_eq!(registry.len(), 1);
        let plugin = registry.lookup("Svc").unwrap();
        assert_eq!(plugin.check("x://y", &Args::new()).await, Err("down".to_string()));
    }

    #[test]
    fn test_merge_overwrites() {
        let mut registry = PluginRegistry::new();
        registry.register_plugin(Arc::new(Fixed { name: "a", result: Ok(()) }));
        let mut other = PluginRegistry::new();
        other.register_plugin(Arc::new(Fixed { name: "a", result: Ok(()) }));
        other.register_plugin(Arc::new(Fixed { name: "b", result: Ok(()) }));
        registry.merge(other);
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_names_are_sorted() {
        let mut registry = PluginRegistry::new();
        for name in ["b", "a", "c"] {
            registry.register_plugin(Arc::new(Fixed { name, result: Ok(()) }));
        }
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
    }
}
