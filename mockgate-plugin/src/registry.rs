use crate::error::{panic_message, BoxError, Operation, PluginError, Result};
use crate::traits::Plugin;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

/// Constructor producing a fresh, uninitialized plugin instance
pub type PluginFactory = Arc<dyn Fn() -> std::result::Result<Box<dyn Plugin>, BoxError> + Send + Sync>;

/// Registry maps plugin names to factories
///
/// It holds no lifecycle state; loaded instances live in the manager's table.
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory under a unique name
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<Box<dyn Plugin>, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if factories.contains_key(&name) {
            return Err(PluginError::DuplicateFactory(name));
        }
        tracing::debug!(plugin = %name, "Registered plugin factory");
        factories.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if factories.remove(name).is_none() {
            return Err(PluginError::FactoryNotFound(name.to_string()));
        }
        tracing::debug!(plugin = %name, "Unregistered plugin factory");
        Ok(())
    }

    pub fn factory(&self, name: &str) -> Option<PluginFactory> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names in ascending order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Build a new instance. The factory runs outside the registry lock.
    pub fn create(&self, name: &str) -> Result<Box<dyn Plugin>> {
        let factory = self
            .factory(name)
            .ok_or_else(|| PluginError::FactoryNotFound(name.to_string()))?;
        match std::panic::catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(created) => created.map_err(|source| PluginError::FactoryFailed {
                plugin: name.to_string(),
                source,
            }),
            Err(payload) => Err(PluginError::Panic {
                plugin: name.to_string(),
                operation: Operation::Load,
                message: panic_message(&*payload),
            }),
        }
    }
}
