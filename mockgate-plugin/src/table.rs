//! Active-plugin table shared by the manager, pipeline and health monitor

use crate::entry::{PluginEntry, PluginState};
use crate::error::{PluginError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Name -> entry map. The lock is held only for the map operation itself;
/// plugin calls always happen on cloned `Arc<PluginEntry>` handles.
#[derive(Debug, Default)]
pub struct PluginTable {
    entries: RwLock<HashMap<String, Arc<PluginEntry>>>,
    sequence: AtomicU64,
}

impl PluginTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert(&self, entry: Arc<PluginEntry>) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(entry.name()) {
            return Err(PluginError::AlreadyLoaded(entry.name().to_string()));
        }
        entries.insert(entry.name().to_string(), entry);
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<PluginEntry>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Copy of every entry, sorted by name
    pub fn snapshot(&self) -> Vec<Arc<PluginEntry>> {
        let mut entries: Vec<Arc<PluginEntry>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }

    /// Enabled middleware entries in pre-process order: ascending priority,
    /// then load order.
    pub fn enabled_middlewares(&self) -> Vec<Arc<PluginEntry>> {
        let mut chain: Vec<(i32, Arc<PluginEntry>)> = self
            .snapshot()
            .into_iter()
            .filter(|entry| entry.state() == PluginState::Enabled)
            .filter_map(|entry| entry.priority().map(|priority| (priority, entry)))
            .collect();
        chain.sort_by_key(|(priority, entry)| (*priority, entry.sequence()));
        chain.into_iter().map(|(_, entry)| entry).collect()
    }

    pub fn enabled_health_checkers(&self) -> Vec<Arc<PluginEntry>> {
        self.snapshot()
            .into_iter()
            .filter(|entry| entry.state() == PluginState::Enabled && entry.is_health_checker())
            .collect()
    }
}
