//! One kernel manager per device.
//!
//! `KernelManagers` is an explicit registry owned by the caller: managers
//! are created lazily the first time a device is seen and live as long as
//! the registry does.

use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_core::Backend;

use crate::config::CompileConfig;
use crate::manager::{CacheStats, KernelManager};

/// Kernel managers keyed by device ordinal.
pub struct KernelManagers<B: Backend> {
    config: CompileConfig,
    managers: BTreeMap<usize, KernelManager<B>>,
}

impl<B: Backend> KernelManagers<B> {
    /// Managers created by this registry compile with `config`.
    pub fn new(config: CompileConfig) -> Self {
        Self { config, managers: BTreeMap::new() }
    }

    /// The manager for `backend`'s device, created on first use.
    ///
    /// Devices are identified by ordinal; a later call with a different
    /// backend for the same ordinal gets the existing manager.
    pub fn manager(&mut self, backend: &Arc<B>) -> &mut KernelManager<B> {
        let ordinal = backend.device().ordinal;
        let config = &self.config;
        self.managers.entry(ordinal).or_insert_with(|| {
            tracing::debug!("creating kernel manager for {}", backend.device());
            KernelManager::with_config(Arc::clone(backend), config.clone())
        })
    }

    pub fn get(&self, ordinal: usize) -> Option<&KernelManager<B>> {
        self.managers.get(&ordinal)
    }

    pub fn get_mut(&mut self, ordinal: usize) -> Option<&mut KernelManager<B>> {
        self.managers.get_mut(&ordinal)
    }

    /// Managers in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &KernelManager<B>> {
        self.managers.values()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Statistics summed over every device.
    pub fn total_stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for manager in self.managers.values() {
            total.merge(manager.stats());
        }
        total
    }
}

impl<B: Backend> Default for KernelManagers<B> {
    fn default() -> Self {
        Self::new(CompileConfig::default())
    }
}
