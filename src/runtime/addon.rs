// src/runtime/addon.rs
// Addon name -> extension factory, used when a graph names its nodes

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::extension::Extension;
use super::fatal::{AbortProcess, FatalHandler};
use super::host::HostEnv;
use super::proxy::ExtensionProxy;
use super::scheduler::{SchedulerConfig, SchedulingMode, SharedScheduler};
use crate::error::{GraphHostError, Result};

type Factory = Arc<dyn Fn(&str) -> Arc<dyn Extension> + Send + Sync>;

struct AddonEntry {
    mode: SchedulingMode,
    factory: Factory,
}

/// Registered addons and the schedulers their instances run on
pub struct AddonRegistry {
    addons: RwLock<HashMap<String, AddonEntry>>,
    shared: Arc<SharedScheduler>,
    config: SchedulerConfig,
    fatal: Arc<dyn FatalHandler>,
}

impl AddonRegistry {
    /// Registry bound to the process-wide shared scheduler. Dedicated
    /// schedulers get the same config as the shared one.
    pub fn new() -> Self {
        let shared = SharedScheduler::global();
        let config = shared.config();
        Self::with_scheduler(shared, config)
    }

    pub fn with_scheduler(shared: Arc<SharedScheduler>, config: SchedulerConfig) -> Self {
        Self {
            addons: RwLock::new(HashMap::new()),
            shared,
            config,
            fatal: Arc::new(AbortProcess),
        }
    }

    pub fn with_fatal_handler(mut self, fatal: Arc<dyn FatalHandler>) -> Self {
        self.fatal = fatal;
        self
    }

    /// Register an addon. The factory receives the instance name.
    pub fn register<F>(&self, addon: impl Into<String>, mode: SchedulingMode, factory: F) -> Result<()>
    where
        F: Fn(&str) -> Arc<dyn Extension> + Send + Sync + 'static,
    {
        let addon = addon.into();
        let mut addons = self
            .addons
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if addons.contains_key(&addon) {
            return Err(GraphHostError::Conflict(format!(
                "addon {addon} is already registered"
            )));
        }

        info!(addon = %addon, mode = mode.as_str(), "Registered addon");
        addons.insert(
            addon,
            AddonEntry {
                mode,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Build an extension from `addon` and bind it to a scheduler
    pub fn create_instance(
        &self,
        addon: &str,
        instance_name: &str,
        host: Arc<dyn HostEnv>,
    ) -> Result<ExtensionProxy> {
        let (mode, factory) = {
            let addons = self
                .addons
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = addons
                .get(addon)
                .ok_or_else(|| GraphHostError::UnknownAddon(addon.to_string()))?;
            (entry.mode, Arc::clone(&entry.factory))
        };

        // Factories run outside the lock; they may be slow or re-enter.
        let extension = factory(instance_name);
        let label = format!("{addon}/{instance_name}");
        let scheduler = mode.attach(&label, &self.shared, self.config)?;

        Ok(ExtensionProxy::new(
            instance_name,
            extension,
            host,
            scheduler,
            Arc::clone(&self.fatal),
        ))
    }

    /// Registered addon names, sorted
    pub fn addons(&self) -> Vec<String> {
        let addons = self
            .addons
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = addons.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AddonRegistry {
    fn default() -> Self {
        Self::new()
    }
}
