// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-memory holder for the currently loaded device configuration.

use std::sync::{Arc, RwLock};

use crate::assembly::registry::AssemblyPathRegistry;

use super::config::DeviceConfiguration;

/// Snapshot of the currently loaded configuration.
#[derive(Debug, Clone)]
pub struct ConfigurationState {
    pub configuration: Option<Arc<DeviceConfiguration>>,
    pub registry: AssemblyPathRegistry,
}

impl ConfigurationState {
    pub fn loaded(&self) -> bool {
        self.configuration.is_some()
    }
}

/// Lock-guarded storage for device configuration metadata.
#[derive(Debug)]
pub struct ConfigurationStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    configuration: Option<Arc<DeviceConfiguration>>,
    registry: AssemblyPathRegistry,
}

impl Default for ConfigurationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                configuration: None,
                registry: AssemblyPathRegistry::with_defaults(),
            }),
        }
    }

    /// Persist the configuration and rebuild the alias registry from it.
    pub fn load(&self, configuration: DeviceConfiguration) -> ConfigurationState {
        let configuration = Arc::new(configuration);
        let mut registry = AssemblyPathRegistry::with_defaults();
        for (alias, (class_id, instance_id)) in configuration.alias_mapping() {
            registry.register(&alias, class_id, instance_id);
        }
        let mut inner = self.inner.write().expect("configuration store poisoned");
        inner.configuration = Some(Arc::clone(&configuration));
        inner.registry = registry.clone();
        ConfigurationState {
            configuration: Some(configuration),
            registry,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("configuration store poisoned");
        inner.configuration = None;
        inner.registry = AssemblyPathRegistry::with_defaults();
    }

    pub fn state(&self) -> ConfigurationState {
        let inner = self.inner.read().expect("configuration store poisoned");
        ConfigurationState {
            configuration: inner.configuration.clone(),
            registry: inner.registry.clone(),
        }
    }

    pub fn registry(&self) -> AssemblyPathRegistry {
        self.inner
            .read()
            .expect("configuration store poisoned")
            .registry
            .clone()
    }

    pub fn configuration(&self) -> Option<Arc<DeviceConfiguration>> {
        self.inner
            .read()
            .expect("configuration store poisoned")
            .configuration
            .clone()
    }
}
