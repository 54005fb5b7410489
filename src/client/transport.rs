// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport selection for [`PlcClient`](super::client::PlcClient).
//!
//! `Tcp` is the real thing. `Offline` skips the socket entirely and serves
//! attribute traffic from an in-memory fixture store, so the session
//! manager, runtime and orchestrator can be exercised without a PLC.

use std::collections::HashMap;

use bytes::Bytes;

/// Canned attribute payloads keyed by `(class_id, instance_id)`.
#[derive(Debug, Clone, Default)]
pub struct FixtureStore {
    attributes: HashMap<(u16, u16), HashMap<u16, Bytes>>,
}

impl FixtureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixtures for the three default assemblies: instance 0x64 (inputs),
    /// 0x65 (outputs) and 0x66 (configuration) of the Assembly class, each
    /// with input/output size, production inhibit time and trigger.
    pub fn with_default_fixtures() -> Self {
        let mut store = Self::new();
        store.register(0x04, 0x64, [
            (0x03u16, 16u16.to_le_bytes().to_vec()),
            (0x04, 0u16.to_le_bytes().to_vec()),
            (0x09, 10u16.to_le_bytes().to_vec()),
            (0x0B, vec![1]),
        ]);
        store.register(0x04, 0x65, [
            (0x03u16, 0u16.to_le_bytes().to_vec()),
            (0x04, 16u16.to_le_bytes().to_vec()),
            (0x09, 10u16.to_le_bytes().to_vec()),
            (0x0B, vec![1]),
        ]);
        store.register(0x04, 0x66, [
            (0x03u16, 4u16.to_le_bytes().to_vec()),
            (0x04, 4u16.to_le_bytes().to_vec()),
            (0x09, 5u16.to_le_bytes().to_vec()),
            (0x0B, vec![2]),
        ]);
        store
    }

    /// Register (or replace) the canned attributes of one object instance.
    pub fn register<I, V>(&mut self, class_id: u16, instance_id: u16, attributes: I)
    where
        I: IntoIterator<Item = (u16, V)>,
        V: Into<Bytes>,
    {
        let slot = self.attributes.entry((class_id, instance_id)).or_default();
        slot.clear();
        for (attr, value) in attributes {
            slot.insert(attr, value.into());
        }
    }

    pub fn get(&self, class_id: u16, instance_id: u16, attribute_id: u16) -> Option<Bytes> {
        self.attributes
            .get(&(class_id, instance_id))
            .and_then(|attrs| attrs.get(&attribute_id))
            .cloned()
    }

    pub fn set(&mut self, class_id: u16, instance_id: u16, attribute_id: u16, value: Bytes) {
        self.attributes
            .entry((class_id, instance_id))
            .or_default()
            .insert(attribute_id, value);
    }

    pub fn clear(&mut self) {
        self.attributes.clear();
    }

    /// Instance ids registered for a class, ascending.
    pub fn instances_of(&self, class_id: u16) -> Vec<u32> {
        let mut instances: Vec<u32> = self
            .attributes
            .keys()
            .filter(|(class, _)| *class == class_id)
            .map(|(_, instance)| u32::from(*instance))
            .collect();
        instances.sort_unstable();
        instances
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// How a client reaches its PLC.
#[derive(Debug, Clone, Default)]
pub enum Transport {
    #[default]
    Tcp,
    Offline(FixtureStore),
}

impl Transport {
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }

    /// Offline transport seeded with the default assembly fixtures.
    pub fn offline_with_defaults() -> Self {
        Self::Offline(FixtureStore::with_default_fixtures())
    }
}
