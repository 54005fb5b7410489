// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Translate human-readable assembly identifiers into CIP paths.

use std::collections::HashMap;

use crate::{
    errors::{PlcError, Result},
    models::cip::path::{CipPath, parse_class_instance},
};

/// Aliases every device is assumed to expose unless a configuration says
/// otherwise.
pub const DEFAULT_ASSEMBLY_ALIASES: [(&str, (u16, u16)); 3] = [
    ("inputs", (0x04, 0x64)),
    ("outputs", (0x04, 0x65)),
    ("configuration", (0x04, 0x66)),
];

#[derive(Debug, Clone, Default)]
pub struct AssemblyPathRegistry {
    aliases: HashMap<String, (u16, u16)>,
}

impl AssemblyPathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, (class_id, instance_id)) in DEFAULT_ASSEMBLY_ALIASES {
            registry.register(name, class_id, instance_id);
        }
        registry
    }

    pub fn register(&mut self, name: &str, class_id: u16, instance_id: u16) {
        self.aliases
            .insert(name.trim().to_ascii_lowercase(), (class_id, instance_id));
    }

    /// Resolve an alias or a `class/instance` textual form.
    pub fn resolve(&self, identifier: &str) -> Result<(u16, u16)> {
        let token = identifier.trim().to_ascii_lowercase();
        if let Some(&pair) = self.aliases.get(&token) {
            return Ok(pair);
        }
        parse_class_instance(identifier)
            .map_err(|_| PlcError::Manager(format!("Unknown assembly alias '{identifier}'")))
    }

    pub fn path_for(&self, identifier: &str, attribute_id: Option<u16>) -> Result<CipPath> {
        let (class_id, instance_id) = self.resolve(identifier)?;
        let path = CipPath::make(class_id, instance_id);
        Ok(match attribute_id {
            Some(attr) => path.with_attribute(attr),
            None => path,
        })
    }
}
