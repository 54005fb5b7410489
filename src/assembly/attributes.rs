// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Attribute-level assembly configuration helpers.
//!
//! Builds on the session manager's attribute get/set to expose named,
//! typed attributes ("input_size", "production_trigger", ...) and batched
//! updates with rollback when a write is cut short.

use std::collections::HashMap;

use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::warn;

use crate::{
    client::client::PlcClient,
    errors::{PlcError, Result},
    models::cip::status::STATUS_PARTIAL_TRANSFER,
    session::manager::SessionManager,
};

use super::registry::AssemblyPathRegistry;

/// Description of a CIP attribute commonly used for assemblies.
///
/// Sized specs decode to little-endian integers of exactly that width; a
/// spec without a size passes raw bytes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub attribute_id: u16,
    pub size: Option<usize>,
    pub signed: bool,
}

impl AttributeSpec {
    pub const fn sized(attribute_id: u16, size: usize) -> Self {
        Self {
            attribute_id,
            size: Some(size),
            signed: false,
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<AttributeValue> {
        let Some(expected) = self.size else {
            return Ok(AttributeValue::Raw(Bytes::copy_from_slice(payload)));
        };
        if payload.len() != expected {
            return Err(PlcError::Runtime(format!(
                "Unexpected payload size for attribute 0x{:x}: expected {expected}, got {}",
                self.attribute_id,
                payload.len()
            )));
        }
        let mut raw = [0u8; 8];
        raw[..payload.len()].copy_from_slice(payload);
        let unsigned = u64::from_le_bytes(raw);
        let value = if self.signed {
            // Sign-extend from the declared width.
            let shift = 64 - expected * 8;
            ((unsigned << shift) as i64) >> shift
        } else {
            unsigned as i64
        };
        Ok(AttributeValue::Integer(value))
    }

    pub fn encode(&self, value: &AttributeValue) -> Result<Bytes> {
        match (self.size, value) {
            (None, AttributeValue::Raw(bytes)) => Ok(bytes.clone()),
            (None, AttributeValue::Integer(_)) => Err(PlcError::Runtime(format!(
                "Attribute 0x{:x} expects raw bytes",
                self.attribute_id
            ))),
            (Some(size), AttributeValue::Integer(v)) => {
                let raw = v.to_le_bytes();
                Ok(Bytes::copy_from_slice(&raw[..size]))
            }
            (Some(size), AttributeValue::Raw(bytes)) => {
                if bytes.len() != size {
                    return Err(PlcError::Runtime(format!(
                        "Attribute 0x{:x} expects {size} bytes, got {}",
                        self.attribute_id,
                        bytes.len()
                    )));
                }
                Ok(bytes.clone())
            }
        }
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Integer(i64),
    Raw(Bytes),
}

impl Serialize for AttributeValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Integer(v) => serializer.serialize_i64(*v),
            Self::Raw(bytes) => serializer.serialize_str(&hex::encode(bytes)),
        }
    }
}

/// Specs for the attributes this service knows by name.
pub static COMMON_ATTRIBUTE_SPECS: Lazy<HashMap<&'static str, AttributeSpec>> = Lazy::new(|| {
    HashMap::from([
        ("input_size", AttributeSpec::sized(0x03, 2)),
        ("output_size", AttributeSpec::sized(0x04, 2)),
        ("production_inhibit_time", AttributeSpec::sized(0x09, 2)),
        ("production_trigger", AttributeSpec::sized(0x0B, 1)),
    ])
});

/// Named groups of attributes fetched together.
pub static COMMON_ATTRIBUTE_SETS: Lazy<HashMap<&'static str, Vec<&'static str>>> =
    Lazy::new(|| {
        HashMap::from([
            ("io_sizes", vec!["input_size", "output_size"]),
            ("production", vec!["production_trigger", "production_inhibit_time"]),
        ])
    });

/// High-level helpers to fetch and update assembly attributes.
#[derive(Debug, Clone)]
pub struct AssemblyConfigService {
    registry: AssemblyPathRegistry,
    specs: HashMap<String, AttributeSpec>,
    attribute_sets: HashMap<String, Vec<String>>,
}

impl AssemblyConfigService {
    pub fn new(registry: AssemblyPathRegistry) -> Self {
        Self {
            registry,
            specs: COMMON_ATTRIBUTE_SPECS
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
            attribute_sets: COMMON_ATTRIBUTE_SETS
                .iter()
                .map(|(k, v)| {
                    (
                        (*k).to_string(),
                        v.iter().map(|s| (*s).to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn register_spec(&mut self, name: &str, spec: AttributeSpec) {
        self.specs.insert(name.to_string(), spec);
    }

    pub async fn read_attribute(
        &self,
        manager: &SessionManager,
        client: &mut PlcClient,
        assembly: &str,
        name: &str,
    ) -> Result<AttributeValue> {
        let spec = self.require_spec(name)?;
        let (class_id, instance_id) = self.registry.resolve(assembly)?;
        let payload = manager
            .get_attribute(client, class_id, instance_id, spec.attribute_id)
            .await?;
        spec.decode(&payload)
    }

    pub async fn read_attribute_set(
        &self,
        manager: &SessionManager,
        client: &mut PlcClient,
        assembly: &str,
        set_name: &str,
    ) -> Result<Vec<(String, AttributeValue)>> {
        let names = self.require_attribute_set(set_name)?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let value = self.read_attribute(manager, client, assembly, &name).await?;
            out.push((name, value));
        }
        Ok(out)
    }

    pub async fn write_attribute(
        &self,
        manager: &SessionManager,
        client: &mut PlcClient,
        assembly: &str,
        name: &str,
        value: &AttributeValue,
    ) -> Result<()> {
        let spec = self.require_spec(name)?;
        let (class_id, instance_id) = self.registry.resolve(assembly)?;
        let payload = spec.encode(value)?;
        let status = manager
            .set_attribute(client, class_id, instance_id, spec.attribute_id, payload)
            .await?;
        if !status.ok() {
            return Err(PlcError::response(
                format!("Failed to write attribute '{name}': {}", status.message()),
                status,
            ));
        }
        Ok(())
    }

    /// Apply several attribute writes in order. When one write fails with a
    /// partial-transfer status, the attributes already applied are restored
    /// to their original payloads before the error is returned.
    pub async fn update_attributes(
        &self,
        manager: &SessionManager,
        client: &mut PlcClient,
        assembly: &str,
        values: &[(&str, AttributeValue)],
    ) -> Result<Vec<(String, AttributeValue)>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let (class_id, instance_id) = self.registry.resolve(assembly)?;

        let mut originals: Vec<(AttributeSpec, Bytes)> = Vec::with_capacity(values.len());
        for (name, _) in values {
            let spec = self.require_spec(name)?;
            let payload = manager
                .get_attribute(client, class_id, instance_id, spec.attribute_id)
                .await?;
            originals.push((spec, payload));
        }

        let mut applied = 0usize;
        let mut results = Vec::with_capacity(values.len());
        for (i, (name, value)) in values.iter().enumerate() {
            let spec = originals[i].0;
            let payload = spec.encode(value)?;
            let status = manager
                .set_attribute(client, class_id, instance_id, spec.attribute_id, payload.clone())
                .await?;
            if !status.ok() {
                if status.code == Some(STATUS_PARTIAL_TRANSFER) {
                    self.rollback(manager, client, class_id, instance_id, &originals[..applied])
                        .await;
                }
                return Err(PlcError::response(
                    format!("Failed to write attribute '{name}': {}", status.message()),
                    status,
                ));
            }
            results.push(((*name).to_string(), spec.decode(&payload)?));
            applied += 1;
        }
        Ok(results)
    }

    async fn rollback(
        &self,
        manager: &SessionManager,
        client: &mut PlcClient,
        class_id: u16,
        instance_id: u16,
        applied: &[(AttributeSpec, Bytes)],
    ) {
        for (spec, original) in applied.iter().rev() {
            if let Err(e) = manager
                .set_attribute(client, class_id, instance_id, spec.attribute_id, original.clone())
                .await
            {
                warn!(
                    "rollback of attribute 0x{:x} failed: {e}",
                    spec.attribute_id
                );
            }
        }
    }

    fn require_spec(&self, name: &str) -> Result<AttributeSpec> {
        self.specs
            .get(name)
            .copied()
            .ok_or_else(|| PlcError::Runtime(format!("Unknown attribute '{name}'")))
    }

    fn require_attribute_set(&self, set_name: &str) -> Result<Vec<String>> {
        self.attribute_sets
            .get(set_name)
            .cloned()
            .ok_or_else(|| PlcError::Runtime(format!("Unknown attribute set '{set_name}'")))
    }
}
