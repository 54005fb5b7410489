// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Device configuration documents.
//!
//! A configuration describes the PLC identity and the assembly objects the
//! runtime will poll and produce:
//!
//! ```xml
//! <Device>
//!   <Identity name="demo" vendor="acme" />
//!   <Assemblies>
//!     <Assembly alias="inputs" class_id="0x04" instance_id="0x64"
//!               direction="input" size="16">
//!       <Member name="conveyor" offset="0" size="2" datatype="UINT" />
//!     </Assembly>
//!   </Assemblies>
//! </Device>
//! ```
//!
//! Assemblies are read from `<Assemblies><Assembly>` blocks directly under
//! the root; when no such block declares any, `<Assembly>` elements that are
//! themselves direct children of the root are used instead. The two forms
//! are never merged, and `<Assembly>` elements at any other depth are
//! ignored.

use quick_xml::{Reader, events::Event};
use serde::Serialize;

use crate::{
    errors::{PlcError, Result},
    models::cip::path::CipPath,
};

/// Traffic direction of an assembly relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyDirection {
    Input,
    Output,
    Configuration,
    Bidirectional,
}

impl AssemblyDirection {
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text.trim().to_ascii_lowercase().as_str() {
            "input" => Self::Input,
            "output" => Self::Output,
            // "config" is accepted as shorthand in existing documents.
            "configuration" | "config" => Self::Configuration,
            "bidirectional" => Self::Bidirectional,
            _ => return None,
        })
    }

    /// Assemblies the poll workers read.
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::Bidirectional)
    }

    /// Assemblies the dispatch workers write.
    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::Bidirectional)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Configuration => "configuration",
            Self::Bidirectional => "bidirectional",
        }
    }
}

/// Metadata describing the identity of the target PLC device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub product_code: Option<String>,
    pub revision: Option<String>,
    pub serial_number: Option<String>,
}

/// Metadata describing a member within an assembly payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyMember {
    pub name: String,
    pub datatype: Option<String>,
    pub direction: Option<String>,
    pub offset: Option<usize>,
    pub size: Option<usize>,
    pub description: Option<String>,
}

/// One assembly declared in the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyDefinition {
    pub alias: String,
    pub class_id: u16,
    pub instance_id: u16,
    pub direction: AssemblyDirection,
    pub size: Option<usize>,
    pub members: Vec<AssemblyMember>,
}

impl AssemblyDefinition {
    pub fn to_cip_path(&self, attribute_id: Option<u16>) -> CipPath {
        let path = CipPath::make(self.class_id, self.instance_id);
        match attribute_id {
            Some(attr) => path.with_attribute(attr),
            None => path,
        }
    }
}

/// Container for the parsed configuration metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceConfiguration {
    pub identity: DeviceIdentity,
    pub assemblies: Vec<AssemblyDefinition>,
}

impl DeviceConfiguration {
    /// Alias → (class, instance) view over the declared assemblies, keys
    /// lower-cased.
    pub fn alias_mapping(&self) -> Vec<(String, (u16, u16))> {
        self.assemblies
            .iter()
            .map(|a| {
                (
                    a.alias.trim().to_ascii_lowercase(),
                    (a.class_id, a.instance_id),
                )
            })
            .collect()
    }
}

/// An `<Assembly>` element that has been consumed off the reader but whose
/// validation is deferred until its group is selected.
type PendingAssembly = std::result::Result<AssemblyDefinition, PlcError>;

/// Parse an XML payload into a [`DeviceConfiguration`].
pub fn load_configuration(xml_payload: &str) -> Result<DeviceConfiguration> {
    let mut reader = Reader::from_str(xml_payload);
    reader.config_mut().trim_text(true);

    let mut identity = DeviceIdentity::default();
    // Assemblies under a root-level <Assemblies> block, and the flat
    // direct-children-of-root fallback. Never merged.
    let mut nested: Vec<PendingAssembly> = Vec::new();
    let mut flat: Vec<PendingAssembly> = Vec::new();

    let mut root_seen = false;
    // Element stack of lower-cased names, root excluded.
    let mut stack: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                let empty = matches!(event, Event::Empty(_));

                if !root_seen {
                    if !matches!(name.as_str(), "device" | "deviceconfiguration" | "plc") {
                        return Err(PlcError::ConfigValidation(
                            "Root element must be <Device>, <DeviceConfiguration>, or <Plc>"
                                .into(),
                        ));
                    }
                    root_seen = true;
                    continue;
                }

                match name.as_str() {
                    "identity" => {
                        for (key, value) in element_attributes(e)? {
                            match key.as_str() {
                                "name" => identity.name = non_empty(value),
                                "vendor" => identity.vendor = non_empty(value),
                                "product" => identity.product_code = non_empty(value),
                                "revision" => identity.revision = non_empty(value),
                                "serial" => identity.serial_number = non_empty(value),
                                _ => {}
                            }
                        }
                    }
                    "assembly" => {
                        let in_assemblies =
                            stack.len() == 1 && stack[0] == "assemblies";
                        let at_root = stack.is_empty();
                        if !in_assemblies && !at_root {
                            // Buried deeper than either recognized form.
                            if !empty {
                                skip_element(&mut reader)?;
                            }
                            continue;
                        }
                        let group = if in_assemblies { &mut nested } else { &mut flat };
                        match parse_assembly(&mut reader, e, empty) {
                            Ok(assembly) => group.push(Ok(assembly)),
                            Err(err @ PlcError::ConfigParse(_)) => return Err(err),
                            Err(err) => group.push(Err(err)),
                        }
                        continue;
                    }
                    // Identity child elements carry their value as text.
                    "name" | "vendor" | "product" | "revision" | "serialnumber"
                        if stack.last().map(String::as_str) == Some("identity") => {}
                    _ => {}
                }
                if !empty {
                    stack.push(name);
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                if stack.iter().any(|s| s == "identity") {
                    match stack.last().map(String::as_str) {
                        Some("name") => identity.name.get_or_insert(text),
                        Some("vendor") => identity.vendor.get_or_insert(text),
                        Some("product") => identity.product_code.get_or_insert(text),
                        Some("revision") => identity.revision.get_or_insert(text),
                        Some("serialnumber") => identity.serial_number.get_or_insert(text),
                        _ => continue,
                    };
                }
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(PlcError::ConfigParse("Malformed XML payload: empty document".into()));
    }

    // Nested assemblies take exclusive priority; the flat form is only
    // consulted (and only then validated) when no nested assembly exists.
    let assemblies = {
        let from_blocks = finalize_group(nested)?;
        if from_blocks.is_empty() {
            finalize_group(flat)?
        } else {
            from_blocks
        }
    };

    Ok(DeviceConfiguration {
        identity,
        assemblies,
    })
}

/// Surface the first deferred error of a group and enforce alias uniqueness
/// within it.
fn finalize_group(group: Vec<PendingAssembly>) -> Result<Vec<AssemblyDefinition>> {
    let mut assemblies = Vec::with_capacity(group.len());
    let mut seen_aliases: Vec<String> = Vec::new();
    for pending in group {
        let assembly = pending?;
        let token = assembly.alias.trim().to_ascii_lowercase();
        if seen_aliases.contains(&token) {
            return Err(PlcError::ConfigValidation(format!(
                "Duplicate assembly alias '{}'",
                assembly.alias
            )));
        }
        seen_aliases.push(token);
        assemblies.push(assembly);
    }
    Ok(assemblies)
}

/// Member attributes and text captured before validation.
struct RawMember {
    attrs: Vec<(String, String)>,
    text: Option<String>,
}

/// Parse one `<Assembly>` element.
///
/// The whole subtree is consumed before any attribute is validated, so the
/// reader is positioned past the element even when the assembly itself is
/// invalid; only reader-level failures surface as `ConfigParse`.
fn parse_assembly(
    reader: &mut Reader<&[u8]>,
    element: &quick_xml::events::BytesStart<'_>,
    empty: bool,
) -> std::result::Result<AssemblyDefinition, PlcError> {
    let attrs = element_attributes(element)?;

    let mut raw_members: Vec<RawMember> = Vec::new();
    if !empty {
        loop {
            let event = reader
                .read_event()
                .map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                    let member_empty = matches!(event, Event::Empty(_));
                    if name == "member" {
                        let member_attrs = element_attributes(e)?;
                        let text = if member_empty {
                            None
                        } else {
                            consume_member_text(reader)?
                        };
                        raw_members.push(RawMember {
                            attrs: member_attrs,
                            text,
                        });
                    } else if !member_empty {
                        skip_element(reader)?;
                    }
                }
                Event::End(_) => break,
                Event::Eof => {
                    return Err(PlcError::ConfigParse(
                        "Malformed XML payload: unterminated <Assembly>".into(),
                    ));
                }
                _ => {}
            }
        }
    }

    let alias = require_attr(&attrs, "assembly", "alias")?;
    let class_id = parse_int(&require_attr(&attrs, "assembly", "class_id")?)?;
    let instance_id = parse_int(&require_attr(&attrs, "assembly", "instance_id")?)?;
    let direction_text = require_attr(&attrs, "assembly", "direction")?;
    let direction = AssemblyDirection::parse(&direction_text).ok_or_else(|| {
        PlcError::ConfigValidation(format!(
            "Assembly '{alias}' has unsupported direction '{}'",
            direction_text.trim().to_ascii_lowercase()
        ))
    })?;
    let size = parse_optional_int(attrs.iter().find(|(k, _)| k == "size").map(|(_, v)| v))?;

    let mut members = Vec::with_capacity(raw_members.len());
    for raw in raw_members {
        members.push(build_member(raw)?);
    }

    Ok(AssemblyDefinition {
        alias,
        class_id,
        instance_id,
        direction,
        size: size.map(|v| v as usize),
        members,
    })
}

/// Consume a `<Member>` body, keeping the first non-empty text run.
fn consume_member_text(reader: &mut Reader<&[u8]>) -> Result<Option<String>> {
    let mut text: Option<String> = None;
    loop {
        match reader
            .read_event()
            .map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?
        {
            Event::Text(t) => {
                let run = t
                    .unescape()
                    .map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?
                    .trim()
                    .to_string();
                if text.is_none() && !run.is_empty() {
                    text = Some(run);
                }
            }
            Event::Start(_) => skip_element(reader)?,
            Event::End(_) => break,
            Event::Eof => {
                return Err(PlcError::ConfigParse(
                    "Malformed XML payload: unterminated <Member>".into(),
                ));
            }
            _ => {}
        }
    }
    Ok(text)
}

fn build_member(raw: RawMember) -> std::result::Result<AssemblyMember, PlcError> {
    let name = require_attr(&raw.attrs, "member", "name")?;
    Ok(AssemblyMember {
        name,
        datatype: find_attr(&raw.attrs, "datatype"),
        direction: find_attr(&raw.attrs, "direction"),
        offset: parse_optional_int(raw.attrs.iter().find(|(k, _)| k == "offset").map(|(_, v)| v))?
            .map(|v| v as usize),
        size: parse_optional_int(raw.attrs.iter().find(|(k, _)| k == "size").map(|(_, v)| v))?
            .map(|v| v as usize),
        description: find_attr(&raw.attrs, "description").or(raw.text),
    })
}

/// Consume events until the element opened last is closed.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<()> {
    let mut depth = 1usize;
    loop {
        match reader
            .read_event()
            .map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?
        {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(PlcError::ConfigParse(
                    "Malformed XML payload: unterminated element".into(),
                ));
            }
            _ => {}
        }
    }
}

fn element_attributes(
    element: &quick_xml::events::BytesStart<'_>,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        let value = attr
            .unescape_value()
            .map_err(|e| PlcError::ConfigParse(format!("Malformed XML payload: {e}")))?
            .to_string();
        out.push((key, value));
    }
    Ok(out)
}

fn find_attr(attrs: &[(String, String)], name: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
        .and_then(non_empty)
}

fn require_attr(attrs: &[(String, String)], element: &str, name: &str) -> Result<String> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            PlcError::ConfigValidation(format!(
                "Element <{element}> is missing required attribute '{name}'"
            ))
        })
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_int(value: &str) -> Result<u16> {
    let v = value.trim();
    let (digits, radix) = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (v, 10),
    };
    u16::from_str_radix(digits, radix)
        .map_err(|_| PlcError::ConfigValidation(format!("Invalid integer value '{value}'")))
}

fn parse_optional_int(value: Option<&String>) -> Result<Option<u16>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => parse_int(v).map(Some),
    }
}
