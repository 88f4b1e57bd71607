//! Folder tree of an environment specification
//!
//! Folder nodes arrive as plain YAML mappings where control keys and child
//! folders share one namespace. They are converted once, at load time, into
//! the tagged [`FolderNode`] tree the walker consumes: a mapping that carries a
//! `services` key is a [`BaseFolder`], anything else is a [`ParentFolder`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::InstanceSpec;
use crate::error::{LabforgeError, LabforgeResult};

/// Keys with engine meaning; everything else in a folder mapping is a child
pub const RESERVED_KEYS: [&str; 6] = [
    "instances",
    "description",
    "group",
    "master-group",
    "enabled",
    "services",
];

/// Control settings shared by both folder kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSettings {
    pub enabled: bool,
    pub group: Option<String>,
    pub master_group: Option<String>,
    pub instances: Option<InstanceSpec>,
    pub description: Option<String>,
}

impl Default for FolderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            group: None,
            master_group: None,
            instances: None,
            description: None,
        }
    }
}

/// One service instance declared in a base folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstanceSpec {
    /// Name of the service definition this instance is built from
    #[serde(rename = "service")]
    pub service_ref: String,

    /// Networks for the instance's NICs, in slot order
    #[serde(default)]
    pub networks: Vec<String>,

    #[serde(default)]
    pub instances: Option<InstanceSpec>,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParentFolder {
    pub settings: FolderSettings,
    pub children: Vec<(String, FolderNode)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaseFolder {
    pub settings: FolderSettings,
    pub services: IndexMap<String, ServiceInstanceSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FolderNode {
    Parent(ParentFolder),
    Base(BaseFolder),
}

impl FolderNode {
    pub fn settings(&self) -> &FolderSettings {
        match self {
            FolderNode::Parent(folder) => &folder.settings,
            FolderNode::Base(folder) => &folder.settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FolderNode::Parent(_) => "parent",
            FolderNode::Base(_) => "base",
        }
    }
}

impl ParentFolder {
    /// Depth-first visit of every base folder with its slash-joined path
    pub fn visit_base_folders<'a, F>(&'a self, path: &str, visit: &mut F)
    where
        F: FnMut(&str, &'a BaseFolder),
    {
        for (name, child) in &self.children {
            let child_path = format!("{}/{}", path, name);
            match child {
                FolderNode::Base(base) => visit(&child_path, base),
                FolderNode::Parent(parent) => parent.visit_base_folders(&child_path, visit),
            }
        }
    }

    /// Number of folder nodes below this one
    pub fn folder_count(&self) -> usize {
        self.children
            .iter()
            .map(|(_, child)| match child {
                FolderNode::Base(_) => 1,
                FolderNode::Parent(parent) => 1 + parent.folder_count(),
            })
            .sum()
    }
}

/// Convert the top-level `folders` mapping into the root parent folder
pub(crate) fn parse_root(map: &Mapping) -> LabforgeResult<ParentFolder> {
    match parse_folder("folders", map)? {
        FolderNode::Parent(root) => Ok(root),
        FolderNode::Base(_) => Err(LabforgeError::invalid_spec(
            "folders",
            "the top-level folder mapping cannot declare services",
        )),
    }
}

pub(crate) fn parse_folder(path: &str, map: &Mapping) -> LabforgeResult<FolderNode> {
    let settings = parse_settings(path, map)?;

    if let Some(services) = map.get("services") {
        for (key, _) in map {
            let name = key_name(path, key)?;
            if !RESERVED_KEYS.contains(&name) {
                return Err(LabforgeError::invalid_spec(
                    format!("{}.{}", path, name),
                    "base folders may only contain services and control keys",
                ));
            }
        }

        let services: IndexMap<String, ServiceInstanceSpec> =
            serde_yaml::from_value(services.clone()).map_err(|e| {
                LabforgeError::invalid_spec(format!("{}.services", path), e.to_string())
            })?;
        for entry in services.keys() {
            check_object_name(&format!("{}.services.{}", path, entry), entry)?;
        }

        return Ok(FolderNode::Base(BaseFolder { settings, services }));
    }

    let mut children = Vec::new();
    for (key, value) in map {
        let name = key_name(path, key)?;
        if RESERVED_KEYS.contains(&name) {
            continue;
        }

        let child_path = format!("{}.{}", path, name);
        check_object_name(&child_path, name)?;
        match value {
            Value::Mapping(child) => {
                children.push((name.to_string(), parse_folder(&child_path, child)?));
            }
            other => {
                return Err(LabforgeError::invalid_spec(
                    child_path,
                    format!("expected a folder mapping, found {}", value_kind(other)),
                ));
            }
        }
    }

    Ok(FolderNode::Parent(ParentFolder { settings, children }))
}

fn parse_settings(path: &str, map: &Mapping) -> LabforgeResult<FolderSettings> {
    let mut settings = FolderSettings::default();

    if let Some(value) = map.get("enabled") {
        settings.enabled = value.as_bool().ok_or_else(|| {
            LabforgeError::invalid_spec(format!("{}.enabled", path), "expected a boolean")
        })?;
    }

    settings.group = optional_string(path, map, "group")?;
    settings.master_group = optional_string(path, map, "master-group")?;
    settings.description = optional_string(path, map, "description")?;

    if let Some(value) = map.get("instances") {
        let instances = serde_yaml::from_value(value.clone()).map_err(|e| {
            LabforgeError::invalid_spec(format!("{}.instances", path), e.to_string())
        })?;
        settings.instances = Some(instances);
    }

    Ok(settings)
}

fn optional_string(path: &str, map: &Mapping, key: &str) -> LabforgeResult<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(LabforgeError::invalid_spec(
            format!("{}.{}", path, key),
            format!("expected a string, found {}", value_kind(other)),
        )),
    }
}

fn key_name<'a>(path: &str, key: &'a Value) -> LabforgeResult<&'a str> {
    key.as_str().ok_or_else(|| {
        LabforgeError::invalid_spec(path, format!("folder keys must be strings, found {}", value_kind(key)))
    })
}

/// Folder and VM names are single path segments in the inventory
fn check_object_name(path: &str, name: &str) -> LabforgeResult<()> {
    if name.contains('/') {
        return Err(LabforgeError::invalid_spec(
            path,
            format!("'{}' may not contain '/'", name),
        ));
    }
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
