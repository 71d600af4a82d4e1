//! Module descriptors
//!
//! A descriptor is the static metadata a module exposes before any of its
//! logic runs. The host reads it at discovery time to decide ordering and to
//! reject duplicate ids, and never mutates it afterwards.

use crate::boundary::{materialize_locally, Materialize};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Priority assumed when a descriptor does not declare one
pub const DEFAULT_PRIORITY: i32 = 100;

/// What a requirement refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    /// A capability bound in the service registry
    #[default]
    Service,
    /// Another module, by id
    Plugin,
}

/// A declared dependency on a capability or module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "type", default)]
    pub kind: RequirementKind,
    pub id: String,
    #[serde(default)]
    pub min: Version,
}

/// Static metadata of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    #[serde(default)]
    pub provides: BTreeSet<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub qml_modules: Vec<String>,
    #[serde(default)]
    pub entry_qml: Option<String>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to parse module descriptor: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("module descriptor has an empty id")]
    EmptyId,
}

impl ModuleDescriptor {
    /// Minimal descriptor with default priority
    #[must_use]
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version,
            vendor: String::new(),
            description: String::new(),
            requires: Vec::new(),
            provides: BTreeSet::new(),
            priority: DEFAULT_PRIORITY,
            qml_modules: Vec::new(),
            entry_qml: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn requiring(mut self, kind: RequirementKind, id: impl Into<String>, min: Version) -> Self {
        self.requires.push(Requirement {
            kind,
            id: id.into(),
            min,
        });
        self
    }

    #[must_use]
    pub fn providing(mut self, capability: impl Into<String>) -> Self {
        self.provides.insert(capability.into());
        self
    }

    #[must_use]
    pub fn with_entry_qml(mut self, entry: impl Into<String>) -> Self {
        self.entry_qml = Some(entry.into());
        self
    }

    /// Parse a descriptor from its JSON text
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the id is empty
    pub fn from_json(text: &str) -> Result<Self, DescriptorError> {
        let descriptor: Self = serde_json::from_str(text)?;
        if descriptor.id.trim().is_empty() {
            return Err(DescriptorError::EmptyId);
        }
        Ok(descriptor)
    }

    /// Serialize the descriptor to JSON text
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Display name, falling back to the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl Materialize for Requirement {
    fn materialize(&self) -> Self {
        Self {
            kind: self.kind,
            id: materialize_locally(&self.id),
            min: self.min,
        }
    }
}

impl Materialize for ModuleDescriptor {
    fn materialize(&self) -> Self {
        Self {
            id: materialize_locally(&self.id),
            name: materialize_locally(&self.name),
            version: self.version,
            vendor: materialize_locally(&self.vendor),
            description: materialize_locally(&self.description),
            requires: self.requires.iter().map(materialize_locally).collect(),
            provides: self.provides.iter().map(materialize_locally).collect(),
            priority: self.priority,
            qml_modules: materialize_locally(&self.qml_modules),
            entry_qml: materialize_locally(&self.entry_qml),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"{
        "id": "com.biiz.rules",
        "name": "Rules Plugin",
        "version": "1.0.0",
        "description": "Business rules management",
        "vendor": "Biiz",
        "requires": [
            {"type": "service", "id": "Navigation", "min": "1.0"}
        ],
        "provides": ["RulesService"],
        "qmlModules": ["Biiz.Rules"],
        "priority": 20
    }"#;

    #[test]
    fn test_parse_full_descriptor() {
        let descriptor = ModuleDescriptor::from_json(RULES).unwrap();
        assert_eq!(descriptor.id, "com.biiz.rules");
        assert_eq!(descriptor.version, Version::new(1, 0, 0));
        assert_eq!(descriptor.priority, 20);
        assert_eq!(descriptor.requires.len(), 1);
        assert_eq!(descriptor.requires[0].kind, RequirementKind::Service);
        assert_eq!(descriptor.requires[0].min, Version::new(1, 0, 0));
        assert!(descriptor.provides.contains("RulesService"));
        assert_eq!(descriptor.qml_modules, vec!["Biiz.Rules".to_string()]);
        assert_eq!(descriptor.entry_qml, None);
    }

    #[test]
    fn test_defaults() {
        let descriptor =
            ModuleDescriptor::from_json(r#"{"id": "minimal", "version": "0.1"}"#).unwrap();
        assert_eq!(descriptor.priority, DEFAULT_PRIORITY);
        assert!(descriptor.requires.is_empty());
        assert_eq!(descriptor.display_name(), "minimal");
    }

    #[test]
    fn test_rejects_empty_id() {
        let result = ModuleDescriptor::from_json(r#"{"id": " ", "version": "1.0"}"#);
        assert!(matches!(result, Err(DescriptorError::EmptyId)));
    }

    #[test]
    fn test_rejects_bad_version() {
        let result = ModuleDescriptor::from_json(r#"{"id": "x", "version": "one"}"#);
        assert!(matches!(result, Err(DescriptorError::Parse(_))));
    }

    #[test]
    fn test_materialized_copy_is_equal() {
        let descriptor = ModuleDescriptor::from_json(RULES).unwrap();
        let copy = materialize_locally(&descriptor);
        assert_eq!(copy, descriptor);
        assert_ne!(copy.id.as_ptr(), descriptor.id.as_ptr());
    }
}
