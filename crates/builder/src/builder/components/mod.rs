//! Collector components and the module coordinates that provide them.
//!
//! - `catalog` - built-in component table and mandatory defaults
//! - `registry` - immutable lookup snapshot over a catalog

pub mod catalog;
pub mod registry;

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Component category. Declaration order is manifest section order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Extension,
    Receiver,
    Processor,
    Exporter,
    Connector,
    Provider,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Extension,
        Category::Receiver,
        Category::Processor,
        Category::Exporter,
        Category::Connector,
        Category::Provider,
    ];

    /// Categories that appear as top-level sections of a collector config.
    pub const CONFIG_SECTIONS: [Category; 5] = [
        Category::Extension,
        Category::Receiver,
        Category::Processor,
        Category::Exporter,
        Category::Connector,
    ];

    /// Plural section key used by manifests, configs and catalogs.
    pub fn section(self) -> &'static str {
        match self {
            Self::Extension => "extensions",
            Self::Receiver => "receivers",
            Self::Processor => "processors",
            Self::Exporter => "exporters",
            Self::Connector => "connectors",
            Self::Provider => "providers",
        }
    }

    pub fn from_section(section: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.section() == section)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Receiver => "receiver",
            Self::Processor => "processor",
            Self::Exporter => "exporter",
            Self::Connector => "connector",
            Self::Provider => "provider",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a component's module is published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Core,
    Contrib,
    Vendor,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Core => "core",
            Self::Contrib => "contrib",
            Self::Vendor => "vendor",
        };
        f.write_str(s)
    }
}

impl FromStr for Namespace {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Self::Core),
            "contrib" => Ok(Self::Contrib),
            "vendor" => Ok(Self::Vendor),
            _ => Err(ConfigError::UnknownNamespace(s.to_string())),
        }
    }
}

/// A reference to a component by category and logical name.
///
/// Instance qualifiers (`otlp/traces`) are stripped on parse. The optional
/// namespace is an explicit request used to pick contrib over core.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ComponentReference {
    pub category: Category,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
}

impl ComponentReference {
    pub fn new(category: Category, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Parse a component id as written in a collector config
    /// (`type` or `type/instance`).
    pub fn from_config_id(category: Category, id: &str) -> Result<Self, ConfigError> {
        let name = id.split('/').next().unwrap_or_default().trim();
        if !is_type_name(name) {
            return Err(ConfigError::InvalidComponentId(id.to_string()));
        }
        Ok(Self::new(category, name))
    }

    /// Parse a component list entry: a config id with an optional
    /// `@namespace` suffix (`hostmetrics@contrib`).
    pub fn from_list_entry(category: Category, entry: &str) -> Result<Self, ConfigError> {
        match entry.split_once('@') {
            Some((id, namespace)) => {
                Ok(Self::from_config_id(category, id)?.in_namespace(namespace.trim().parse()?))
            }
            None => Self::from_config_id(category, entry),
        }
    }
}

impl fmt::Display for ComponentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.category, self.name)?;
        if let Some(ns) = self.namespace {
            write!(f, " ({ns})")?;
        }
        Ok(())
    }
}

/// Collector type names: a letter followed by letters, digits or underscores.
fn is_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

/// A Go module path plus a version constraint (`<path> v1.2.3`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleCoordinate {
    pub path: String,
    /// Empty when the manifest leaves the version to the generator.
    pub version: String,
}

impl ModuleCoordinate {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }
}

impl FromStr for ModuleCoordinate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let path = parts
            .next()
            .ok_or_else(|| ConfigError::InvalidModule(s.to_string()))?;
        let version = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return Err(ConfigError::InvalidModule(s.to_string()));
        }
        Ok(Self::new(path, version))
    }
}

impl TryFrom<String> for ModuleCoordinate {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ModuleCoordinate> for String {
    fn from(m: ModuleCoordinate) -> Self {
        m.to_string()
    }
}

impl fmt::Display for ModuleCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            f.write_str(&self.path)
        } else {
            write!(f, "{} {}", self.path, self.version)
        }
    }
}

/// A resolved registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub category: Category,
    pub name: String,
    pub module: ModuleCoordinate,
    pub namespace: Namespace,
    /// First distribution version that ships this component.
    pub since: super::versions::Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_id_strips_instance() {
        let r = ComponentReference::from_config_id(Category::Receiver, "otlp/traces").unwrap();
        assert_eq!(r, ComponentReference::new(Category::Receiver, "otlp"));
    }

    #[test]
    fn test_list_entry_namespace() {
        let r = ComponentReference::from_list_entry(Category::Receiver, "hostmetrics@contrib")
            .unwrap();
        assert_eq!(r.name, "hostmetrics");
        assert_eq!(r.namespace, Some(Namespace::Contrib));
        assert!(ComponentReference::from_list_entry(Category::Receiver, "otlp@nope").is_err());
    }

    #[test]
    fn test_invalid_type_names() {
        for id in ["", "/x", "9lives", "bad-name", "ot lp"] {
            assert!(
                ComponentReference::from_config_id(Category::Processor, id).is_err(),
                "{id} should be rejected"
            );
        }
        assert!(ComponentReference::from_config_id(Category::Processor, "k8s_attributes").is_ok());
    }

    #[test]
    fn test_module_coordinate_parse() {
        let m: ModuleCoordinate = "go.opentelemetry.io/collector/receiver/otlpreceiver v0.122.0"
            .parse()
            .unwrap();
        assert_eq!(m.path, "go.opentelemetry.io/collector/receiver/otlpreceiver");
        assert_eq!(m.version, "v0.122.0");
        assert_eq!(m.to_string(), "go.opentelemetry.io/collector/receiver/otlpreceiver v0.122.0");

        let bare: ModuleCoordinate = "example.com/mod".parse().unwrap();
        assert!(bare.version.is_empty());
        assert!("".parse::<ModuleCoordinate>().is_err());
        assert!("a b c".parse::<ModuleCoordinate>().is_err());
    }

    #[test]
    fn test_category_sections_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::from_section(c.section()), Some(c));
        }
        assert_eq!(Category::from_section("service"), None);
    }
}
