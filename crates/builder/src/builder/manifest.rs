//! Distribution manifest in the source generator's (OCB) format.

use super::components::catalog::{CONTRIB_PREFIX, CORE_PREFIX};
use super::components::registry::Registry;
use super::components::{Category, ComponentReference, ModuleCoordinate};
use super::error::ManifestError;
use super::versions::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

pub const DEFAULT_MODULE: &str = "github.com/custom/otelcol-distribution";
pub const DEFAULT_NAME: &str = "otelcol-custom";
pub const DEFAULT_DESCRIPTION: &str = "Custom OpenTelemetry Collector distribution";
pub const DEFAULT_DIST_VERSION: &str = "1.0.0";
pub const DEFAULT_OUTPUT_PATH: &str = "./_build";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistMetadata {
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_dist_version")]
    pub version: String,
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

fn default_module() -> String {
    DEFAULT_MODULE.to_string()
}

fn default_dist_version() -> String {
    DEFAULT_DIST_VERSION.to_string()
}

fn default_output_path() -> String {
    DEFAULT_OUTPUT_PATH.to_string()
}

impl Default for DistMetadata {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            name: DEFAULT_NAME.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            version: DEFAULT_DIST_VERSION.to_string(),
            output_path: DEFAULT_OUTPUT_PATH.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfResolver {
    pub default_uri_scheme: String,
}

impl Default for ConfResolver {
    fn default() -> Self {
        Self {
            default_uri_scheme: "env".to_string(),
        }
    }
}

/// One module line of a manifest section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub gomod: ModuleCoordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<ModuleCoordinate> for ModuleEntry {
    fn from(gomod: ModuleCoordinate) -> Self {
        Self {
            gomod,
            import: None,
            name: None,
            path: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub dist: DistMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_resolver: Option<ConfResolver>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processors: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exporters: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
}

impl Manifest {
    /// Parse and validate a manifest document.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_yaml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.dist.name.trim().is_empty() {
            return Err(ManifestError::MissingName);
        }
        for category in Category::ALL {
            let mut seen = HashSet::new();
            for entry in self.section(category) {
                if !seen.insert(entry.gomod.path.as_str()) {
                    return Err(ManifestError::DuplicateModule {
                        category,
                        path: entry.gomod.path.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn section(&self, category: Category) -> &[ModuleEntry] {
        match category {
            Category::Extension => &self.extensions,
            Category::Receiver => &self.receivers,
            Category::Processor => &self.processors,
            Category::Exporter => &self.exporters,
            Category::Connector => &self.connectors,
            Category::Provider => &self.providers,
        }
    }

    fn modules(&self) -> impl Iterator<Item = &ModuleCoordinate> {
        Category::ALL
            .into_iter()
            .flat_map(|c| self.section(c))
            .map(|e| &e.gomod)
    }

    /// Highest version among contrib modules, the collector release the
    /// manifest was written for.
    pub fn contrib_version(&self) -> Option<Version> {
        self.modules()
            .filter(|m| m.path.starts_with(CONTRIB_PREFIX))
            .filter_map(|m| m.version.parse().ok())
            .max()
    }

    /// Collector release targeted by this manifest: the contrib version, or
    /// failing that the highest core component version.
    pub fn collector_version(&self) -> Option<Version> {
        self.contrib_version().or_else(|| {
            Category::CONFIG_SECTIONS
                .into_iter()
                .flat_map(|c| self.section(c))
                .filter(|e| e.gomod.path.starts_with(CORE_PREFIX))
                .filter_map(|e| e.gomod.version.parse().ok())
                .max()
        })
    }

    /// Map the manifest back to component references.
    ///
    /// Modules the registry knows become references; anything else is kept
    /// as a pin so recompiling yields a superset of this manifest.
    pub fn references(
        &self,
        registry: &Registry,
    ) -> (BTreeSet<ComponentReference>, Vec<(Category, ModuleCoordinate)>) {
        let mut references = BTreeSet::new();
        let mut pins = Vec::new();
        for category in Category::ALL {
            for entry in self.section(category) {
                match registry.reverse(category, &entry.gomod.path) {
                    Some(reference) => {
                        references.insert(reference);
                    }
                    None => pins.push((category, entry.gomod.clone())),
                }
            }
        }
        (references, pins)
    }

    /// Render as YAML with the generated-file header.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        let target = self
            .collector_version()
            .map_or_else(|| "unspecified".to_string(), |v| v.tag());
        Ok(format!(
            "# OpenTelemetry Collector Builder manifest generated by distro-builder.\n\
             # Target collector version: {target}\n{body}"
        ))
    }
}
