//! Manifest compiler.
//!
//! Resolves component references against a registry snapshot, merges the
//! mandatory defaults and emits a manifest plus the components it could not
//! resolve. Equal inputs produce byte-identical manifests.

use super::components::catalog::{
    DEFAULT_PROVIDERS, DEFAULT_REPLACES, VENDOR_BUNDLE, VENDOR_REPLACES,
    VENDOR_VERSION_PLACEHOLDER,
};
use super::components::registry::{LookupError, Registry};
use super::components::{Category, ComponentReference, ModuleCoordinate, Namespace};
use super::error::CompileError;
use super::manifest::{ConfResolver, DistMetadata, Manifest, ModuleEntry};
use super::versions::{Version, VersionTable};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub dist: DistMetadata,
    pub collector_version: Version,
    /// Append the vendor bundle and its replace directives.
    pub include_vendor: bool,
    /// Hand-pinned modules, inserted ahead of resolved references.
    pub pins: Vec<(Category, ModuleCoordinate)>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            dist: DistMetadata::default(),
            collector_version: VersionTable::builtin().default_version(),
            include_vendor: true,
            pins: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    Unknown,
    RequiresVersion { since: Version },
}

/// A reference the registry could not satisfy. Reported, never dropped silently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnresolvedComponent {
    pub category: Category,
    pub name: String,
    pub reason: UnresolvedReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for UnresolvedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            UnresolvedReason::Unknown => write!(f, "unknown {} '{}'", self.category, self.name)?,
            UnresolvedReason::RequiresVersion { since } => write!(
                f,
                "{} '{}' requires collector {} or newer",
                self.category, self.name, since
            )?,
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean '{suggestion}'?)")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Compilation {
    pub manifest: Manifest,
    pub unresolved: Vec<UnresolvedComponent>,
}

/// Per-category module lists keyed by path, in insertion order.
#[derive(Default)]
struct Sections(BTreeMap<Category, IndexMap<String, ModuleCoordinate>>);

impl Sections {
    fn insert(&mut self, category: Category, module: ModuleCoordinate) -> Result<(), CompileError> {
        let section = self.0.entry(category).or_default();
        match section.get(&module.path) {
            Some(existing) if existing.version == module.version => Ok(()),
            Some(existing) => Err(CompileError::AmbiguousVersion {
                category,
                path: module.path.clone(),
                existing: existing.version.clone(),
                requested: module.version,
            }),
            None => {
                section.insert(module.path.clone(), module);
                Ok(())
            }
        }
    }

    fn take(&mut self, category: Category) -> Vec<ModuleEntry> {
        self.0
            .remove(&category)
            .map(|s| s.into_values().map(ModuleEntry::from).collect())
            .unwrap_or_default()
    }
}

/// Compile references into a manifest.
pub fn compile(
    registry: &Registry,
    references: &BTreeSet<ComponentReference>,
    options: &CompileOptions,
) -> Result<Compilation, CompileError> {
    let version = &options.collector_version;
    let mut sections = Sections::default();
    let mut unresolved = Vec::new();

    for (category, module) in &options.pins {
        sections.insert(*category, module.clone())?;
    }

    // BTreeSet order is category order, then name.
    for reference in references {
        match registry.lookup(reference, version) {
            Ok(resolution) => {
                for entry in resolution.entries() {
                    sections.insert(entry.category, entry.module.clone())?;
                }
            }
            Err(err) => {
                let reason = match err {
                    LookupError::NotFound => UnresolvedReason::Unknown,
                    LookupError::VersionMismatch { since, .. } => {
                        UnresolvedReason::RequiresVersion { since }
                    }
                };
                let suggestion = match reason {
                    UnresolvedReason::Unknown => registry
                        .suggest(reference.category, &reference.name)
                        .into_iter()
                        .next(),
                    UnresolvedReason::RequiresVersion { .. } => None,
                };
                debug!(%reference, ?reason, "unresolved component");
                unresolved.push(UnresolvedComponent {
                    category: reference.category,
                    name: reference.name.clone(),
                    reason,
                    suggestion,
                });
            }
        }
    }

    for name in DEFAULT_PROVIDERS {
        let reference = ComponentReference::new(Category::Provider, *name);
        add_default(registry, &mut sections, reference, version)?;
    }
    if options.include_vendor {
        for (category, name) in VENDOR_BUNDLE {
            let reference =
                ComponentReference::new(*category, *name).in_namespace(Namespace::Vendor);
            add_default(registry, &mut sections, reference, version)?;
        }
    }

    let mut replaces: IndexSet<String> = DEFAULT_REPLACES
        .iter()
        .map(|(old, new)| format!("{old} => {new}"))
        .collect();
    if options.include_vendor {
        let tag = registry.vendor_version().tag();
        replaces.extend(VENDOR_REPLACES.iter().map(|(old, new)| {
            format!("{old} => {}", new.replace(VENDOR_VERSION_PLACEHOLDER, &tag))
        }));
    }

    let manifest = Manifest {
        dist: options.dist.clone(),
        conf_resolver: Some(ConfResolver::default()),
        extensions: sections.take(Category::Extension),
        receivers: sections.take(Category::Receiver),
        processors: sections.take(Category::Processor),
        exporters: sections.take(Category::Exporter),
        connectors: sections.take(Category::Connector),
        providers: sections.take(Category::Provider),
        replaces: replaces.into_iter().collect(),
    };
    Ok(Compilation {
        manifest,
        unresolved,
    })
}

fn add_default(
    registry: &Registry,
    sections: &mut Sections,
    reference: ComponentReference,
    version: &Version,
) -> Result<(), CompileError> {
    let resolution = registry
        .lookup(&reference, version)
        .map_err(|err| CompileError::MissingDefault {
            category: reference.category,
            name: reference.name.clone(),
            reason: match err {
                LookupError::NotFound => "not found".to_string(),
                LookupError::VersionMismatch { since, .. } => {
                    format!("requires collector {since} or newer")
                }
            },
        })?;
    for entry in resolution.entries() {
        sections.insert(entry.category, entry.module.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::config;

    fn refs(entries: &[(Category, &str)]) -> BTreeSet<ComponentReference> {
        entries
            .iter()
            .map(|(c, n)| ComponentReference::new(*c, *n))
            .collect()
    }

    fn paths(manifest: &Manifest, category: Category) -> Vec<String> {
        manifest
            .section(category)
            .iter()
            .map(|e| e.gomod.path.clone())
            .collect()
    }

    #[test]
    fn test_compile_is_deterministic() {
        let registry = Registry::builtin();
        let a = refs(&[(Category::Exporter, "debug"), (Category::Receiver, "otlp")]);
        let b = refs(&[(Category::Receiver, "otlp"), (Category::Exporter, "debug")]);
        let options = CompileOptions::default();
        let first = compile(&registry, &a, &options).unwrap().manifest.to_yaml().unwrap();
        let second = compile(&registry, &b, &options).unwrap().manifest.to_yaml().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_defaults_are_appended() {
        let registry = Registry::builtin();
        let compiled = compile(
            &registry,
            &refs(&[(Category::Receiver, "otlp")]),
            &CompileOptions::default(),
        )
        .unwrap();
        let manifest = compiled.manifest;
        assert_eq!(manifest.providers.len(), DEFAULT_PROVIDERS.len());
        assert_eq!(
            paths(&manifest, Category::Receiver),
            vec![
                "go.opentelemetry.io/collector/receiver/otlpreceiver",
                "github.com/observiq/bindplane-otel-collector/receiver/pluginreceiver",
                "github.com/observiq/bindplane-otel-collector/receiver/routereceiver",
            ]
        );
        assert_eq!(manifest.replaces.len(), DEFAULT_REPLACES.len() + VENDOR_REPLACES.len());
        assert!(manifest.replaces.iter().all(|r| !r.contains("__VENDOR_VERSION__")));
        assert!(compiled.unresolved.is_empty());
    }

    #[test]
    fn test_vendor_bundle_can_be_suppressed() {
        let options = CompileOptions {
            include_vendor: false,
            ..CompileOptions::default()
        };
        let manifest = compile(&Registry::builtin(), &BTreeSet::new(), &options)
            .unwrap()
            .manifest;
        assert!(manifest.extensions.is_empty());
        assert!(manifest.processors.is_empty());
        assert_eq!(manifest.replaces.len(), DEFAULT_REPLACES.len());
    }

    #[test]
    fn test_unknown_component_is_reported_with_suggestion() {
        let registry = Registry::builtin();
        let compiled = compile(
            &registry,
            &refs(&[(Category::Receiver, "otlpp"), (Category::Receiver, "otlp")]),
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(
            compiled.unresolved,
            vec![UnresolvedComponent {
                category: Category::Receiver,
                name: "otlpp".to_string(),
                reason: UnresolvedReason::Unknown,
                suggestion: Some("otlp".to_string()),
            }]
        );
        let receivers = paths(&compiled.manifest, Category::Receiver);
        assert!(receivers.iter().all(|p| !p.contains("otlpp")));
        assert_eq!(receivers.iter().filter(|p| p.ends_with("/otlpreceiver")).count(), 1);
    }

    #[test]
    fn test_too_new_component_is_reported() {
        let options = CompileOptions {
            collector_version: Version::new(0, 90, 0),
            include_vendor: false,
            ..CompileOptions::default()
        };
        let compiled = compile(
            &Registry::builtin(),
            &refs(&[(Category::Connector, "exceptions")]),
            &options,
        )
        .unwrap();
        assert_eq!(
            compiled.unresolved[0].reason,
            UnresolvedReason::RequiresVersion {
                since: Version::new(0, 97, 0)
            }
        );
        assert!(compiled.manifest.connectors.is_empty());
    }

    #[test]
    fn test_identical_pins_dedup() {
        let pin: ModuleCoordinate =
            "go.opentelemetry.io/collector/receiver/otlpreceiver v0.122.0".parse().unwrap();
        let options = CompileOptions {
            pins: vec![(Category::Receiver, pin.clone()), (Category::Receiver, pin)],
            include_vendor: false,
            ..CompileOptions::default()
        };
        let compiled = compile(
            &Registry::builtin(),
            &refs(&[(Category::Receiver, "otlp")]),
            &options,
        )
        .unwrap();
        assert_eq!(compiled.manifest.receivers.len(), 1);
    }

    #[test]
    fn test_conflicting_pin_is_ambiguous() {
        let options = CompileOptions {
            pins: vec![(
                Category::Receiver,
                "go.opentelemetry.io/collector/receiver/otlpreceiver v0.121.0".parse().unwrap(),
            )],
            ..CompileOptions::default()
        };
        let err = compile(
            &Registry::builtin(),
            &refs(&[(Category::Receiver, "otlp")]),
            &options,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::AmbiguousVersion {
                category: Category::Receiver,
                ref existing,
                ref requested,
                ..
            } if existing == "v0.121.0" && requested == "v0.122.0"
        ));
    }

    #[test]
    fn test_missing_default_is_fatal() {
        let registry = Registry::from_entries(
            Version::new(1, 0, 0),
            [(
                Category::Provider,
                "env",
                "go.opentelemetry.io/collector/confmap/provider/envprovider __PROVIDER_VERSION__",
                Namespace::Core,
                Version::new(0, 86, 0),
            )],
        )
        .unwrap();
        let options = CompileOptions {
            include_vendor: false,
            ..CompileOptions::default()
        };
        let err = compile(&registry, &BTreeSet::new(), &options).unwrap_err();
        assert!(matches!(err, CompileError::MissingDefault { ref name, .. } if name == "file"));
    }

    #[test]
    fn test_round_trip_is_superset() {
        let registry = Registry::builtin();
        let references = config::extract(
            "receivers:\n  otlp:\n  hostmetrics:\nprocessors:\n  batch:\nexporters:\n  debug:\n",
        )
        .unwrap();
        let options = CompileOptions::default();
        let first = compile(&registry, &references, &options).unwrap().manifest;

        let (again, pins) = first.references(&registry);
        let second = compile(&registry, &again, &CompileOptions { pins, ..options })
            .unwrap()
            .manifest;
        for category in Category::ALL {
            for path in paths(&first, category) {
                assert!(paths(&second, category).contains(&path), "{path} lost on round trip");
            }
        }
    }
}
