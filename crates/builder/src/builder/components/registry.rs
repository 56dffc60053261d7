//! Component registry - immutable lookup snapshot over a catalog.
//!
//! A registry is built once (from the built-in [`CATALOG`] or a catalog file)
//! and passed by reference into the compiler, so lookups never touch shared
//! global state.

use super::catalog::{
    self, CATALOG, PROVIDER_VERSION_PLACEHOLDER, VENDOR_VERSION, VENDOR_VERSION_PLACEHOLDER,
    VERSION_PLACEHOLDER,
};
use super::{Category, ComponentReference, ModuleCoordinate, Namespace, RegistryEntry};
use crate::builder::error::{ConfigError, RegistryError};
use crate::builder::versions::Version;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Suggestions are only offered within this edit distance.
pub const MAX_SUGGESTION_DISTANCE: usize = 2;
const MAX_SUGGESTIONS: usize = 3;

#[derive(Clone, Debug)]
struct Candidate {
    gomod: String,
    namespace: Namespace,
    since: Version,
}

/// Successful lookup: the selected core/contrib entry (or the vendor entry
/// when only the vendor namespace provides the name), plus any vendor entry
/// unioned alongside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub primary: RegistryEntry,
    pub vendor: Option<RegistryEntry>,
}

impl Resolution {
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        std::iter::once(&self.primary).chain(self.vendor.as_ref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupError {
    NotFound,
    /// The component exists but was introduced after the requested version.
    VersionMismatch { since: Version, requested: Version },
}

#[derive(Clone, Debug)]
pub struct Registry {
    components: BTreeMap<(Category, String), Vec<Candidate>>,
    vendor_version: Version,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    vendor_version: Option<Version>,
    #[serde(flatten)]
    sections: BTreeMap<String, BTreeMap<String, CatalogFileEntry>>,
}

#[derive(Deserialize)]
struct CatalogFileEntry {
    gomod: String,
    #[serde(default = "default_source")]
    source: Namespace,
    #[serde(default)]
    since: Option<Version>,
}

fn default_source() -> Namespace {
    Namespace::Contrib
}

impl Registry {
    /// Registry over the built-in catalog.
    pub fn builtin() -> Self {
        let mut registry = Self::empty(VENDOR_VERSION);
        for e in CATALOG {
            registry
                .components
                .entry((e.category, e.name.to_string()))
                .or_default()
                .push(Candidate {
                    gomod: e.gomod_template(),
                    namespace: e.namespace,
                    since: e.since,
                });
        }
        registry
    }

    fn empty(vendor_version: Version) -> Self {
        Self {
            components: BTreeMap::new(),
            vendor_version,
        }
    }

    /// Build a registry from explicit rows:
    /// (category, name, gomod template, namespace, since).
    #[cfg(test)]
    pub fn from_entries<'a>(
        vendor_version: Version,
        entries: impl IntoIterator<Item = (Category, &'a str, &'a str, Namespace, Version)>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::empty(vendor_version);
        for (category, name, gomod, namespace, since) in entries {
            registry.insert(category, name, gomod, namespace, since)?;
        }
        Ok(registry)
    }

    /// Parse a catalog document:
    ///
    /// ```yaml
    /// vendor_version: 1.72.0
    /// receivers:
    ///   otlp: { gomod: "go.opentelemetry.io/collector/receiver/otlpreceiver __VERSION__", source: core }
    /// ```
    pub fn from_yaml(text: &str) -> Result<Self, RegistryError> {
        let file: CatalogFile = serde_yaml::from_str(text).map_err(ConfigError::from)?;
        let mut registry = Self::empty(file.vendor_version.unwrap_or(VENDOR_VERSION));
        for (section, components) in &file.sections {
            let category = Category::from_section(section)
                .ok_or_else(|| ConfigError::UnknownSection(section.clone()))?;
            for (name, entry) in components {
                registry.insert(
                    category,
                    name,
                    &entry.gomod,
                    entry.source,
                    entry.since.unwrap_or(Version::new(0, 0, 0)),
                )?;
            }
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    fn insert(
        &mut self,
        category: Category,
        name: &str,
        gomod: &str,
        namespace: Namespace,
        since: Version,
    ) -> Result<(), RegistryError> {
        // Validate the template shape up front.
        gomod.parse::<ModuleCoordinate>()?;
        let candidates = self
            .components
            .entry((category, name.to_string()))
            .or_default();
        if candidates.iter().any(|c| c.namespace == namespace) {
            return Err(RegistryError::Duplicate {
                category,
                name: name.to_string(),
                namespace,
            });
        }
        candidates.push(Candidate {
            gomod: gomod.to_string(),
            namespace,
            since,
        });
        Ok(())
    }

    pub fn vendor_version(&self) -> Version {
        self.vendor_version
    }

    /// Resolve a reference for a collector version.
    ///
    /// Core wins over contrib unless the reference requests contrib. A vendor
    /// entry is unioned with the core/contrib one, never substituted for it.
    pub fn lookup(
        &self,
        reference: &ComponentReference,
        version: &Version,
    ) -> Result<Resolution, LookupError> {
        let candidates = self
            .components
            .get(&(reference.category, reference.name.clone()))
            .ok_or(LookupError::NotFound)?;
        let find = |ns: Namespace| candidates.iter().find(|c| c.namespace == ns);

        let (upstream, vendor) = match reference.namespace {
            Some(Namespace::Vendor) => (None, find(Namespace::Vendor)),
            Some(ns) => (find(ns), find(Namespace::Vendor)),
            None => (
                find(Namespace::Core).or_else(|| find(Namespace::Contrib)),
                find(Namespace::Vendor),
            ),
        };
        if reference.namespace.is_some_and(|ns| ns != Namespace::Vendor) && upstream.is_none() {
            return Err(LookupError::NotFound);
        }

        let mut selected = upstream.into_iter().chain(vendor);
        let primary = selected.next().ok_or(LookupError::NotFound)?;
        let vendor = selected.next();

        for candidate in std::iter::once(primary).chain(vendor) {
            if candidate.since > *version {
                return Err(LookupError::VersionMismatch {
                    since: candidate.since,
                    requested: *version,
                });
            }
        }

        Ok(Resolution {
            primary: self.entry(reference, primary, version),
            vendor: vendor.map(|c| self.entry(reference, c, version)),
        })
    }

    fn entry(
        &self,
        reference: &ComponentReference,
        candidate: &Candidate,
        version: &Version,
    ) -> RegistryEntry {
        let gomod = candidate
            .gomod
            .replace(VERSION_PLACEHOLDER, &version.tag())
            .replace(
                PROVIDER_VERSION_PLACEHOLDER,
                &catalog::provider_version(version).tag(),
            )
            .replace(VENDOR_VERSION_PLACEHOLDER, &self.vendor_version.tag());
        // Templates were validated on insert and placeholders contain no whitespace.
        let module = gomod
            .parse()
            .unwrap_or_else(|_| ModuleCoordinate::new(gomod.clone(), ""));
        RegistryEntry {
            category: reference.category,
            name: reference.name.clone(),
            module,
            namespace: candidate.namespace,
            since: candidate.since,
        }
    }

    /// Names within [`MAX_SUGGESTION_DISTANCE`] edits of `name`, closest first.
    pub fn suggest(&self, category: Category, name: &str) -> Vec<String> {
        let needle = name.to_lowercase();
        let mut scored: Vec<(usize, &str)> = self
            .components
            .keys()
            .filter(|(c, candidate)| *c == category && candidate != name)
            .map(|(_, candidate)| {
                let distance = levenshtein(&needle, &candidate.to_lowercase());
                (distance, candidate.as_str())
            })
            .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
            .collect();
        scored.sort_unstable();
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, n)| n.to_string())
            .collect()
    }

    /// Reference to the component whose module path is `module_path`.
    ///
    /// Contrib entries shadowed by a core entry of the same name carry an
    /// explicit contrib request so they resolve back to the same module.
    pub fn reverse(&self, category: Category, module_path: &str) -> Option<ComponentReference> {
        self.components
            .iter()
            .filter(|((c, _), _)| *c == category)
            .find_map(|((_, name), candidates)| {
                let hit = candidates
                    .iter()
                    .find(|c| c.gomod.split_whitespace().next() == Some(module_path))?;
                let reference = ComponentReference::new(category, name.clone());
                let shadowed = hit.namespace == Namespace::Contrib
                    && candidates.iter().any(|c| c.namespace == Namespace::Core);
                Some(if shadowed {
                    reference.in_namespace(Namespace::Contrib)
                } else {
                    reference
                })
            })
    }
}

/// Levenshtein edit distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
