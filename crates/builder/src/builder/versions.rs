//! Toolchain version resolution.
//!
//! Three external tools are versioned independently: the source generator
//! (OCB), the Go compiler runtime, and the OpAMP supervisor bundled into
//! packages. Each is resolved by strict precedence:
//! explicit request > manifest-declared > version table default.

use super::error::{ConfigError, VersionError};
use super::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Oldest supervisor release that speaks the OpAMP protocol version we package for.
pub const MIN_SUPERVISOR_VERSION: Version = Version::new(0, 122, 0);

/// A `major.minor.patch` version. A leading `v` and any pre-release or
/// build suffix are accepted on input and dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Go module tag form, e.g. `v0.122.0`.
    pub fn tag(&self) -> String {
        format!("v{self}")
    }
}

impl FromStr for Version {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidVersion(s.to_string());
        let core = s.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next().unwrap_or_default();

        let mut parts = core.split('.');
        let mut next = |required: bool| -> Result<u64, ConfigError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = Version::new(next(true)?, next(true)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for Version {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One row of the version table: the toolchain matching a collector release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainVersions {
    pub builder: Version,
    pub supervisor: Version,
    pub go: Version,
}

/// Generators from `generator` onwards need at least Go `go`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub generator: Version,
    pub go: Version,
}

/// Built-in rows: (collector version, builder, supervisor, go).
const BUILTIN_ROWS: &[(Version, Version, Version, Version)] = &[
    (
        Version::new(0, 120, 0),
        Version::new(0, 120, 0),
        Version::new(0, 122, 0),
        Version::new(1, 23, 4),
    ),
    (
        Version::new(0, 121, 0),
        Version::new(0, 121, 0),
        Version::new(0, 122, 0),
        Version::new(1, 23, 6),
    ),
    (
        Version::new(0, 122, 0),
        Version::new(0, 122, 0),
        Version::new(0, 122, 0),
        Version::new(1, 24, 1),
    ),
    (
        Version::new(0, 123, 0),
        Version::new(0, 123, 0),
        Version::new(0, 123, 0),
        Version::new(1, 24, 1),
    ),
    (
        Version::new(0, 124, 0),
        Version::new(0, 124, 0),
        Version::new(0, 124, 0),
        Version::new(1, 24, 2),
    ),
];

const BUILTIN_DEFAULT: Version = Version::new(0, 122, 0);

const BUILTIN_PAIRINGS: &[Pairing] = &[
    Pairing {
        generator: Version::new(0, 100, 0),
        go: Version::new(1, 21, 0),
    },
    Pairing {
        generator: Version::new(0, 110, 0),
        go: Version::new(1, 22, 0),
    },
    Pairing {
        generator: Version::new(0, 120, 0),
        go: Version::new(1, 23, 0),
    },
];

/// Immutable snapshot of known toolchain versions and compatible pairings.
#[derive(Clone, Debug)]
pub struct VersionTable {
    rows: BTreeMap<Version, ToolchainVersions>,
    default: Version,
    pairings: Vec<Pairing>,
}

#[derive(Deserialize)]
struct VersionFile {
    default: Version,
    versions: BTreeMap<Version, ToolchainVersions>,
    #[serde(default)]
    pairings: Option<Vec<Pairing>>,
}

impl VersionTable {
    pub fn builtin() -> Self {
        let rows = BUILTIN_ROWS
            .iter()
            .map(|&(collector, builder, supervisor, go)| {
                (
                    collector,
                    ToolchainVersions {
                        builder,
                        supervisor,
                        go,
                    },
                )
            })
            .collect();
        Self {
            rows,
            default: BUILTIN_DEFAULT,
            pairings: BUILTIN_PAIRINGS.to_vec(),
        }
    }

    pub fn new(
        rows: BTreeMap<Version, ToolchainVersions>,
        default: Version,
        pairings: Vec<Pairing>,
    ) -> Result<Self, VersionError> {
        if !rows.contains_key(&default) {
            return Err(VersionError::MissingDefault(default.to_string()));
        }
        let mut pairings = pairings;
        pairings.sort_by_key(|p| p.generator);
        Ok(Self {
            rows,
            default,
            pairings,
        })
    }

    /// Parse a `versions.yaml` document. Pairings fall back to the built-in
    /// table when the file does not declare any.
    pub fn from_yaml(text: &str) -> Result<Self, VersionError> {
        let file: VersionFile = serde_yaml::from_str(text).map_err(ConfigError::from)?;
        let pairings = file
            .pairings
            .unwrap_or_else(|| BUILTIN_PAIRINGS.to_vec());
        Self::new(file.versions, file.default, pairings)
    }

    pub fn load(path: &Path) -> Result<Self, VersionError> {
        let text = std::fs::read_to_string(path).map_err(|source| VersionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn row(&self, collector: &Version) -> Option<&ToolchainVersions> {
        self.rows.get(collector)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Version, &ToolchainVersions)> {
        self.rows.iter()
    }

    pub fn default_version(&self) -> Version {
        self.default
    }

    pub fn default_row(&self) -> ToolchainVersions {
        // `new` guarantees the default row exists.
        self.rows
            .get(&self.default)
            .copied()
            .unwrap_or(ToolchainVersions {
                builder: self.default,
                supervisor: MIN_SUPERVISOR_VERSION.max(self.default),
                go: self.pairings.last().map_or(Version::new(1, 0, 0), |p| p.go),
            })
    }

    /// Minimum Go runtime for a generator version, if the generator is known.
    pub fn required_runtime(&self, generator: &Version) -> Option<Version> {
        self.pairings
            .iter()
            .rev()
            .find(|p| p.generator <= *generator)
            .map(|p| p.go)
    }
}

/// Where a resolved version came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSource {
    Explicit,
    Manifest,
    Default,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Manifest => "manifest",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedVersion {
    pub version: Version,
    pub source: VersionSource,
}

impl fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.source)
    }
}

/// Versions requested on the command line.
#[derive(Clone, Copy, Debug, Default)]
pub struct VersionRequest {
    pub generator: Option<Version>,
    pub runtime: Option<Version>,
    pub supervisor: Option<Version>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EffectiveVersions {
    pub generator: ResolvedVersion,
    pub runtime: ResolvedVersion,
    pub supervisor: ResolvedVersion,
}

/// Pick the first available version, in precedence order.
pub fn resolve_one(
    explicit: Option<Version>,
    declared: Option<Version>,
    default: Version,
) -> ResolvedVersion {
    match (explicit, declared) {
        (Some(version), _) => ResolvedVersion {
            version,
            source: VersionSource::Explicit,
        },
        (None, Some(version)) => ResolvedVersion {
            version,
            source: VersionSource::Manifest,
        },
        (None, None) => ResolvedVersion {
            version: default,
            source: VersionSource::Default,
        },
    }
}

/// Resolve all three toolchain versions and validate the combination.
pub fn resolve(
    table: &VersionTable,
    request: &VersionRequest,
    manifest: Option<&Manifest>,
) -> Result<EffectiveVersions, VersionError> {
    let declared = manifest.and_then(Manifest::contrib_version).and_then(|v| {
        let row = table.row(&v).copied();
        if row.is_none() {
            warn!(
                collector = %v,
                "manifest collector version not in version table; using defaults"
            );
        }
        row
    });
    let default = table.default_row();

    let versions = EffectiveVersions {
        generator: resolve_one(
            request.generator,
            declared.map(|r| r.builder),
            default.builder,
        ),
        runtime: resolve_one(request.runtime, declared.map(|r| r.go), default.go),
        supervisor: resolve_one(
            request.supervisor,
            declared.map(|r| r.supervisor),
            default.supervisor,
        ),
    };
    debug!(?versions, "resolved toolchain versions");

    check_compatible(table, &versions)?;
    Ok(versions)
}

fn check_compatible(
    table: &VersionTable,
    versions: &EffectiveVersions,
) -> Result<(), VersionError> {
    let generator = versions.generator.version;
    let runtime = versions.runtime.version;

    let required = table
        .required_runtime(&generator)
        .ok_or_else(|| VersionError::UnknownGenerator(generator.to_string()))?;
    if runtime < required {
        return Err(VersionError::IncompatibleRuntime {
            generator: generator.to_string(),
            runtime: runtime.to_string(),
            required: required.to_string(),
        });
    }

    let supervisor = versions.supervisor.version;
    if supervisor < MIN_SUPERVISOR_VERSION {
        return Err(VersionError::SupervisorTooOld {
            requested: supervisor.to_string(),
            minimum: MIN_SUPERVISOR_VERSION.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    const CONTRIB: &str = "github.com/open-telemetry/opentelemetry-collector-contrib";

    fn manifest_with_contrib(version: &str) -> Manifest {
        let module = format!("{CONTRIB}/extension/basicauthextension v{version}");
        let text = format!("dist:\n  name: test\nextensions:\n  - gomod: {module}\n");
        Manifest::parse(&text).unwrap()
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(v("0.122.0"), Version::new(0, 122, 0));
        assert_eq!(v("v1.24.1"), Version::new(1, 24, 1));
        assert_eq!(v("1.24"), Version::new(1, 24, 0));
        assert_eq!(v("0.122.0-rc1"), Version::new(0, 122, 0));
        assert!("latest".parse::<Version>().is_err());
        assert!("1".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!(v("0.99.0") < v("0.122.0"));
    }

    #[test]
    fn test_explicit_overrides_win() {
        let versions = resolve(
            &VersionTable::builtin(),
            &VersionRequest {
                generator: Some(v("0.123.0")),
                runtime: None,
                supervisor: Some(v("0.123.0")),
            },
            Some(&manifest_with_contrib("0.122.0")),
        )
        .unwrap();
        assert_eq!(versions.generator.version, v("0.123.0"));
        assert_eq!(versions.generator.source, VersionSource::Explicit);
        assert_eq!(versions.supervisor.version, v("0.123.0"));
        assert_eq!(versions.runtime.source, VersionSource::Manifest);
    }

    #[test]
    fn test_manifest_declared_versions() {
        let versions = resolve(
            &VersionTable::builtin(),
            &VersionRequest::default(),
            Some(&manifest_with_contrib("0.122.0")),
        )
        .unwrap();
        assert_eq!(versions.generator.version, v("0.122.0"));
        assert_eq!(versions.generator.source, VersionSource::Manifest);
        assert_eq!(versions.runtime.version, v("1.24.1"));
    }

    #[test]
    fn test_older_manifest_uses_minimum_supervisor() {
        let versions = resolve(
            &VersionTable::builtin(),
            &VersionRequest::default(),
            Some(&manifest_with_contrib("0.121.0")),
        )
        .unwrap();
        assert_eq!(versions.generator.version, v("0.121.0"));
        assert_eq!(versions.supervisor.version, MIN_SUPERVISOR_VERSION);
    }

    #[test]
    fn test_unknown_manifest_version_falls_back_to_default() {
        let versions = resolve(
            &VersionTable::builtin(),
            &VersionRequest::default(),
            Some(&manifest_with_contrib("0.99.0")),
        )
        .unwrap();
        assert_eq!(versions.generator.source, VersionSource::Default);
        assert_eq!(versions.generator.version, BUILTIN_DEFAULT);
    }

    #[test]
    fn test_incompatible_runtime_rejected() {
        let err = resolve(
            &VersionTable::builtin(),
            &VersionRequest {
                generator: Some(v("0.122.0")),
                runtime: Some(v("1.21.5")),
                supervisor: None,
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, VersionError::IncompatibleRuntime { .. }));
    }

    #[test]
    fn test_unknown_generator_rejected() {
        let err = resolve(
            &VersionTable::builtin(),
            &VersionRequest {
                generator: Some(v("0.50.0")),
                ..VersionRequest::default()
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, VersionError::UnknownGenerator(_)));
    }

    #[test]
    fn test_old_supervisor_rejected() {
        let err = resolve(
            &VersionTable::builtin(),
            &VersionRequest {
                supervisor: Some(v("0.110.0")),
                ..VersionRequest::default()
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, VersionError::SupervisorTooOld { .. }));
    }

    #[test]
    fn test_version_table_from_yaml() {
        let table = VersionTable::from_yaml(
            r#"
default: "0.130.0"
versions:
  "0.130.0": { builder: "0.130.0", supervisor: "0.130.0", go: "1.24.4" }
"#,
        )
        .unwrap();
        assert_eq!(table.default_row().go, v("1.24.4"));
        assert_eq!(table.required_runtime(&v("0.130.0")), Some(v("1.23.0")));

        let missing = VersionTable::from_yaml("default: \"1.0.0\"\nversions: {}\n");
        assert!(matches!(missing, Err(VersionError::MissingDefault(_))));
    }
}
