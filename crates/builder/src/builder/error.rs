//! Error types for manifest compilation and distribution builds.
//!
//! Unresolved components are not errors: they are reported as
//! [`UnresolvedComponent`](super::compiler::UnresolvedComponent) warnings and
//! the manifest is still emitted.

use super::components::Category;
use super::orchestrator::RunReport;
use super::platforms::BuildTarget;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing collector configs and component lists.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("section '{0}' must be a mapping of component ids")]
    InvalidSection(String),

    #[error("unknown component section '{0}'")]
    UnknownSection(String),

    #[error("invalid component id '{0}'")]
    InvalidComponentId(String),

    #[error("unknown namespace '{0}' (expected core, contrib or vendor)")]
    UnknownNamespace(String),

    #[error("invalid module coordinate '{0}'")]
    InvalidModule(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),
}

/// Errors raised while building a registry snapshot.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read registry file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{category} '{name}' registered twice in the {namespace} namespace")]
    Duplicate {
        category: Category,
        name: String,
        namespace: super::components::Namespace,
    },
}

/// Fatal manifest compilation errors.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(
        "ambiguous version request for {category} module {path}: \
         '{existing}' already selected, '{requested}' also requested"
    )]
    AmbiguousVersion {
        category: Category,
        path: String,
        existing: String,
        requested: String,
    },

    #[error("mandatory default {category} '{name}' is not available in the registry: {reason}")]
    MissingDefault {
        category: Category,
        name: String,
        reason: String,
    },
}

/// Errors raised while resolving toolchain versions.
#[derive(Error, Debug)]
pub enum VersionError {
    #[error(
        "incompatible toolchain versions: generator {generator} requires Go runtime >= {required}, got {runtime}"
    )]
    IncompatibleRuntime {
        generator: String,
        runtime: String,
        required: String,
    },

    #[error("generator version {0} predates every known-compatible runtime pairing")]
    UnknownGenerator(String),

    #[error("supervisor version {requested} is older than the minimum supported {minimum}")]
    SupervisorTooOld { requested: String, minimum: String },

    #[error("failed to read version table {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("version table default '{0}' has no row")]
    MissingDefault(String),
}

/// Errors raised while parsing or validating a manifest document.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("invalid manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("manifest dist.name must not be empty")]
    MissingName,

    #[error("duplicate {category} module {path} in manifest")]
    DuplicateModule { category: Category, path: String },
}

/// Errors raised while parsing the target platform matrix.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid platform '{0}' (expected os/arch or os/arch/vN)")]
    Malformed(String),

    #[error("unsupported operating system '{0}'")]
    UnsupportedOs(String),

    #[error("unsupported architecture '{0}'")]
    UnsupportedArch(String),

    #[error("invalid ARM variant '{variant}' for {arch} (only arm accepts v5, v6 or v7)")]
    InvalidVariant { arch: String, variant: String },

    #[error("platform matrix is empty")]
    Empty,
}

/// An external process failure, scoped to one build target.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {}{}", exit_code(.code), log_suffix(.log_tail))]
    Exit {
        program: String,
        code: Option<i32>,
        log_tail: String,
    },

    #[error("{program} timed out after {}s{}", secs(.after), log_suffix(.log_tail))]
    Timeout {
        program: String,
        after: Duration,
        log_tail: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{0}")]
    Output(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

fn secs(after: &Duration) -> u64 {
    after.as_secs()
}

fn log_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{tail}")
    }
}

/// Artifact naming collision. Indicates a defect in the platform matrix or
/// the naming template, never an environmental failure.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("artifact name '{name}' produced by both {first} and {second}")]
    Collision {
        name: String,
        first: BuildTarget,
        second: BuildTarget,
    },

    #[error("artifact '{0}' already exists in the output directory")]
    AlreadyExists(String),

    #[error("artifact name '{0}' is reserved for collection metadata")]
    Reserved(String),

    #[error("artifact {0} is empty")]
    EmptyArtifact(PathBuf),
}

/// Errors raised while moving artifacts into the output directory.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write artifact manifest: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while naming artifacts.
#[derive(Error, Debug)]
pub enum NamingError {
    #[error("unknown placeholder '{{{0}}}' in artifact template")]
    UnknownPlaceholder(String),

    #[error("artifact template must contain {{ext}}")]
    MissingExtension,

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Terminal failure of a whole pipeline run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("{}", failure_summary(.0))]
    TargetsFailed(Box<RunReport>),

    /// Collection failed after the targets ran; `report` keeps their results.
    #[error("artifact collection failed")]
    Collect {
        source: CollectError,
        report: Box<RunReport>,
    },

    #[error("failed to prepare work directory {path}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn failure_summary(report: &RunReport) -> String {
    format!(
        "{} of {} targets did not succeed",
        report.unsuccessful().count(),
        report.results.len()
    )
}
