//! External toolchain seam.
//!
//! The orchestrator never builds commands itself: a [`Toolchain`] turns a
//! [`StageContext`] into the process for each stage. [`GoToolchain`] drives
//! the real generator, Go compiler, goreleaser and syft.

use super::error::StageError;
use super::manifest::DistMetadata;
use super::packaging;
use super::platforms::BuildTarget;
use super::tools;
use super::versions::EffectiveVersions;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Per-target paths and inputs. All writes for a target stay under `work_dir`.
#[derive(Clone, Debug)]
pub struct StageContext {
    pub target: BuildTarget,
    /// `<work>/<os>_<arch>[vN]`
    pub work_dir: PathBuf,
    pub manifest_path: PathBuf,
    /// Generator output (`<work>/_build`).
    pub build_dir: PathBuf,
    pub bin_path: PathBuf,
    /// Packager output (`<work>/dist`).
    pub dist_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub dist: DistMetadata,
    pub versions: EffectiveVersions,
}

impl StageContext {
    pub fn new(
        root: &Path,
        target: BuildTarget,
        dist: &DistMetadata,
        versions: EffectiveVersions,
    ) -> Self {
        let work_dir = root.join(target.slug());
        Self {
            manifest_path: work_dir.join("manifest.yaml"),
            build_dir: work_dir.join("_build"),
            bin_path: work_dir
                .join("bin")
                .join(format!("{}{}", dist.name, target.exe_suffix())),
            dist_dir: work_dir.join("dist"),
            logs_dir: work_dir.join("logs"),
            work_dir,
            target,
            dist: dist.clone(),
            versions,
        }
    }

    pub fn log_path(&self, stage: &str) -> PathBuf {
        self.logs_dir.join(format!("{stage}.log"))
    }
}

pub trait Toolchain {
    /// Generate collector sources from the manifest into `build_dir`.
    fn generate(&self, ctx: &StageContext) -> Result<Command, StageError>;

    /// Compile `build_dir` into `bin_path` for the target.
    fn compile(&self, ctx: &StageContext) -> Result<Command, StageError>;

    /// Archive and package `bin_path` into `dist_dir`.
    fn package(&self, ctx: &StageContext) -> Result<Command, StageError>;

    /// SBOM for one produced artifact, written to `<artifact>.sbom.json`.
    /// `None` skips SBOM generation.
    fn sbom(&self, ctx: &StageContext, artifact: &Path) -> Result<Option<Command>, StageError>;
}

/// OCB, `go build`, goreleaser and syft.
#[derive(Clone, Debug)]
pub struct GoToolchain {
    pub tools_dir: PathBuf,
    pub sbom: bool,
}

impl GoToolchain {
    pub fn new(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            sbom: true,
        }
    }

    fn generator(&self, ctx: &StageContext) -> Result<PathBuf, StageError> {
        let version = ctx.versions.generator.version;
        let cached = tools::generator_path(&self.tools_dir, &version);
        if cached.exists() {
            // The generator runs with the target directory as cwd.
            return cached.canonicalize().map_err(|e| StageError::io(&cached, e));
        }
        which::which("ocb").map_err(|_| {
            StageError::MissingTool(format!(
                "ocb {version} (not in {} or on PATH; run: distro-builder tools fetch)",
                self.tools_dir.display()
            ))
        })
    }
}

fn require(tool: &str) -> Result<PathBuf, StageError> {
    which::which(tool).map_err(|_| StageError::MissingTool(tool.to_string()))
}

impl Toolchain for GoToolchain {
    fn generate(&self, ctx: &StageContext) -> Result<Command, StageError> {
        let mut cmd = Command::new(self.generator(ctx)?);
        cmd.arg("--skip-compilation=true")
            .arg("--config")
            .arg(&ctx.manifest_path)
            .current_dir(&ctx.work_dir);
        Ok(cmd)
    }

    fn compile(&self, ctx: &StageContext) -> Result<Command, StageError> {
        let mut cmd = Command::new(require("go")?);
        cmd.args(["build", "-trimpath", "-o"])
            .arg(&ctx.bin_path)
            .arg(".")
            .current_dir(&ctx.build_dir)
            .env("GOOS", ctx.target.os.as_str())
            .env("GOARCH", ctx.target.arch.as_str())
            .env("CGO_ENABLED", "0")
            .env("GOTOOLCHAIN", format!("go{}", ctx.versions.runtime.version));
        if let Some(arm) = ctx.target.arm {
            cmd.env("GOARM", arm.to_string());
        }
        Ok(cmd)
    }

    fn package(&self, ctx: &StageContext) -> Result<Command, StageError> {
        let goreleaser = require("goreleaser")?;
        let supervisor = tools::supervisor_path(
            &self.tools_dir,
            &ctx.versions.supervisor.version,
            &ctx.target,
        )
        .filter(|p| p.exists());
        let config = packaging::render(ctx, supervisor.as_deref())?;

        let mut cmd = Command::new(goreleaser);
        cmd.args(["release", "--snapshot", "--clean", "--skip=publish,validate", "--config"])
            .arg(config)
            .current_dir(&ctx.work_dir)
            .env("RELEASE_VERSION", &ctx.dist.version);
        Ok(cmd)
    }

    fn sbom(&self, _ctx: &StageContext, artifact: &Path) -> Result<Option<Command>, StageError> {
        if !self.sbom {
            return Ok(None);
        }
        let mut output = artifact.as_os_str().to_owned();
        output.push(".sbom.json");

        let mut source = std::ffi::OsString::from("file:");
        source.push(artifact);
        let mut format = std::ffi::OsString::from("spdx-json=");
        format.push(&output);

        let mut cmd = Command::new(require("syft")?);
        cmd.arg("scan").arg(source).arg("-o").arg(format);
        Ok(Some(cmd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::versions::{resolve, VersionRequest, VersionTable};

    fn context(target: &str) -> StageContext {
        let versions = resolve(&VersionTable::builtin(), &VersionRequest::default(), None).unwrap();
        let dist = DistMetadata {
            name: "otelcol-test".to_string(),
            ..DistMetadata::default()
        };
        StageContext::new(Path::new("/work"), target.parse().unwrap(), &dist, versions)
    }

    #[test]
    fn test_context_paths() {
        let ctx = context("windows/amd64");
        assert_eq!(ctx.work_dir, PathBuf::from("/work/windows_amd64"));
        assert_eq!(ctx.bin_path, PathBuf::from("/work/windows_amd64/bin/otelcol-test.exe"));
        assert_eq!(ctx.build_dir, PathBuf::from("/work/windows_amd64/_build"));
        assert_eq!(ctx.log_path("compile"), PathBuf::from("/work/windows_amd64/logs/compile.log"));
    }

    #[test]
    fn test_missing_generator_is_reported() {
        let toolchain = GoToolchain::new("/nonexistent/tools");
        let ctx = context("linux/amd64");
        if which::which("ocb").is_err() {
            assert!(matches!(toolchain.generate(&ctx), Err(StageError::MissingTool(_))));
        }
    }

    #[test]
    fn test_sbom_can_be_disabled() {
        let mut toolchain = GoToolchain::new("/tools");
        toolchain.sbom = false;
        let ctx = context("linux/amd64");
        assert!(toolchain
            .sbom(&ctx, Path::new("/work/dist/a.tar.gz"))
            .unwrap()
            .is_none());
    }
}
