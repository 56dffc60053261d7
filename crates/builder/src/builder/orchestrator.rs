//! Multi-platform build orchestrator.
//!
//! Each target runs `Pending -> Generating -> Compiling -> Packaging ->
//! Collecting`, strictly forward, ending Succeeded or Failed. Up to
//! `parallelism` targets run at once on a single control flow. A failing
//! target never cancels its siblings; every started target drains before
//! artifacts are collected and the aggregate outcome is decided.

use super::collector::{self, ArtifactManifest};
use super::error::{RunError, StageError};
use super::manifest::Manifest;
use super::naming::{ArtifactTemplate, PACKAGE_EXTENSIONS};
use super::platforms::BuildTarget;
use super::process::{run_stage, CancelToken};
use super::toolchain::{StageContext, Toolchain};
use super::versions::EffectiveVersions;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pending,
    Generating,
    Compiling,
    Packaging,
    Collecting,
}

impl Stage {
    /// Log file stem for the stage's process output.
    pub fn log_name(self) -> &'static str {
        match self {
            Self::Pending => "prepare",
            Self::Generating => "generate",
            Self::Compiling => "compile",
            Self::Packaging => "package",
            Self::Collecting => "sbom",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Compiling => "compiling",
            Self::Packaging => "packaging",
            Self::Collecting => "collecting",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Not finalized yet.
    Pending,
    Succeeded,
    Failed,
    /// Never started (run cancelled first).
    Skipped,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Succeeded => "OK",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub seconds: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildResult {
    pub target: BuildTarget,
    pub status: BuildStatus,
    /// Last stage entered.
    pub stage: Stage,
    pub artifacts: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timings: Vec<StageTiming>,
}

impl BuildResult {
    pub fn pending(target: BuildTarget) -> Self {
        Self {
            target,
            status: BuildStatus::Pending,
            stage: Stage::Pending,
            artifacts: Vec::new(),
            error: None,
            timings: Vec::new(),
        }
    }

    fn record(&mut self, started: Instant) {
        self.timings.push(StageTiming {
            stage: self.stage,
            seconds: started.elapsed().as_secs_f64(),
        });
    }
}

/// One pipeline run, owned by the orchestrator.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub manifest: Manifest,
    pub versions: EffectiveVersions,
    pub targets: Vec<BuildTarget>,
    pub parallelism: NonZeroUsize,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub stage_timeout: Duration,
    pub naming: ArtifactTemplate,
    pub results: Vec<BuildResult>,
}

impl PipelineRun {
    pub fn new(
        manifest: Manifest,
        versions: EffectiveVersions,
        targets: Vec<BuildTarget>,
        output_dir: PathBuf,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            manifest,
            versions,
            targets,
            parallelism: NonZeroUsize::MIN,
            output_dir,
            work_dir,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            naming: ArtifactTemplate::default(),
            results: Vec::new(),
        }
    }
}

/// Final per-target results in matrix order, plus what was collected.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub results: Vec<BuildResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactManifest>,
}

impl RunReport {
    pub fn unsuccessful(&self) -> impl Iterator<Item = &BuildResult> {
        self.results
            .iter()
            .filter(|r| r.status != BuildStatus::Succeeded)
    }

    pub fn print_summary(&self) {
        println!("\n=== Build summary ===");
        for result in &self.results {
            let total: f64 = result.timings.iter().map(|t| t.seconds).sum();
            println!(
                "  {:16} {:8} {:10} {:>7.1}s",
                result.target.to_string(),
                result.status.to_string(),
                result.stage.to_string(),
                total
            );
            for timing in &result.timings {
                println!("      {:10} {:>7.1}s", timing.stage.to_string(), timing.seconds);
            }
            if let Some(error) = &result.error {
                for line in error.lines() {
                    println!("      | {line}");
                }
            }
        }
        if let Some(collected) = &self.artifacts {
            println!("\n  Artifacts:");
            for artifact in &collected.artifacts {
                println!("    {}", artifact.name);
            }
        }
        let failed = self.unsuccessful().count();
        println!(
            "\n  {}/{} targets succeeded",
            self.results.len() - failed,
            self.results.len()
        );
    }
}

pub struct Orchestrator<T> {
    toolchain: T,
}

impl<T: Toolchain> Orchestrator<T> {
    pub fn new(toolchain: T) -> Self {
        Self { toolchain }
    }

    /// Build every target, collect the artifacts of those that succeeded and
    /// fail with an aggregate error if any target did not succeed.
    pub async fn run(
        &self,
        mut run: PipelineRun,
        cancel: &CancelToken,
    ) -> Result<RunReport, RunError> {
        // Stage processes run inside the target directory, so paths handed to
        // them must be absolute.
        run.work_dir = std::fs::create_dir_all(&run.work_dir)
            .and_then(|()| run.work_dir.canonicalize())
            .map_err(|source| RunError::Workspace {
                path: run.work_dir.clone(),
                source,
            })?;
        info!(
            targets = run.targets.len(),
            parallelism = run.parallelism.get(),
            work = %run.work_dir.display(),
            naming = run.naming.as_str(),
            "starting pipeline run"
        );

        let mut finished: Vec<(usize, BuildResult)> = {
            let shared = &run;
            stream::iter(shared.targets.iter().copied().enumerate())
                .map(|(index, target)| async move {
                    (index, self.build_target(shared, target, cancel).await)
                })
                .buffer_unordered(shared.parallelism.get())
                .collect()
                .await
        };
        finished.sort_by_key(|(index, _)| *index);
        run.results = finished.into_iter().map(|(_, result)| result).collect();

        let artifacts = if run
            .results
            .iter()
            .any(|r| r.status == BuildStatus::Succeeded)
        {
            let collected = collector::collect(
                &run.results,
                &run.output_dir,
                &run.naming,
                &run.manifest.dist,
            );
            match collected {
                Ok(manifest) => Some(manifest),
                Err(source) => {
                    return Err(RunError::Collect {
                        source,
                        report: Box::new(RunReport {
                            results: run.results,
                            artifacts: None,
                        }),
                    });
                }
            }
        } else {
            None
        };

        let report = RunReport {
            results: run.results,
            artifacts,
        };
        if report.unsuccessful().next().is_some() {
            return Err(RunError::TargetsFailed(Box::new(report)));
        }
        Ok(report)
    }

    async fn build_target(
        &self,
        run: &PipelineRun,
        target: BuildTarget,
        cancel: &CancelToken,
    ) -> BuildResult {
        let mut result = BuildResult::pending(target);
        if cancel.is_cancelled() {
            info!(platform = %target, "skipped");
            result.status = BuildStatus::Skipped;
            return result;
        }

        let ctx = StageContext::new(&run.work_dir, target, &run.manifest.dist, run.versions);
        match self.execute(run, &ctx, &mut result, cancel).await {
            Ok(artifacts) => {
                info!(platform = %target, artifacts = artifacts.len(), "target succeeded");
                result.artifacts = artifacts;
                result.status = BuildStatus::Succeeded;
            }
            Err(err) => {
                warn!(platform = %target, stage = %result.stage, error = %err, "target failed");
                result.error = Some(err.to_string());
                result.status = BuildStatus::Failed;
            }
        }
        result
    }

    async fn execute(
        &self,
        run: &PipelineRun,
        ctx: &StageContext,
        result: &mut BuildResult,
        cancel: &CancelToken,
    ) -> Result<Vec<PathBuf>, StageError> {
        prepare(ctx, &run.manifest)?;

        result.stage = Stage::Generating;
        let command = self.toolchain.generate(ctx)?;
        timed(command, ctx, result, run.stage_timeout, cancel).await?;

        result.stage = Stage::Compiling;
        let command = self.toolchain.compile(ctx)?;
        timed(command, ctx, result, run.stage_timeout, cancel).await?;

        result.stage = Stage::Packaging;
        let command = self.toolchain.package(ctx)?;
        timed(command, ctx, result, run.stage_timeout, cancel).await?;

        result.stage = Stage::Collecting;
        let started = Instant::now();
        let packaged = discover(&ctx.dist_dir)?;
        if packaged.is_empty() {
            return Err(StageError::Output(format!(
                "packager produced no artifacts in {}",
                ctx.dist_dir.display()
            )));
        }

        let mut artifacts = packaged.clone();
        for artifact in &packaged {
            let Some(command) = self.toolchain.sbom(ctx, artifact)? else {
                continue;
            };
            let file_name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let log = ctx.log_path(&format!("{}-{file_name}", Stage::Collecting.log_name()));
            run_stage(command, &log, run.stage_timeout, cancel).await?;

            let mut sbom = artifact.as_os_str().to_owned();
            sbom.push(".sbom.json");
            let sbom = PathBuf::from(sbom);
            if sbom.exists() {
                artifacts.push(sbom);
            } else {
                warn!(artifact = %artifact.display(), "SBOM generator produced no output");
            }
        }
        result.record(started);
        Ok(artifacts)
    }
}

async fn timed(
    command: Command,
    ctx: &StageContext,
    result: &mut BuildResult,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(), StageError> {
    info!(platform = %ctx.target, stage = %result.stage, "stage started");
    let started = Instant::now();
    let outcome = run_stage(command, &ctx.log_path(result.stage.log_name()), timeout, cancel).await;
    result.record(started);
    outcome
}

/// Fresh per-target work directory with the manifest the generator reads.
fn prepare(ctx: &StageContext, manifest: &Manifest) -> Result<(), StageError> {
    if ctx.work_dir.exists() {
        std::fs::remove_dir_all(&ctx.work_dir).map_err(|e| StageError::io(&ctx.work_dir, e))?;
    }
    for dir in [&ctx.logs_dir, &ctx.work_dir.join("bin")] {
        std::fs::create_dir_all(dir).map_err(|e| StageError::io(dir, e))?;
    }

    let mut manifest = manifest.clone();
    manifest.dist.output_path = ctx.build_dir.display().to_string();
    let yaml = manifest
        .to_yaml()
        .map_err(|e| StageError::Output(format!("failed to render manifest: {e}")))?;
    std::fs::write(&ctx.manifest_path, yaml).map_err(|e| StageError::io(&ctx.manifest_path, e))
}

/// Archives and packages in the packager output, sorted by name.
fn discover(dist_dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    let entries = std::fs::read_dir(dist_dir).map_err(|e| StageError::io(dist_dir, e))?;
    let mut found = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StageError::io(dist_dir, e))?.path();
        let is_package = path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| PACKAGE_EXTENSIONS.iter().any(|ext| n.ends_with(ext)));
        if is_package {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
