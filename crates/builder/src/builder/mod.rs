//! Distribution builder.
//!
//! Structure:
//! - `components/` - Component registry and the built-in catalog
//! - `config` - Collector config and component list importers
//! - `compiler` - References to builder manifest
//! - `versions` - Toolchain version table and resolution
//! - `platforms` - Target matrix
//! - `orchestrator` - Per-target pipelines with bounded parallelism
//! - `toolchain` / `packaging` / `process` - External stage processes
//! - `naming` / `collector` - Artifact naming and collection
//! - `tools` / `doctor` - Tool cache and preflight checks

pub mod collector;
pub mod compiler;
pub mod components;
pub mod config;
pub mod doctor;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod orchestrator;
pub mod packaging;
pub mod platforms;
pub mod process;
pub mod toolchain;
pub mod tools;
pub mod versions;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use components::registry::Registry;
use compiler::{CompileOptions, Compilation, UnresolvedComponent};
use config::ComponentList;
use error::RunError;
use manifest::{DistMetadata, Manifest};
use naming::ArtifactTemplate;
use orchestrator::{Orchestrator, PipelineRun};
use process::CancelToken;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use toolchain::GoToolchain;
use tracing::{info, warn};
use versions::{EffectiveVersions, Version, VersionRequest, VersionTable};

pub const DEFAULT_OUTPUT_DIR: &str = "dist";
pub const DEFAULT_WORK_DIR: &str = ".build";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30 * 60;

/// Commands for the CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Compile a collector config or component list into a builder manifest
    Compile(CompileArgs),
    /// Build, package and collect the distribution for every target platform
    Build(BuildArgs),
    /// Show the resolved toolchain versions
    Versions(VersionsArgs),
    /// Manage the tool cache
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
        /// Tool cache directory
        #[arg(long, default_value = tools::DEFAULT_TOOLS_DIR, global = true)]
        tools_dir: PathBuf,
        /// Collector release whose tools to use (default: newest known)
        #[arg(long = "version", global = true)]
        collector_version: Option<Version>,
        /// Version table override
        #[arg(long, global = true)]
        versions: Option<PathBuf>,
    },
    /// Check that the external toolchain is installed
    Doctor {
        #[arg(long, default_value = tools::DEFAULT_TOOLS_DIR)]
        tools_dir: PathBuf,
        #[arg(long)]
        versions: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// Download the generator and supervisor binaries
    Fetch,
    /// Show cache status
    Status,
    /// Remove the tool cache
    Clean,
}

/// Where components come from.
#[derive(Args)]
pub struct SourceArgs {
    /// Existing builder manifest
    #[arg(long, conflicts_with_all = ["config", "components"])]
    manifest: Option<PathBuf>,
    /// Collector configuration to import components from
    #[arg(long)]
    config: Option<PathBuf>,
    /// Component list (`receivers: [otlp]`, optional `modules:` pins)
    #[arg(long, conflicts_with = "config")]
    components: Option<PathBuf>,
}

/// Manifest metadata and compilation switches.
#[derive(Args)]
pub struct DistArgs {
    /// Distribution (binary) name
    #[arg(long)]
    name: Option<String>,
    /// Go module path of the generated distribution
    #[arg(long)]
    module: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Version stamped into the distribution and its artifacts
    #[arg(long)]
    dist_version: Option<String>,
    /// Collector release to resolve components against
    #[arg(long)]
    collector_version: Option<Version>,
    /// Leave out the vendor bundle and its replace directives
    #[arg(long)]
    no_vendor: bool,
    /// Component registry override
    #[arg(long)]
    registry: Option<PathBuf>,
}

impl DistArgs {
    /// Flags that only steer compilation from a config or component list.
    fn compile_only_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.collector_version.is_some() {
            flags.push("--collector-version");
        }
        if self.no_vendor {
            flags.push("--no-vendor");
        }
        if self.registry.is_some() {
            flags.push("--registry");
        }
        flags
    }
}

#[derive(Args)]
pub struct CompileArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    dist: DistArgs,
    /// Write the manifest here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print the manifest and unresolved components as JSON
    #[arg(long)]
    json: bool,
    /// Version table override (default collector version)
    #[arg(long)]
    versions: Option<PathBuf>,
}

#[derive(Args)]
pub struct VersionOverrides {
    #[arg(long)]
    generator_version: Option<Version>,
    #[arg(long)]
    go_version: Option<Version>,
    #[arg(long)]
    supervisor_version: Option<Version>,
    /// Version table override
    #[arg(long)]
    versions: Option<PathBuf>,
}

impl VersionOverrides {
    fn request(&self) -> VersionRequest {
        VersionRequest {
            generator: self.generator_version,
            runtime: self.go_version,
            supervisor: self.supervisor_version,
        }
    }

    fn table(&self) -> Result<VersionTable> {
        load_table(self.versions.as_deref())
    }
}

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    dist: DistArgs,
    #[command(flatten)]
    toolchain: VersionOverrides,
    /// Comma-separated os/arch[/vN] list
    #[arg(long)]
    platforms: Option<String>,
    /// Operating systems (cross product with --goarch, overrides --platforms)
    #[arg(long, value_delimiter = ',')]
    goos: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    goarch: Vec<String>,
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,
    #[arg(long, default_value = DEFAULT_WORK_DIR)]
    work_dir: PathBuf,
    /// Targets built at once (each Go build can use several GB of memory)
    #[arg(long, default_value = "1")]
    parallelism: NonZeroUsize,
    #[arg(long, default_value_t = DEFAULT_STAGE_TIMEOUT_SECS)]
    stage_timeout_secs: u64,
    /// Stop after writing the manifest
    #[arg(long)]
    manifest_only: bool,
    #[arg(long, default_value = naming::DEFAULT_TEMPLATE)]
    artifact_template: String,
    #[arg(long, default_value = tools::DEFAULT_TOOLS_DIR)]
    tools_dir: PathBuf,
    /// Skip SBOM generation
    #[arg(long)]
    no_sbom: bool,
    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct VersionsArgs {
    /// Manifest to derive declared versions from
    #[arg(long)]
    manifest: Option<PathBuf>,
    #[command(flatten)]
    toolchain: VersionOverrides,
    #[arg(long)]
    json: bool,
}

pub async fn run(command: Commands, cancel: &CancelToken) -> Result<ExitCode> {
    match command {
        Commands::Compile(args) => compile(&args),
        Commands::Build(args) => build(args, cancel).await,
        Commands::Versions(args) => show_versions(&args),
        Commands::Tools {
            command,
            tools_dir,
            collector_version,
            versions,
        } => {
            let table = load_table(versions.as_deref())?;
            let row = match collector_version {
                Some(v) => *table
                    .row(&v)
                    .with_context(|| format!("Unknown collector version {v}"))?,
                None => table.default_row(),
            };
            match command {
                ToolsCommand::Fetch => tools::fetch(&tools_dir, &row.builder, &row.supervisor)?,
                ToolsCommand::Status => tools::status(&tools_dir, &row.builder, &row.supervisor)?,
                ToolsCommand::Clean => tools::clean(&tools_dir)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor { tools_dir, versions } => {
            doctor::run(&tools_dir, &load_table(versions.as_deref())?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn compile(args: &CompileArgs) -> Result<ExitCode> {
    let registry = load_registry(args.dist.registry.as_deref())?;
    let table = load_table(args.versions.as_deref())?;
    let compilation = compile_source(&registry, &table, &args.source, &args.dist)?;
    print_unresolved(&compilation.unresolved);

    if args.json {
        let report = serde_json::json!({
            "manifest": compilation.manifest,
            "unresolved": compilation.unresolved,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    let yaml = compilation.manifest.to_yaml()?;
    match &args.output {
        Some(path) => {
            write_file(path, &yaml)?;
            eprintln!("Manifest written to {}", path.display());
        }
        None if !args.json => print!("{yaml}"),
        None => {}
    }
    Ok(ExitCode::SUCCESS)
}

async fn build(args: BuildArgs, cancel: &CancelToken) -> Result<ExitCode> {
    println!("=== Building distribution ===\n");
    let table = args.toolchain.table()?;

    let manifest = match &args.source.manifest {
        Some(path) => {
            let rejected = args.dist.compile_only_flags();
            if !rejected.is_empty() {
                bail!(
                    "{} cannot be combined with build --manifest; the manifest is built as written",
                    rejected.join(", ")
                );
            }
            let text = read_file(path)?;
            let mut manifest = Manifest::parse(&text)
                .with_context(|| format!("Invalid manifest {}", path.display()))?;
            manifest.dist = dist_metadata(&args.dist, manifest.dist);
            manifest
        }
        None => {
            let registry = load_registry(args.dist.registry.as_deref())?;
            let compilation = compile_source(&registry, &table, &args.source, &args.dist)?;
            print_unresolved(&compilation.unresolved);
            compilation.manifest
        }
    };

    let versions = versions::resolve(&table, &args.toolchain.request(), Some(&manifest))?;
    print_versions(&versions);

    if args.manifest_only {
        let path = args.output.join("manifest.yaml");
        write_file(&path, &manifest.to_yaml()?)?;
        println!("\nManifest written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let targets = platforms::resolve_matrix(args.platforms.as_deref(), &args.goos, &args.goarch)?;
    let targets_list: Vec<String> = targets.iter().map(ToString::to_string).collect();
    println!("\nTargets: {}", targets_list.join(", "));

    let mut run = PipelineRun::new(
        manifest,
        versions,
        targets,
        args.output.clone(),
        args.work_dir.clone(),
    );
    run.parallelism = args.parallelism;
    run.stage_timeout = Duration::from_secs(args.stage_timeout_secs);
    run.naming = ArtifactTemplate::parse(&args.artifact_template)?;

    let mut toolchain = GoToolchain::new(&args.tools_dir);
    toolchain.sbom = !args.no_sbom;

    let (report, code) = match Orchestrator::new(toolchain).run(run, cancel).await {
        Ok(report) => (report, ExitCode::SUCCESS),
        Err(RunError::TargetsFailed(report)) => (*report, ExitCode::FAILURE),
        Err(err) => {
            if let RunError::Collect { report, .. } = &err {
                report.print_summary();
            }
            return Err(err.into());
        }
    };
    report.print_summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if cancel.is_cancelled() {
        warn!("build was cancelled");
    }
    Ok(code)
}

fn show_versions(args: &VersionsArgs) -> Result<ExitCode> {
    let table = args.toolchain.table()?;
    let manifest = match &args.manifest {
        Some(path) => Some(Manifest::parse(&read_file(path)?)?),
        None => None,
    };
    let versions = versions::resolve(&table, &args.toolchain.request(), manifest.as_ref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(ExitCode::SUCCESS);
    }
    print_versions(&versions);
    println!("\nKnown collector releases:");
    for (collector, row) in table.rows() {
        let marker = if *collector == table.default_version() { " (default)" } else { "" };
        println!(
            "  {collector:10} builder {} supervisor {} go {}{marker}",
            row.builder, row.supervisor, row.go
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Read the component source and compile it. A manifest source is mapped
/// back to references and recompiled, keeping its metadata and collector
/// version unless overridden.
fn compile_source(
    registry: &Registry,
    table: &VersionTable,
    source: &SourceArgs,
    dist: &DistArgs,
) -> Result<Compilation> {
    let mut base = DistMetadata::default();
    let mut declared = None;
    let list = match (&source.manifest, &source.config, &source.components) {
        (Some(path), _, _) => {
            let manifest = Manifest::parse(&read_file(path)?)
                .with_context(|| format!("Invalid manifest {}", path.display()))?;
            let (references, pins) = manifest.references(registry);
            declared = manifest.collector_version();
            base = manifest.dist;
            ComponentList { references, pins }
        }
        (None, Some(path), _) => {
            let references = config::extract(&read_file(path)?)
                .with_context(|| format!("Invalid collector config {}", path.display()))?;
            ComponentList::from_references(references)
        }
        (None, None, Some(path)) => config::parse_component_list(&read_file(path)?)
            .with_context(|| format!("Invalid component list {}", path.display()))?,
        (None, None, None) => bail!("One of --manifest, --config or --components is required"),
    };

    let options = CompileOptions {
        dist: dist_metadata(dist, base),
        collector_version: dist
            .collector_version
            .or(declared)
            .unwrap_or(table.default_version()),
        include_vendor: !dist.no_vendor,
        pins: list.pins,
    };
    info!(
        components = list.references.len(),
        collector = %options.collector_version,
        "compiling manifest"
    );
    Ok(compiler::compile(registry, &list.references, &options)?)
}

fn dist_metadata(args: &DistArgs, mut dist: DistMetadata) -> DistMetadata {
    if let Some(name) = &args.name {
        dist.name.clone_from(name);
    }
    if let Some(module) = &args.module {
        dist.module.clone_from(module);
    }
    if let Some(description) = &args.description {
        dist.description.clone_from(description);
    }
    if let Some(version) = &args.dist_version {
        dist.version.clone_from(version);
    }
    dist
}

fn print_unresolved(unresolved: &[UnresolvedComponent]) {
    if unresolved.is_empty() {
        return;
    }
    eprintln!("Unresolved components (left out of the manifest):");
    for component in unresolved {
        eprintln!("  - {component}");
    }
    eprintln!();
}

fn print_versions(versions: &EffectiveVersions) {
    println!("Toolchain:");
    println!("  generator   {}", versions.generator);
    println!("  go          {}", versions.runtime);
    println!("  supervisor  {}", versions.supervisor);
}

fn load_registry(path: Option<&Path>) -> Result<Registry> {
    match path {
        Some(path) => Ok(Registry::load(path)?),
        None => Ok(Registry::builtin()),
    }
}

fn load_table(path: Option<&Path>) -> Result<VersionTable> {
    match path {
        Some(path) => Ok(VersionTable::load(path)?),
        None => Ok(VersionTable::builtin()),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}
