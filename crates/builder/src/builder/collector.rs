//! Artifact collection into a flat output directory.
//!
//! Every destination name is planned before anything moves: a collision
//! between targets, or with a file already in the output directory, aborts
//! the whole collection with nothing moved.

use super::error::{CollectError, IntegrityError};
use super::manifest::DistMetadata;
use super::naming::{self, ArtifactTemplate, NameFields};
use super::orchestrator::{BuildResult, BuildStatus};
use super::platforms::BuildTarget;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

pub const CHECKSUMS_FILE: &str = "checksums.txt";
pub const MANIFEST_FILE: &str = "artifacts.json";

#[derive(Clone, Debug, Serialize)]
pub struct CollectedArtifact {
    pub name: String,
    pub target: BuildTarget,
    pub label: String,
    pub sha256: String,
    pub size: u64,
}

/// Contents of `artifacts.json`.
#[derive(Clone, Debug, Serialize)]
pub struct ArtifactManifest {
    pub distribution: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub artifacts: Vec<CollectedArtifact>,
}

struct PlannedMove<'a> {
    source: &'a Path,
    name: String,
    target: BuildTarget,
    label: String,
}

/// Move the artifacts of succeeded results into `output_dir`, then write
/// `checksums.txt` and `artifacts.json`.
pub fn collect(
    results: &[BuildResult],
    output_dir: &Path,
    template: &ArtifactTemplate,
    dist: &DistMetadata,
) -> Result<ArtifactManifest, CollectError> {
    let plan = plan(results, output_dir, template, dist)?;

    std::fs::create_dir_all(output_dir).map_err(|source| CollectError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let mut artifacts = Vec::with_capacity(plan.len());
    for entry in plan {
        let dest = output_dir.join(&entry.name);
        move_file(entry.source, &dest)?;
        let (sha256, size) = digest(&dest)?;
        debug!(artifact = %entry.name, %sha256, "collected artifact");
        artifacts.push(CollectedArtifact {
            name: entry.name,
            target: entry.target,
            label: entry.label,
            sha256,
            size,
        });
    }
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));

    write_checksums(&output_dir.join(CHECKSUMS_FILE), &artifacts)?;
    let manifest = ArtifactManifest {
        distribution: dist.name.clone(),
        version: dist.version.clone(),
        generated_at: Utc::now(),
        artifacts,
    };
    let path = output_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&path, json).map_err(|source| CollectError::Io { path, source })?;

    info!(
        count = manifest.artifacts.len(),
        output = %output_dir.display(),
        "artifacts collected"
    );
    Ok(manifest)
}

fn plan<'a>(
    results: &'a [BuildResult],
    output_dir: &Path,
    template: &ArtifactTemplate,
    dist: &DistMetadata,
) -> Result<Vec<PlannedMove<'a>>, IntegrityError> {
    let mut planned: Vec<PlannedMove<'a>> = Vec::new();
    let mut owners: HashMap<String, BuildTarget> = HashMap::new();

    for result in results.iter().filter(|r| r.status == BuildStatus::Succeeded) {
        let stem = naming::package_stem(&dist.name, &dist.version, &result.target);
        for source in &result.artifacts {
            let file_name = source
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let Some((label, ext)) = naming::classify(file_name, &stem) else {
                debug!(file = %source.display(), "skipping unrecognised file");
                continue;
            };
            if std::fs::metadata(source).map(|m| m.len()).unwrap_or(0) == 0 {
                return Err(IntegrityError::EmptyArtifact(source.clone()));
            }

            let name = template.render(&NameFields {
                name: &dist.name,
                version: &dist.version,
                target: &result.target,
                label: &label,
                ext,
            });
            if name == CHECKSUMS_FILE || name == MANIFEST_FILE {
                return Err(IntegrityError::Reserved(name));
            }
            if let Some(first) = owners.get(&name) {
                return Err(IntegrityError::Collision {
                    name,
                    first: *first,
                    second: result.target,
                });
            }
            if output_dir.join(&name).exists() {
                return Err(IntegrityError::AlreadyExists(name));
            }
            owners.insert(name.clone(), result.target);
            planned.push(PlannedMove {
                source,
                name,
                target: result.target,
                label,
            });
        }
    }
    Ok(planned)
}

/// Rename, falling back to copy and remove across filesystems.
fn move_file(source: &Path, dest: &Path) -> Result<(), CollectError> {
    if std::fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(source, dest).map_err(|e| CollectError::Io {
        path: dest.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(source).map_err(|e| CollectError::Io {
        path: source.to_path_buf(),
        source: e,
    })
}

fn digest(path: &Path) -> Result<(String, u64), CollectError> {
    let io = |source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher).map_err(io)?;
    Ok((hex::encode(hasher.finalize()), size))
}

fn write_checksums(path: &Path, artifacts: &[CollectedArtifact]) -> Result<(), CollectError> {
    let io = |source| CollectError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io)?);
    for artifact in artifacts {
        writeln!(out, "{}  {}", artifact.sha256, artifact.name).map_err(io)?;
    }
    out.flush().map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::orchestrator::Stage;
    use tempfile::TempDir;

    fn dist() -> DistMetadata {
        DistMetadata {
            name: "otelcol".to_string(),
            version: "1.0.0".to_string(),
            ..DistMetadata::default()
        }
    }

    /// A succeeded result whose archive sits in `<root>/<slug>/dist`.
    fn succeeded(root: &Path, target: &str) -> BuildResult {
        let target: BuildTarget = target.parse().unwrap();
        let dir = root.join(target.slug()).join("dist");
        std::fs::create_dir_all(&dir).unwrap();
        let archive = dir.join(format!(
            "{}{}",
            naming::package_stem("otelcol", "1.0.0", &target),
            target.archive_ext()
        ));
        std::fs::write(&archive, format!("archive for {target}")).unwrap();

        let mut result = BuildResult::pending(target);
        result.status = BuildStatus::Succeeded;
        result.stage = Stage::Collecting;
        result.artifacts.push(archive);
        result
    }

    #[test]
    fn test_collect_renames_and_checksums() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let output = out.path().join("release");
        let results = vec![
            succeeded(work.path(), "linux/amd64"),
            succeeded(work.path(), "windows/amd64"),
        ];

        let manifest = collect(&results, &output, &ArtifactTemplate::default(), &dist()).unwrap();
        let names: Vec<&str> = manifest.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["otelcol_v1.0.0_linux_amd64.tar.gz", "otelcol_v1.0.0_windows_amd64.zip"]
        );
        assert!(output.join("otelcol_v1.0.0_linux_amd64.tar.gz").exists());
        assert!(!results[0].artifacts[0].exists());

        let checksums = std::fs::read_to_string(output.join(CHECKSUMS_FILE)).unwrap();
        let expected = hex::encode(Sha256::digest(b"archive for linux/amd64"));
        assert!(checksums.contains(&format!("{expected}  otelcol_v1.0.0_linux_amd64.tar.gz\n")));

        let text = std::fs::read_to_string(output.join(MANIFEST_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["artifacts"][1]["target"]["os"], "windows");
        assert_eq!(json["distribution"], "otelcol");
    }

    #[test]
    fn test_collision_moves_nothing() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let results = vec![
            succeeded(work.path(), "linux/amd64"),
            succeeded(work.path(), "linux/arm64"),
        ];
        let template = ArtifactTemplate::parse("{name}_{os}{ext}").unwrap();

        let err = collect(&results, out.path(), &template, &dist()).unwrap_err();
        assert!(matches!(
            err,
            CollectError::Integrity(IntegrityError::Collision { ref name, .. })
                if name == "otelcol_linux.tar.gz"
        ));
        for result in &results {
            assert!(result.artifacts[0].exists());
        }
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_existing_file_is_never_overwritten() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let existing = out.path().join("otelcol_v1.0.0_linux_amd64.tar.gz");
        std::fs::write(&existing, "previous release").unwrap();

        let results = vec![succeeded(work.path(), "linux/amd64")];
        let err = collect(&results, out.path(), &ArtifactTemplate::default(), &dist()).unwrap_err();
        assert!(matches!(err, CollectError::Integrity(IntegrityError::AlreadyExists(_))));
        assert_eq!(std::fs::read_to_string(existing).unwrap(), "previous release");
    }

    #[test]
    fn test_failed_results_are_not_collected() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let mut failed = succeeded(work.path(), "linux/arm64");
        failed.status = BuildStatus::Failed;
        let results = vec![succeeded(work.path(), "linux/amd64"), failed];

        let template = ArtifactTemplate::default();
        let manifest = collect(&results, out.path(), &template, &dist()).unwrap();
        assert_eq!(manifest.artifacts.len(), 1);
        assert!(results[1].artifacts[0].exists());
    }
}
