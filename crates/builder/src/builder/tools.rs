//! Tool cache (fetch, status, clean).
//!
//! Holds the versioned source generator for the host and the supervisor
//! binaries bundled into packages. Everything else (go, goreleaser, syft) is
//! expected on PATH; see `doctor`.

#![allow(clippy::cast_precision_loss)] // File sizes don't need u64 precision for display

use super::platforms::{self, BuildTarget};
use super::versions::Version;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

pub const DEFAULT_TOOLS_DIR: &str = ".tools";

const RELEASES_URL: &str =
    "https://github.com/open-telemetry/opentelemetry-collector-releases/releases/download";

/// Platforms the supervisor is published for: (os, arch).
pub const SUPERVISOR_PLATFORMS: &[(&str, &str)] = &[
    ("darwin", "arm64"),
    ("darwin", "amd64"),
    ("linux", "arm64"),
    ("linux", "amd64"),
    ("linux", "ppc64le"),
    ("windows", "amd64"),
];

fn exe(os: &str) -> &'static str {
    if os == "windows" {
        ".exe"
    } else {
        ""
    }
}

/// Cached generator file name: `ocb_<v>_<os>_<arch>[.exe]`.
pub fn generator_file(version: &Version, os: &str, arch: &str) -> String {
    format!("ocb_{version}_{os}_{arch}{}", exe(os))
}

fn generator_url(version: &Version, os: &str, arch: &str) -> String {
    format!(
        "{RELEASES_URL}/cmd%2Fbuilder%2F{}/{}",
        version.tag(),
        generator_file(version, os, arch)
    )
}

/// Cached generator for the host platform.
pub fn generator_path(tools_dir: &Path, version: &Version) -> PathBuf {
    let (os, arch) = platforms::host();
    tools_dir.join(generator_file(version, os, arch))
}

/// Cached supervisor file name: `supervisor_<os>_<arch>[.exe]`.
pub fn supervisor_file(os: &str, arch: &str) -> String {
    format!("supervisor_{os}_{arch}{}", exe(os))
}

fn supervisor_dir(tools_dir: &Path, version: &Version) -> PathBuf {
    tools_dir.join(format!("supervisor-{}", version.tag()))
}

fn supervisor_url(version: &Version, os: &str, arch: &str) -> String {
    format!(
        "{RELEASES_URL}/cmd%2Fopampsupervisor%2F{}/opampsupervisor_{version}_{os}_{arch}{}",
        version.tag(),
        exe(os)
    )
}

/// Cached supervisor for a build target, if one is published for it.
pub fn supervisor_path(
    tools_dir: &Path,
    version: &Version,
    target: &BuildTarget,
) -> Option<PathBuf> {
    let os = target.os.as_str();
    let arch = target.arch.as_str();
    SUPERVISOR_PLATFORMS
        .contains(&(os, arch))
        .then(|| supervisor_dir(tools_dir, version).join(supervisor_file(os, arch)))
}

/// Fetch the host generator and all supervisor binaries.
pub fn fetch(tools_dir: &Path, generator: &Version, supervisor: &Version) -> Result<()> {
    println!("=== Fetching tools ===\n");
    std::fs::create_dir_all(tools_dir)
        .with_context(|| format!("Failed to create {}", tools_dir.display()))?;

    let (os, arch) = platforms::host();
    download(
        &generator_url(generator, os, arch),
        &generator_path(tools_dir, generator),
    )?;

    let dir = supervisor_dir(tools_dir, supervisor);
    std::fs::create_dir_all(&dir)?;
    for (os, arch) in SUPERVISOR_PLATFORMS {
        download(
            &supervisor_url(supervisor, os, arch),
            &dir.join(supervisor_file(os, arch)),
        )?;
    }
    Ok(())
}

fn download(url: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        println!("  {} already cached", dest.display());
        return Ok(());
    }
    println!("  Fetching {url}");
    info!(%url, dest = %dest.display(), "downloading tool");

    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let status = Command::new("curl")
        .args(["-fsSL", "--retry", "3", "-o"])
        .arg(&partial)
        .arg(url)
        .status()
        .context("Failed to run curl")?;

    if !status.success() {
        let _ = std::fs::remove_file(&partial);
        bail!("Download failed: {url}");
    }
    make_executable(&partial)?;
    std::fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move download to {}", dest.display()))?;

    let size = std::fs::metadata(dest)?.len();
    println!("  Cached: {} ({:.1} MB)", dest.display(), size as f64 / 1_000_000.0);
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Show cache status for the given versions.
pub fn status(tools_dir: &Path, generator: &Version, supervisor: &Version) -> Result<()> {
    println!("Tool Cache Status ({}):\n", tools_dir.display());

    let mut expected = vec![generator_path(tools_dir, generator)];
    let dir = supervisor_dir(tools_dir, supervisor);
    expected.extend(
        SUPERVISOR_PLATFORMS
            .iter()
            .map(|(os, arch)| dir.join(supervisor_file(os, arch))),
    );

    let mut cached = 0;
    for path in &expected {
        let label = path
            .strip_prefix(tools_dir)
            .unwrap_or(path)
            .display()
            .to_string();
        match std::fs::metadata(path) {
            Ok(meta) => {
                cached += 1;
                println!("  {label:48} [cached] {:.1} MB", meta.len() as f64 / 1_000_000.0);
            }
            Err(_) => println!("  {label:48} [missing]"),
        }
    }

    let total = if tools_dir.exists() { dir_size(tools_dir)? } else { 0 };
    println!();
    println!(
        "  Total: {}/{} cached ({:.1} MB)",
        cached,
        expected.len(),
        total as f64 / 1_000_000.0
    );
    Ok(())
}

/// Remove the tool cache.
pub fn clean(tools_dir: &Path) -> Result<()> {
    if tools_dir.exists() {
        std::fs::remove_dir_all(tools_dir)?;
        println!("Cleaned tool cache at {}", tools_dir.display());
    } else {
        println!("Tool cache {} is empty", tools_dir.display());
    }
    Ok(())
}

/// Get directory size in bytes.
fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_names() {
        let v = Version::new(0, 122, 0);
        assert_eq!(generator_file(&v, "linux", "amd64"), "ocb_0.122.0_linux_amd64");
        assert_eq!(generator_file(&v, "windows", "amd64"), "ocb_0.122.0_windows_amd64.exe");
        assert_eq!(
            generator_url(&v, "darwin", "arm64"),
            concat!(
                "https://github.com/open-telemetry/opentelemetry-collector-releases",
                "/releases/download/cmd%2Fbuilder%2Fv0.122.0/ocb_0.122.0_darwin_arm64",
            )
        );
    }

    #[test]
    fn test_supervisor_only_for_published_platforms() {
        let dir = Path::new("/cache");
        let v = Version::new(0, 122, 0);
        let linux: BuildTarget = "linux/amd64".parse().unwrap();
        assert_eq!(
            supervisor_path(dir, &v, &linux),
            Some(PathBuf::from("/cache/supervisor-v0.122.0/supervisor_linux_amd64"))
        );
        let arm: BuildTarget = "linux/arm/v7".parse().unwrap();
        assert_eq!(supervisor_path(dir, &v, &arm), None);
    }

    #[test]
    fn test_status_and_clean() {
        let dir = TempDir::new().unwrap();
        let tools = dir.path().join("tools");
        let v = Version::new(0, 122, 0);
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::write(generator_path(&tools, &v), b"binary").unwrap();
        assert_eq!(dir_size(&tools).unwrap(), 6);

        status(&tools, &v, &v).unwrap();
        clean(&tools).unwrap();
        assert!(!tools.exists());
        clean(&tools).unwrap();
    }
}
