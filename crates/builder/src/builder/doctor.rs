//! Preflight checks for the external build toolchain.

use super::tools;
use super::versions::{Version, VersionTable};
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;
use std::process::Command;

/// Tools every build needs on PATH.
const REQUIRED: &[&str] = &["go", "goreleaser", "syft", "curl"];

pub fn run(tools_dir: &Path, table: &VersionTable) -> Result<()> {
    println!("=== Doctor ===\n");
    let mut ok = true;

    for tool in REQUIRED {
        match which::which(tool) {
            Ok(path) => println!("[OK] {tool} ({})", path.display()),
            Err(_) => {
                println!("[FAIL] missing `{tool}` in PATH");
                ok = false;
            }
        }
    }

    let row = table.default_row();
    if which::which("go").is_ok() {
        match go_version() {
            Ok(found) if found >= row.go => println!("[OK] go {found} (>= {})", row.go),
            Ok(found) => {
                println!("[WARN] go {found} is older than {}; GOTOOLCHAIN will fetch it", row.go);
            }
            Err(err) => println!("[WARN] could not determine go version: {err:#}"),
        }
    }

    let generator = tools::generator_path(tools_dir, &row.builder);
    if generator.is_file() {
        println!("[OK] {}", generator.display());
    } else if which::which("ocb").is_ok() {
        println!("[OK] ocb (PATH)");
    } else {
        println!(
            "[FAIL] missing generator {} (run: distro-builder tools fetch)",
            generator.display()
        );
        ok = false;
    }

    if !ok {
        bail!("doctor checks failed");
    }
    println!("\nAll checks passed");
    Ok(())
}

fn go_version() -> Result<Version> {
    let output = Command::new("go")
        .arg("version")
        .output()
        .context("Failed to run go version")?;
    parse_go_version(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the release from `go version go1.23.4 linux/amd64`.
fn parse_go_version(text: &str) -> Result<Version> {
    let re = Regex::new(r"go(\d+)\.(\d+)(?:\.(\d+))?")?;
    let Some(caps) = re.captures(text) else {
        bail!("unrecognised go version output: {}", text.trim());
    };
    let part = |i: usize| caps.get(i).map_or(Ok(0), |m| m.as_str().parse::<u64>());
    Ok(Version::new(part(1)?, part(2)?, part(3)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_go_version() {
        let v = parse_go_version("go version go1.23.4 linux/amd64\n").unwrap();
        assert_eq!(v, Version::new(1, 23, 4));
        let v = parse_go_version("go version go1.22 darwin/arm64").unwrap();
        assert_eq!(v, Version::new(1, 22, 0));
    }

    #[test]
    fn test_parse_go_version_garbage() {
        assert!(parse_go_version("command not found").is_err());
    }
}
