//! Build target platforms.
//!
//! Targets are written `os/arch` or `os/arch/vN` (ARM only), e.g.
//! `linux/amd64,linux/arm/v7,windows/amd64`.

use super::error::PlatformError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PLATFORM: BuildTarget = BuildTarget {
    os: Os::Linux,
    arch: Arch::Arm64,
    arm: None,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }
}

impl FromStr for Os {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(Self::Linux),
            "darwin" => Ok(Self::Darwin),
            "windows" => Ok(Self::Windows),
            _ => Err(PlatformError::UnsupportedOs(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
    Arm,
    Ppc64le,
    S390x,
    #[serde(rename = "386")]
    I386,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::I386 => "386",
        }
    }
}

impl FromStr for Arch {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" => Ok(Self::Amd64),
            "arm64" => Ok(Self::Arm64),
            "arm" => Ok(Self::Arm),
            "ppc64le" => Ok(Self::Ppc64le),
            "s390x" => Ok(Self::S390x),
            "386" => Ok(Self::I386),
            _ => Err(PlatformError::UnsupportedArch(s.to_string())),
        }
    }
}

/// One cell of the build matrix. Immutable once parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BuildTarget {
    pub os: Os,
    pub arch: Arch,
    /// ARM variant (5, 6 or 7); only set for `arm`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arm: Option<u8>,
}

impl BuildTarget {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch, arm: None }
    }

    /// Directory-safe form: `linux_amd64`, `linux_armv7`.
    pub fn slug(&self) -> String {
        format!("{}_{}{}", self.os.as_str(), self.arch.as_str(), self.variant_suffix())
    }

    /// `v7` for ARM variants, empty otherwise.
    pub fn variant_suffix(&self) -> String {
        self.arm.map(|v| format!("v{v}")).unwrap_or_default()
    }

    pub fn exe_suffix(&self) -> &'static str {
        match self.os {
            Os::Windows => ".exe",
            Os::Linux | Os::Darwin => "",
        }
    }

    pub fn archive_ext(&self) -> &'static str {
        match self.os {
            Os::Windows => ".zip",
            Os::Linux | Os::Darwin => ".tar.gz",
        }
    }

    /// System packages are only produced for linux.
    pub fn has_packages(&self) -> bool {
        self.os == Os::Linux
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os.as_str(), self.arch.as_str())?;
        if let Some(v) = self.arm {
            write!(f, "/v{v}")?;
        }
        Ok(())
    }
}

impl FromStr for BuildTarget {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let (os, arch, variant) = match parts.as_slice() {
            [os, arch] => (*os, *arch, None),
            [os, arch, variant] => (*os, *arch, Some(*variant)),
            _ => return Err(PlatformError::Malformed(s.to_string())),
        };
        if os.is_empty() || arch.is_empty() {
            return Err(PlatformError::Malformed(s.to_string()));
        }
        let os: Os = os.parse()?;
        let arch: Arch = arch.parse()?;

        let arm = match variant {
            None => None,
            Some(v) => {
                let level = v.strip_prefix('v').and_then(|n| n.parse::<u8>().ok());
                match (arch, level) {
                    (Arch::Arm, Some(level @ 5..=7)) => Some(level),
                    _ => {
                        return Err(PlatformError::InvalidVariant {
                            arch: arch.as_str().to_string(),
                            variant: v.to_string(),
                        })
                    }
                }
            }
        };
        Ok(Self { os, arch, arm })
    }
}

/// Parse a comma-separated matrix. Duplicates collapse to their first
/// occurrence; order is preserved.
pub fn parse_matrix(spec: &str) -> Result<Vec<BuildTarget>, PlatformError> {
    let mut targets = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        push_unique(&mut targets, entry.parse()?);
    }
    if targets.is_empty() {
        return Err(PlatformError::Empty);
    }
    Ok(targets)
}

/// Resolve the matrix from CLI inputs. `goos`/`goarch` lists form a cross
/// product and take precedence over `platforms`; with neither, the default
/// platform is built.
pub fn resolve_matrix(
    platforms: Option<&str>,
    goos: &[String],
    goarch: &[String],
) -> Result<Vec<BuildTarget>, PlatformError> {
    if goos.is_empty() && goarch.is_empty() {
        return match platforms {
            Some(spec) => parse_matrix(spec),
            None => Ok(vec![DEFAULT_PLATFORM]),
        };
    }

    let oses: Vec<Os> = if goos.is_empty() {
        vec![DEFAULT_PLATFORM.os]
    } else {
        goos.iter()
            .map(|s| s.trim().parse())
            .collect::<Result<Vec<Os>, _>>()?
    };
    let arches: Vec<Arch> = if goarch.is_empty() {
        vec![DEFAULT_PLATFORM.arch]
    } else {
        goarch
            .iter()
            .map(|s| s.trim().parse())
            .collect::<Result<Vec<Arch>, _>>()?
    };

    let mut targets = Vec::new();
    for os in &oses {
        for arch in &arches {
            push_unique(&mut targets, BuildTarget::new(*os, *arch));
        }
    }
    Ok(targets)
}

fn push_unique(targets: &mut Vec<BuildTarget>, target: BuildTarget) {
    if !targets.contains(&target) {
        targets.push(target);
    }
}

/// Host platform in Go's naming, for selecting cached tool binaries.
pub fn host() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    };
    (os, arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let t: BuildTarget = "linux/arm/v7".parse().unwrap();
        assert_eq!(t.arm, Some(7));
        assert_eq!(t.slug(), "linux_armv7");
        assert_eq!(t.to_string(), "linux/arm/v7");

        let w: BuildTarget = "windows/amd64".parse().unwrap();
        assert_eq!(w.exe_suffix(), ".exe");
        assert_eq!(w.archive_ext(), ".zip");
        assert!(!w.has_packages());
    }

    #[test]
    fn test_malformed_targets_are_errors() {
        assert_eq!(
            "linux".parse::<BuildTarget>(),
            Err(PlatformError::Malformed("linux".to_string()))
        );
        let parse = str::parse::<BuildTarget>;
        assert!(matches!(parse("plan9/amd64"), Err(PlatformError::UnsupportedOs(_))));
        assert!(matches!(parse("linux/mips"), Err(PlatformError::UnsupportedArch(_))));
        assert!(matches!(parse("linux/amd64/v7"), Err(PlatformError::InvalidVariant { .. })));
        assert!(matches!(parse("linux/arm/v8"), Err(PlatformError::InvalidVariant { .. })));
        assert!(matches!(parse("linux/arm64/v7/x"), Err(PlatformError::Malformed(_))));
    }

    #[test]
    fn test_matrix_dedup_preserves_order() {
        let matrix = parse_matrix("linux/amd64, darwin/arm64,linux/amd64,linux/arm/v6").unwrap();
        let rendered: Vec<String> = matrix.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["linux/amd64", "darwin/arm64", "linux/arm/v6"]);
        assert_eq!(parse_matrix(" , "), Err(PlatformError::Empty));
        assert!(parse_matrix("linux/amd64,bogus").is_err());
    }

    #[test]
    fn test_goos_goarch_cross_product_wins() {
        let goos = vec!["linux".to_string(), "windows".to_string()];
        let goarch = vec!["amd64".to_string(), "arm64".to_string()];
        let matrix = resolve_matrix(Some("darwin/arm64"), &goos, &goarch).unwrap();
        assert_eq!(matrix.len(), 4);
        assert_eq!(matrix[0], BuildTarget::new(Os::Linux, Arch::Amd64));
        assert_eq!(matrix[3], BuildTarget::new(Os::Windows, Arch::Arm64));

        assert_eq!(resolve_matrix(None, &[], &[]).unwrap(), vec![DEFAULT_PLATFORM]);
    }
}
