//! Deterministic artifact names.

use super::error::NamingError;
use super::platforms::BuildTarget;
use regex::Regex;

pub const DEFAULT_TEMPLATE: &str = "{name}_v{version}_{os}_{arch}{label}{ext}";

const PLACEHOLDERS: &[&str] = &["name", "version", "os", "arch", "label", "ext"];

/// Recognised artifact extensions, longest first so `.tar.gz.sbom.json`
/// wins over `.sbom.json`.
const EXTENSIONS: &[&str] = &[
    ".tar.gz.sbom.json",
    ".zip.sbom.json",
    ".deb.sbom.json",
    ".rpm.sbom.json",
    ".apk.sbom.json",
    ".tar.gz",
    ".zip",
    ".deb",
    ".rpm",
    ".apk",
];

/// Extensions of files produced by the packager (SBOM inputs).
pub const PACKAGE_EXTENSIONS: &[&str] = &[".tar.gz", ".zip", ".deb", ".rpm", ".apk"];

/// Values substituted into a template.
#[derive(Clone, Debug)]
pub struct NameFields<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub target: &'a BuildTarget,
    pub label: &'a str,
    pub ext: &'a str,
}

#[derive(Clone, Debug)]
pub struct ArtifactTemplate {
    template: String,
}

impl Default for ArtifactTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

fn placeholder_regex() -> Result<Regex, regex::Error> {
    Regex::new(r"\{([^{}]*)\}")
}

impl ArtifactTemplate {
    /// Validate a template. Every placeholder must be known and `{ext}` is
    /// mandatory so distinct artifact kinds never share a name.
    pub fn parse(template: &str) -> Result<Self, NamingError> {
        let re = placeholder_regex()?;
        let mut has_ext = false;
        for cap in re.captures_iter(template) {
            let key = &cap[1];
            if !PLACEHOLDERS.contains(&key) {
                return Err(NamingError::UnknownPlaceholder(key.to_string()));
            }
            has_ext |= key == "ext";
        }
        if !has_ext {
            return Err(NamingError::MissingExtension);
        }
        Ok(Self {
            template: template.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Arch rendered with its ARM variant (`armv7`).
    pub fn render(&self, fields: &NameFields<'_>) -> String {
        let arch = format!("{}{}", fields.target.arch.as_str(), fields.target.variant_suffix());
        self.template
            .replace("{name}", fields.name)
            .replace("{version}", fields.version)
            .replace("{os}", fields.target.os.as_str())
            .replace("{arch}", &arch)
            .replace("{label}", fields.label)
            .replace("{ext}", fields.ext)
    }
}

/// File stem the packager gives a target's artifacts:
/// `<name>_<version>_<os>_<arch>[vN]`.
pub fn package_stem(name: &str, version: &str, target: &BuildTarget) -> String {
    format!(
        "{name}_{version}_{}_{}{}",
        target.os.as_str(),
        target.arch.as_str(),
        target.variant_suffix()
    )
}

/// Split a produced file name into `(label, ext)`.
///
/// The label is whatever distinguishes the stem from the target's
/// [`package_stem`]: empty for the primary archive and packages, `_<stem>`
/// for anything named differently. Returns `None` for unrecognised files.
pub fn classify(file_name: &str, expected_stem: &str) -> Option<(String, &'static str)> {
    let ext = EXTENSIONS.iter().copied().find(|e| file_name.ends_with(e))?;
    let stem = &file_name[..file_name.len() - ext.len()];
    if stem.is_empty() {
        return None;
    }
    let label = match stem.strip_prefix(expected_stem) {
        Some(rest) => rest.to_string(),
        None => format!("_{stem}"),
    };
    Some((label, ext))
}
