//! Per-target packaging config for goreleaser.
//!
//! The binary is already compiled, so the config uses the `prebuilt` builder
//! and only archives and packages it. System packages (apk, deb, rpm) are
//! produced for linux targets only.

use super::error::StageError;
use super::toolchain::StageContext;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = ".goreleaser.yaml";
pub const SUPERVISOR_BINARY: &str = "opampsupervisor";

const NAME_TEMPLATE: &str =
    "{{ .ProjectName }}_{{ .Version }}_{{ .Os }}_{{ .Arch }}{{ with .Arm }}v{{ . }}{{ end }}";
const PACKAGE_NAME_TEMPLATE: &str =
    "{{ .PackageName }}_{{ .Version }}_{{ .Os }}_{{ .Arch }}{{ with .Arm }}v{{ . }}{{ end }}";

#[derive(Serialize)]
struct Config<'a> {
    version: u8,
    project_name: &'a str,
    dist: &'a str,
    builds: Vec<Build<'a>>,
    archives: Vec<Archive<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    nfpms: Vec<Nfpm<'a>>,
    checksum: Disable,
    release: Disable,
    snapshot: Snapshot,
}

#[derive(Serialize)]
struct Build<'a> {
    id: &'a str,
    builder: &'a str,
    binary: &'a str,
    goos: Vec<&'a str>,
    goarch: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    goarm: Vec<String>,
    prebuilt: Prebuilt,
}

#[derive(Serialize)]
struct Prebuilt {
    path: String,
}

#[derive(Serialize)]
struct Archive<'a> {
    id: &'a str,
    ids: Vec<&'a str>,
    formats: Vec<&'a str>,
    name_template: &'a str,
    files: Vec<String>,
}

#[derive(Serialize)]
struct Nfpm<'a> {
    id: &'a str,
    package_name: &'a str,
    ids: Vec<&'a str>,
    formats: Vec<&'a str>,
    file_name_template: &'a str,
    description: &'a str,
    maintainer: String,
    homepage: &'a str,
    license: &'a str,
    bindir: &'a str,
    contents: Vec<Content>,
    scripts: Scripts,
}

#[derive(Serialize)]
struct Content {
    src: String,
    dst: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_info: Option<FileInfo>,
}

#[derive(Serialize)]
struct FileInfo {
    mode: u32,
}

#[derive(Serialize)]
struct Scripts {
    preinstall: String,
    postinstall: String,
    preremove: String,
}

#[derive(Serialize)]
struct Disable {
    disable: bool,
}

#[derive(Serialize)]
struct Snapshot {
    version_template: &'static str,
}

/// Render the packaging config and its support files into the target work
/// directory. `supervisor` is staged into archives and packages when given.
pub fn render(ctx: &StageContext, supervisor: Option<&Path>) -> Result<PathBuf, StageError> {
    let name = ctx.dist.name.as_str();
    let target = &ctx.target;
    let exe = target.exe_suffix();

    let supervisor_rel = match supervisor {
        Some(src) => {
            let rel = format!("supervisor/{SUPERVISOR_BINARY}{exe}");
            let dst = ctx.work_dir.join(&rel);
            create_parent(&dst)?;
            std::fs::copy(src, &dst).map_err(|e| StageError::io(src, e))?;
            Some(rel)
        }
        None => None,
    };

    let nfpms = if target.has_packages() {
        write_package_files(ctx)?;
        let mut contents = vec![Content {
            src: format!("packaging/{name}.service"),
            dst: format!("/lib/systemd/system/{name}.service"),
            file_info: Some(FileInfo { mode: 0o644 }),
        }];
        if let Some(rel) = &supervisor_rel {
            contents.push(Content {
                src: rel.clone(),
                dst: format!("/usr/bin/{SUPERVISOR_BINARY}"),
                file_info: Some(FileInfo { mode: 0o755 }),
            });
        }
        vec![Nfpm {
            id: name,
            package_name: name,
            ids: vec![name],
            formats: vec!["apk", "deb", "rpm"],
            file_name_template: PACKAGE_NAME_TEMPLATE,
            description: &ctx.dist.description,
            maintainer: format!("{name} maintainers"),
            homepage: &ctx.dist.module,
            license: "Apache 2.0",
            bindir: "/usr/bin",
            contents,
            scripts: Scripts {
                preinstall: "packaging/preinstall.sh".to_string(),
                postinstall: "packaging/postinstall.sh".to_string(),
                preremove: "packaging/preremove.sh".to_string(),
            },
        }]
    } else {
        Vec::new()
    };

    let format = target.archive_ext().trim_start_matches('.');
    let config = Config {
        version: 2,
        project_name: name,
        dist: "dist",
        builds: vec![Build {
            id: name,
            builder: "prebuilt",
            binary: name,
            goos: vec![target.os.as_str()],
            goarch: vec![target.arch.as_str()],
            goarm: target.arm.map(|v| v.to_string()).into_iter().collect(),
            prebuilt: Prebuilt {
                path: format!("bin/{name}{exe}"),
            },
        }],
        archives: vec![Archive {
            id: name,
            ids: vec![name],
            formats: vec![format],
            name_template: NAME_TEMPLATE,
            files: supervisor_rel.into_iter().collect(),
        }],
        nfpms,
        checksum: Disable { disable: true },
        release: Disable { disable: true },
        snapshot: Snapshot {
            version_template: "{{ .Env.RELEASE_VERSION }}",
        },
    };

    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| StageError::Output(format!("failed to render packaging config: {e}")))?;
    let path = ctx.work_dir.join(CONFIG_FILE);
    std::fs::write(&path, yaml).map_err(|e| StageError::io(&path, e))?;
    Ok(path)
}

fn write_package_files(ctx: &StageContext) -> Result<(), StageError> {
    let name = &ctx.dist.name;
    let dir = ctx.work_dir.join("packaging");
    std::fs::create_dir_all(&dir).map_err(|e| StageError::io(&dir, e))?;

    let service = format!(
        "[Unit]\n\
         Description={description}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         User={name}\n\
         Group={name}\n\
         ExecStart=/usr/bin/{name} --config /etc/{name}/config.yaml\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        description = ctx.dist.description,
    );
    write_file(&dir.join(format!("{name}.service")), &service, false)?;

    let preinstall = format!(
        "#!/bin/sh\n\
         set -e\n\
         getent group {name} >/dev/null || groupadd --system {name}\n\
         getent passwd {name} >/dev/null || \\\n\
         \x20   useradd --system --gid {name} --no-create-home --shell /sbin/nologin {name}\n"
    );
    let postinstall = format!(
        "#!/bin/sh\n\
         set -e\n\
         if command -v systemctl >/dev/null 2>&1; then\n\
         \x20   systemctl daemon-reload\n\
         \x20   systemctl enable {name}.service\n\
         fi\n"
    );
    let preremove = format!(
        "#!/bin/sh\n\
         set -e\n\
         if command -v systemctl >/dev/null 2>&1; then\n\
         \x20   systemctl stop {name}.service || true\n\
         \x20   systemctl disable {name}.service || true\n\
         fi\n"
    );
    write_file(&dir.join("preinstall.sh"), &preinstall, true)?;
    write_file(&dir.join("postinstall.sh"), &postinstall, true)?;
    write_file(&dir.join("preremove.sh"), &preremove, true)?;
    Ok(())
}

fn create_parent(path: &Path) -> Result<(), StageError> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e)),
        None => Ok(()),
    }
}

fn write_file(path: &Path, contents: &str, executable: bool) -> Result<(), StageError> {
    std::fs::write(path, contents).map_err(|e| StageError::io(path, e))?;
    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| StageError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = executable;
    Ok(())
}
