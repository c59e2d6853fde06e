//! Dependency installation seam.

use crate::provision::executor::{CommandExecutor, ExecEnv};
use crate::provision::requirements::{DependencyManifest, normalize_name};
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

/// Default installer command. Placeholders: `{manifest}`, `{target}`, `{rootfs}`.
pub const DEFAULT_INSTALL_COMMAND: &str =
    "pip install --no-cache-dir --target {target} -r {manifest}";

static INSTALLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Successfully installed (?P<pkgs>.+)$").expect("installed regex is valid")
});

static RUNTIME_REQUIRES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:archlens:\s*)?runtime-requires:\s*(?P<pkgs>.+)$")
        .expect("runtime-requires regex is valid")
});

#[derive(Debug, Clone)]
pub struct InstallRequest<'a> {
    pub manifest: &'a DependencyManifest,
    /// Host path of the manifest inside the rootfs.
    pub manifest_path: PathBuf,
    /// Host directory the dependencies are installed into.
    pub target_dir: PathBuf,
    pub rootfs: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Normalized name → installed version (if the installer reported it).
    pub installed: BTreeMap<String, Option<String>>,
    /// System packages a dependency needs at runtime.
    pub runtime_requires: Vec<String>,
}

/// Installs a dependency manifest.
///
/// Implementations must fail when any requirement cannot be resolved.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, request: &InstallRequest<'_>) -> ArchlensResult<InstallReport>;
}

/// Installs by running a command template through a [`CommandExecutor`].
pub struct CommandInstaller {
    template: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandInstaller {
    pub fn new(template: &str, executor: Arc<dyn CommandExecutor>) -> ArchlensResult<Self> {
        let template: Vec<String> = template.split_whitespace().map(String::from).collect();
        if template.is_empty() {
            return Err(ArchlensError::Config("installer command is empty".into()));
        }
        if !template.iter().any(|t| t.contains("{manifest}")) {
            return Err(ArchlensError::Config(format!(
                "installer command must reference {{manifest}}: {}",
                template.join(" ")
            )));
        }
        Ok(Self { template, executor })
    }

    pub fn with_default_command(executor: Arc<dyn CommandExecutor>) -> ArchlensResult<Self> {
        Self::new(DEFAULT_INSTALL_COMMAND, executor)
    }

    fn render(&self, request: &InstallRequest<'_>) -> Vec<String> {
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{manifest}", &request.manifest_path.to_string_lossy())
                    .replace("{target}", &request.target_dir.to_string_lossy())
                    .replace("{rootfs}", &request.rootfs.to_string_lossy())
            })
            .collect()
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(&self, request: &InstallRequest<'_>) -> ArchlensResult<InstallReport> {
        let argv = self.render(request);
        let env = ExecEnv {
            cwd: request.manifest_path.parent().map(|p| p.to_path_buf()),
            env: vec![(
                "ARCHLENS_ROOTFS".to_string(),
                request.rootfs.to_string_lossy().into_owned(),
            )],
        };

        tracing::info!(command = %argv.join(" "), "Installing dependencies");
        let output = self.executor.execute(&argv, &env).await?;
        if !output.success() {
            return Err(ArchlensError::Process(format!(
                "dependency installation failed ({}): {}",
                output
                    .status
                    .map(|c| format!("exit {}", c))
                    .unwrap_or_else(|| "killed".to_string()),
                output.stderr_tail()
            )));
        }

        let mut report = parse_install_output(&output.stdout);

        // Installers without a summary line: trust the exit status
        for req in request.manifest.requirements() {
            report.installed.entry(req.normalized_name()).or_insert(None);
        }
        Ok(report)
    }
}

/// Extract installed packages and runtime requirements from installer output.
///
/// Understands pip's `Successfully installed name-1.0 other-2.0` summary and
/// `runtime-requires: pkg1 pkg2` lines.
pub fn parse_install_output(stdout: &str) -> InstallReport {
    let mut report = InstallReport::default();

    for line in stdout.lines() {
        if let Some(caps) = INSTALLED_RE.captures(line) {
            for pkg in caps["pkgs"].split_whitespace() {
                let (name, version) = match pkg.rsplit_once('-') {
                    Some((n, v)) if v.starts_with(|c: char| c.is_ascii_digit()) => {
                        (n, Some(v.to_string()))
                    }
                    _ => (pkg, None),
                };
                report.installed.insert(normalize_name(name), version);
            }
        } else if let Some(caps) = RUNTIME_REQUIRES_RE.captures(line) {
            for pkg in caps["pkgs"].split(|c: char| c == ',' || c.is_whitespace()) {
                if !pkg.is_empty() && !report.runtime_requires.iter().any(|p| p == pkg) {
                    report.runtime_requires.push(pkg.to_string());
                }
            }
        }
    }

    report
}
