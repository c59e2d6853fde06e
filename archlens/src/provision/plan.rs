//! Build plan: a build manifest classified into ordered provisioning stages.
//!
//! ```text
//! Toolchain ──→ Dependencies ──→ Source ──→ Entrypoint ──→ Cleanup
//! ```
//!
//! Every stage is sequential. Ordering rules enforced here:
//! - toolchain packages are installed before the dependency manifest
//! - the dependency manifest is installed before any source is copied
//! - the entrypoint is exec form (no shell between runtime and process)

use crate::provision::manifest::{BuildManifest, CommandForm, Instruction};
use crate::provision::stages;
use archlens_shared::constants::{filenames, image};
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static SYSTEM_INSTALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:sudo\s+)?(?P<pm>apt-get|apt|apk|yum|dnf|microdnf)\s+(?:\S+\s+)*?(?P<verb>install|add)\b(?P<args>.*)$")
        .expect("install regex is valid")
});

static SYSTEM_UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:sudo\s+)?(?:apt-get|apt|apk|yum|dnf)\s+(?:update|makecache)\b")
        .expect("update regex is valid")
});

static DEPENDENCY_INSTALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(?:-r|--requirement)(?:\s+|=)(?P<file>\S+)")
        .expect("dependency regex is valid")
});

/// A package-manager program at the start of a shell segment.
static PACKAGE_MANAGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<lead>^|&&|;)(?P<ws>\s*(?:sudo\s+)?)(?P<pm>apt-get|apt|apk|yum|dnf|microdnf)\b")
        .expect("package manager regex is valid")
});

/// System package manager detected in the toolchain commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageManager {
    Apt,
    Apk,
    Yum,
    Dnf,
}

impl PackageManager {
    fn from_command(pm: &str) -> Self {
        match pm.rsplit('/').next().unwrap_or(pm) {
            "apk" => Self::Apk,
            "yum" => Self::Yum,
            "dnf" | "microdnf" => Self::Dnf,
            _ => Self::Apt,
        }
    }

    /// Metadata directories removed by the cleanup stage.
    pub fn metadata_paths(&self) -> &'static [&'static str] {
        match self {
            Self::Apt => &["/var/lib/apt/lists", "/var/cache/apt/archives"],
            Self::Apk => &["/var/cache/apk"],
            Self::Yum => &["/var/cache/yum"],
            Self::Dnf => &["/var/cache/dnf"],
        }
    }

    /// Options that make the package manager operate on `root` instead of
    /// the host.
    pub fn root_args(&self, root: &Path) -> Vec<String> {
        let root = root.display();
        match self {
            Self::Apt => vec!["-o".to_string(), format!("RootDir={}", root)],
            Self::Apk => vec!["--root".to_string(), root.to_string()],
            Self::Yum | Self::Dnf => vec![format!("--installroot={}", root)],
        }
    }

    /// Command removing build-only packages from the image at `root`.
    pub fn purge_command(&self, packages: &[String], root: &Path) -> Vec<String> {
        let (program, verb): (&str, &[&str]) = match self {
            Self::Apt => ("apt-get", &["purge", "-y", "--auto-remove"]),
            Self::Apk => ("apk", &["del"]),
            Self::Yum => ("yum", &["remove", "-y"]),
            Self::Dnf => ("dnf", &["remove", "-y"]),
        };
        let mut argv = vec![program.to_string()];
        argv.extend(self.root_args(root));
        argv.extend(verb.iter().map(|v| v.to_string()));
        argv.extend(packages.iter().cloned());
        argv
    }
}

/// Rewrite `command` so every package-manager invocation targets `root`.
///
/// Other programs in the command are left untouched.
pub fn target_root(command: &CommandForm, root: &Path) -> CommandForm {
    match command {
        CommandForm::Exec(argv) => {
            let Some(program) = argv.first() else {
                return command.clone();
            };
            let name = program.rsplit('/').next().unwrap_or(program);
            if !matches!(name, "apt-get" | "apt" | "apk" | "yum" | "dnf" | "microdnf") {
                return command.clone();
            }
            let mut rooted = vec![program.clone()];
            rooted.extend(PackageManager::from_command(name).root_args(root));
            rooted.extend(argv[1..].iter().cloned());
            CommandForm::Exec(rooted)
        }
        CommandForm::Shell(text) => {
            let rooted = PACKAGE_MANAGER_RE.replace_all(text, |caps: &Captures| {
                let args: Vec<String> = PackageManager::from_command(&caps["pm"])
                    .root_args(root)
                    .iter()
                    .map(|a| shell_quote(a))
                    .collect();
                format!("{}{}{} {}", &caps["lead"], &caps["ws"], &caps["pm"], args.join(" "))
            });
            CommandForm::Shell(rooted.into_owned())
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-=:+@".contains(c));
    if plain && !arg.is_empty() {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// A command from the manifest, with the environment it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub line: usize,
    pub command: CommandForm,
    /// Image working directory at that point of the manifest.
    pub workdir: String,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolchainStep {
    pub package_manager: Option<PackageManager>,
    /// Build-only system packages (e.g. gcc, git).
    pub packages: Vec<String>,
    pub commands: Vec<PlannedCommand>,
}

#[derive(Debug, Clone)]
pub struct DependencyStep {
    /// Manifest in the build context.
    pub manifest: PathBuf,
    /// Where the manifest is copied inside the image.
    pub image_path: String,
    /// The install command as declared (informational).
    pub declared_install: Option<PlannedCommand>,
}

#[derive(Debug, Clone)]
pub struct SourceStep {
    pub line: usize,
    /// Path in the build context.
    pub source: PathBuf,
    /// Absolute destination inside the image.
    pub dest: String,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupStep {
    /// Absolute in-image paths whose contents are removed.
    pub metadata_paths: Vec<String>,
}

/// Build context: the directory manifest paths are relative to.
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
}

impl BuildContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a context-relative path, refusing to leave the context.
    pub fn resolve(&self, relative: &str) -> ArchlensResult<PathBuf> {
        let trimmed = relative.trim_start_matches("./");
        let path = Path::new(trimmed);
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ArchlensError::Config(format!(
                "path outside build context: {}",
                relative
            )));
        }
        Ok(self.root.join(path))
    }
}

/// Ordered provisioning plan.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub base_image: String,
    pub workdir: String,
    pub env: Vec<(String, String)>,
    pub exposed_ports: Vec<String>,
    pub labels: Vec<(String, String)>,
    pub user: Option<String>,
    pub toolchain: ToolchainStep,
    pub dependencies: DependencyStep,
    pub sources: Vec<SourceStep>,
    /// RUN commands declared after the dependency install; executed once the
    /// sources are in place.
    pub post_commands: Vec<PlannedCommand>,
    /// Exec-form argv (ENTRYPOINT + CMD).
    pub entrypoint: Vec<String>,
    pub cleanup: CleanupStep,
}

/// Input for [`BuildPlan::standard`].
#[derive(Debug, Clone)]
pub struct StandardPlan {
    pub base_image: String,
    pub toolchain_packages: Vec<String>,
    pub package_manager: PackageManager,
    pub manifest: PathBuf,
    pub source: PathBuf,
    pub workdir: String,
    pub entrypoint: Vec<String>,
}

impl BuildPlan {
    /// Classify manifest instructions into stages and validate their order.
    pub fn from_manifest(manifest: &BuildManifest, context: &BuildContext) -> ArchlensResult<Self> {
        let origin = manifest.origin();
        let config_err = |line: usize, msg: String| ArchlensError::manifest(origin, line, msg);

        let from_count = manifest
            .instructions()
            .filter(|i| matches!(i, Instruction::From { .. }))
            .count();
        if from_count == 0 {
            return Err(ArchlensError::Config(format!("{}: missing FROM", origin)));
        }
        if from_count > 1 {
            return Err(ArchlensError::Config(format!(
                "{}: multi-stage builds are not supported",
                origin
            )));
        }

        let mut workdir = "/".to_string();
        let mut env: Vec<(String, String)> = Vec::new();
        let mut toolchain = ToolchainStep::default();
        let mut cleanup = CleanupStep::default();
        let mut copies: Vec<(usize, Vec<String>, String)> = Vec::new();
        let mut runs: Vec<PlannedCommand> = Vec::new();
        let mut labels = Vec::new();
        let mut user = None;

        for line in manifest.lines() {
            match &line.instruction {
                Instruction::Workdir(dir) => {
                    workdir = join_image_path(&workdir, dir);
                }
                Instruction::Env(pairs) => {
                    for (k, v) in pairs {
                        env.retain(|(key, _)| key != k);
                        env.push((k.clone(), v.clone()));
                    }
                }
                Instruction::Copy { sources, dest } => {
                    copies.push((line.line, sources.clone(), join_image_path(&workdir, dest)));
                }
                Instruction::Run(command) => runs.push(PlannedCommand {
                    line: line.line,
                    command: command.clone(),
                    workdir: workdir.clone(),
                    env: env.clone(),
                }),
                Instruction::Label(pairs) => labels.extend(pairs.iter().cloned()),
                Instruction::User(u) => user = Some(u.clone()),
                Instruction::Other { keyword, .. } => {
                    tracing::warn!(line = line.line, keyword = %keyword, "Ignoring unsupported instruction");
                }
                _ => {}
            }
        }

        // Dependency install: the RUN that references `-r <file>`
        let dep_run = runs.iter().find_map(|run| {
            DEPENDENCY_INSTALL_RE
                .captures(&run.command.text())
                .map(|caps| (run.clone(), caps["file"].to_string()))
        });
        let Some((dep_run, dep_file)) = dep_run else {
            return Err(ArchlensError::Config(format!(
                "{}: no dependency install step (expected a RUN with -r <manifest>)",
                origin
            )));
        };

        let dep_basename = Path::new(&dep_file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| filenames::DEPENDENCY_MANIFEST.to_string());

        let dep_copy = copies.iter().find(|(_, sources, _)| {
            sources.iter().any(|s| {
                Path::new(s)
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy() == dep_basename)
            })
        });
        let Some((dep_copy_line, dep_sources, dep_dest)) = dep_copy.cloned() else {
            return Err(config_err(
                dep_run.line,
                format!("dependency manifest '{}' is never copied into the image", dep_file),
            ));
        };
        if dep_copy_line > dep_run.line {
            return Err(config_err(
                dep_copy_line,
                "dependency manifest copied after it is installed".to_string(),
            ));
        }

        let manifest_source = dep_sources
            .iter()
            .find(|s| {
                Path::new(s)
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy() == dep_basename)
            })
            .cloned()
            .unwrap_or_default();
        let image_path = if dep_dest.ends_with('/') || dep_sources.len() > 1 || !dep_dest.ends_with(&dep_basename) {
            join_image_path(&dep_dest, &dep_basename)
        } else {
            dep_dest.clone()
        };

        // Classify the remaining RUN commands
        let mut post_commands = Vec::new();
        for run in runs.iter().filter(|r| r.line != dep_run.line) {
            if run.line > dep_run.line {
                if is_toolchain_command(&run.command) {
                    return Err(config_err(
                        run.line,
                        "system packages must be installed before the dependency manifest"
                            .to_string(),
                    ));
                }
                post_commands.push(run.clone());
                continue;
            }
            classify_toolchain(run, &mut toolchain, &mut cleanup);
        }

        // System packages installed in the same RUN as the dependency manifest
        let dep_segments = split_segments(&dep_run.command.text());
        if let Some(at) = dep_segments.iter().position(|s| DEPENDENCY_INSTALL_RE.is_match(s)) {
            if dep_segments[at + 1..].iter().any(|s| SYSTEM_INSTALL_RE.is_match(s)) {
                return Err(config_err(
                    dep_run.line,
                    "system packages must be installed before the dependency manifest".to_string(),
                ));
            }
            if at > 0 {
                let leading = PlannedCommand {
                    command: CommandForm::Shell(dep_segments[..at].join(" && ")),
                    ..dep_run.clone()
                };
                classify_toolchain(&leading, &mut toolchain, &mut cleanup);
            }
        }

        // Source copies: every COPY that is not the dependency manifest
        let mut sources = Vec::new();
        for (line, srcs, dest) in copies.iter().filter(|(l, _, _)| *l != dep_copy_line) {
            if *line < dep_run.line {
                return Err(config_err(
                    *line,
                    "source copied before dependencies are installed".to_string(),
                ));
            }
            for src in srcs {
                let source = context.resolve(src)?;
                let dest = if srcs.len() > 1 || (dest.ends_with('/') && source.is_file()) {
                    let name = Path::new(src)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    join_image_path(dest, &name)
                } else {
                    dest.trim_end_matches('/').to_string()
                };
                sources.push(SourceStep {
                    line: *line,
                    source,
                    dest: if dest.is_empty() { "/".into() } else { dest },
                });
            }
        }

        let entrypoint = resolve_entrypoint(manifest)?;

        if let Some(pm) = toolchain.package_manager {
            for path in pm.metadata_paths() {
                if !cleanup.metadata_paths.iter().any(|p| p == path) {
                    cleanup.metadata_paths.push((*path).to_string());
                }
            }
        }

        Ok(Self {
            base_image: manifest.base_image().unwrap_or_default().to_string(),
            workdir: manifest
                .workdir()
                .map(|w| join_image_path("/", &w))
                .unwrap_or_else(|| image::DEFAULT_WORKDIR.to_string()),
            env,
            exposed_ports: manifest.exposed_ports(),
            labels,
            user,
            toolchain,
            dependencies: DependencyStep {
                manifest: context.resolve(&manifest_source)?,
                image_path,
                declared_install: Some(dep_run),
            },
            sources,
            post_commands,
            entrypoint,
            cleanup,
        })
    }

    /// Plan with the standard stage sequence, without a build manifest.
    pub fn standard(spec: StandardPlan) -> ArchlensResult<Self> {
        if spec.entrypoint.is_empty() {
            return Err(ArchlensError::Config("entrypoint must not be empty".into()));
        }
        let workdir = join_image_path("/", &spec.workdir);
        let manifest_name = spec
            .manifest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| filenames::DEPENDENCY_MANIFEST.to_string());
        let source_name = spec
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "src".to_string());

        let mut toolchain = ToolchainStep {
            package_manager: Some(spec.package_manager),
            packages: spec.toolchain_packages.clone(),
            commands: Vec::new(),
        };
        if !spec.toolchain_packages.is_empty() {
            let install = match spec.package_manager {
                PackageManager::Apt => format!(
                    "apt-get update && apt-get install -y --no-install-recommends {}",
                    spec.toolchain_packages.join(" ")
                ),
                PackageManager::Apk => format!("apk add --no-cache {}", spec.toolchain_packages.join(" ")),
                PackageManager::Yum => format!("yum install -y {}", spec.toolchain_packages.join(" ")),
                PackageManager::Dnf => format!("dnf install -y {}", spec.toolchain_packages.join(" ")),
            };
            toolchain.commands.push(PlannedCommand {
                line: 0,
                command: CommandForm::Shell(install),
                workdir: "/".into(),
                env: Vec::new(),
            });
        }

        Ok(Self {
            base_image: spec.base_image,
            workdir: workdir.clone(),
            env: Vec::new(),
            exposed_ports: Vec::new(),
            labels: Vec::new(),
            user: None,
            toolchain,
            dependencies: DependencyStep {
                manifest: spec.manifest,
                image_path: join_image_path(&workdir, &manifest_name),
                declared_install: None,
            },
            sources: vec![SourceStep {
                line: 0,
                source: spec.source,
                dest: join_image_path(&workdir, &source_name),
            }],
            post_commands: Vec::new(),
            entrypoint: spec.entrypoint,
            cleanup: CleanupStep {
                metadata_paths: spec
                    .package_manager
                    .metadata_paths()
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            },
        })
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> [&'static str; 5] {
        [
            stages::toolchain::STAGE,
            stages::dependencies::STAGE,
            stages::source::STAGE,
            stages::entrypoint::STAGE,
            stages::cleanup::STAGE,
        ]
    }
}

/// Join an image path onto a base directory, normalizing `.` and `..`.
pub fn join_image_path(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|p| !p.is_empty()).collect()
    };
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    let mut joined = format!("/{}", parts.join("/"));
    if path.ends_with('/') && joined != "/" {
        joined.push('/');
    }
    joined
}

fn is_toolchain_command(command: &CommandForm) -> bool {
    split_segments(&command.text())
        .iter()
        .any(|s| SYSTEM_INSTALL_RE.is_match(s))
}

/// Split a shell command into its `&&` / `;` separated segments.
fn split_segments(text: &str) -> Vec<String> {
    text.split("&&")
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split a pre-dependency RUN into install commands and metadata cleanup.
fn classify_toolchain(run: &PlannedCommand, toolchain: &mut ToolchainStep, cleanup: &mut CleanupStep) {
    let segments = split_segments(&run.command.text());
    let mut kept = Vec::new();

    for segment in segments {
        if let Some(caps) = SYSTEM_INSTALL_RE.captures(&segment) {
            let pm = PackageManager::from_command(&caps["pm"]);
            toolchain.package_manager.get_or_insert(pm);
            for pkg in caps["args"].split_whitespace() {
                if pkg.starts_with('-') || pkg == "\\" {
                    continue;
                }
                if !toolchain.packages.iter().any(|p| p == pkg) {
                    toolchain.packages.push(pkg.to_string());
                }
            }
            kept.push(segment);
        } else if let Some(paths) = metadata_removal(&segment) {
            for path in paths {
                if !cleanup.metadata_paths.contains(&path) {
                    cleanup.metadata_paths.push(path);
                }
            }
        } else if segment == "apt-get clean" || segment == "apt clean" || segment.starts_with("apk cache clean") {
            // Covered by the package manager's metadata paths
        } else {
            kept.push(segment);
        }
    }

    if kept.is_empty() {
        return;
    }

    let command = match &run.command {
        CommandForm::Exec(argv) if kept.len() == 1 && !SYSTEM_UPDATE_RE.is_match(&kept[0]) => {
            CommandForm::Exec(argv.clone())
        }
        _ => CommandForm::Shell(kept.join(" && ")),
    };
    toolchain.commands.push(PlannedCommand {
        command,
        ..run.clone()
    });
}

/// `rm -rf /var/lib/apt/lists/*` style segments, returning the directories.
fn metadata_removal(segment: &str) -> Option<Vec<String>> {
    let mut tokens = segment.split_whitespace();
    if tokens.next()? != "rm" {
        return None;
    }
    let paths: Vec<String> = tokens
        .filter(|t| !t.starts_with('-'))
        .map(|t| t.trim_end_matches("/*").trim_end_matches('/').to_string())
        .collect();
    let all_metadata = !paths.is_empty()
        && paths
            .iter()
            .all(|p| p.starts_with("/var/lib/apt") || p.starts_with("/var/cache") || p.starts_with("/tmp"));
    all_metadata.then_some(paths)
}

fn resolve_entrypoint(manifest: &BuildManifest) -> ArchlensResult<Vec<String>> {
    let (entrypoint, cmd) = manifest.entrypoint_and_cmd();
    let line_of = |keyword: &str| {
        manifest
            .lines()
            .iter()
            .rev()
            .find(|l| l.instruction.keyword() == keyword)
            .map(|l| l.line)
            .unwrap_or(0)
    };

    for (form, keyword) in [(entrypoint, "ENTRYPOINT"), (cmd, "CMD")] {
        if let Some(form) = form
            && !form.is_exec()
        {
            return Err(ArchlensError::manifest(
                manifest.origin(),
                line_of(keyword),
                format!("{} must use exec form, e.g. [\"python\", \"app.py\"]", keyword),
            ));
        }
    }

    let mut argv = entrypoint.map(|e| e.argv()).unwrap_or_default();
    if let Some(cmd) = cmd {
        argv.extend(cmd.argv());
    }
    if argv.is_empty() {
        return Err(ArchlensError::Config(format!(
            "{}: no CMD or ENTRYPOINT declared",
            manifest.origin()
        )));
    }
    Ok(argv)
}
