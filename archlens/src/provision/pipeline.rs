//! Build pipeline: runs a [`BuildPlan`] into an image directory.
//!
//! The image is assembled in `{output}.partial`. `config.json` is written
//! last and the staging directory is renamed into place only after every
//! stage succeeded. `CleanupGuard` removes the staging directory on failure,
//! so a failed build never produces an image.

use crate::provision::executor::{CommandExecutor, ShellExecutor};
use crate::provision::image::ImageConfig;
use crate::provision::installer::{CommandInstaller, DependencyInstaller};
use crate::provision::plan::BuildPlan;
use crate::provision::stages::{cleanup, dependencies, entrypoint, source, toolchain};
use crate::provision::types::{
    CleanupGuard, CleanupInput, DependenciesInput, EntrypointInput, SourceInput, ToolchainInput,
};
use crate::runtime::options::ProvisionOptions;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use archlens_shared::layout::ImageLayout;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A finished image.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub path: PathBuf,
    pub config: ImageConfig,
}

/// Executes a build plan.
///
/// # Example
///
/// ```ignore
/// let image = BuildPipeline::new(plan, "out/orchestrator", ProvisionOptions::default())?
///     .run()
///     .await?;
/// ```
pub struct BuildPipeline {
    plan: BuildPlan,
    output: PathBuf,
    options: ProvisionOptions,
    executor: Arc<dyn CommandExecutor>,
    installer: Arc<dyn DependencyInstaller>,
    cancel: CancellationToken,
}

impl BuildPipeline {
    /// Pipeline with the host executor and the configured installer command.
    pub fn new(
        plan: BuildPlan,
        output: impl Into<PathBuf>,
        options: ProvisionOptions,
    ) -> ArchlensResult<Self> {
        let mut executor = ShellExecutor::new();
        if let Some(timeout) = options.command_timeout() {
            executor = executor.with_timeout(timeout);
        }
        let executor: Arc<dyn CommandExecutor> = Arc::new(executor);
        let installer = Arc::new(CommandInstaller::new(
            &options.installer_command,
            executor.clone(),
        )?);
        Ok(Self::with_backends(plan, output, options, executor, installer))
    }

    pub fn with_backends(
        plan: BuildPlan,
        output: impl Into<PathBuf>,
        options: ProvisionOptions,
        executor: Arc<dyn CommandExecutor>,
        installer: Arc<dyn DependencyInstaller>,
    ) -> Self {
        Self {
            plan,
            output: output.into(),
            options,
            executor,
            installer,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort between stages when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    /// Run all stages. Fails fast; no image exists at the output path on error.
    pub async fn run(self) -> ArchlensResult<BuiltImage> {
        let start = Instant::now();
        let target = ImageLayout::new(&self.output);

        if target.root().exists() && !self.options.overwrite {
            return Err(ArchlensError::Config(format!(
                "output already exists: {} (use overwrite to replace it)",
                self.output.display()
            )));
        }

        let staging = ImageLayout::staging_for(&self.output);
        staging.cleanup()?;

        let mut guard = CleanupGuard::new();
        guard.set_layout(staging.clone());
        staging.prepare()?;

        tracing::info!(
            base_image = %self.plan.base_image,
            output = %self.output.display(),
            "Starting build"
        );

        // Stage 1: Toolchain
        self.checkpoint(toolchain::STAGE)?;
        let toolchain_out = toolchain::run(ToolchainInput {
            step: &self.plan.toolchain,
            layout: &staging,
            executor: self.executor.as_ref(),
            mode: self.options.toolchain_mode,
        })
        .await?;

        // Stage 2: Dependencies
        self.checkpoint(dependencies::STAGE)?;
        let deps_out = dependencies::run(DependenciesInput {
            step: &self.plan.dependencies,
            layout: &staging,
            installer: self.installer.as_ref(),
            dependency_dir: &self.options.dependency_dir,
        })
        .await?;

        // Stage 3: Source
        self.checkpoint(source::STAGE)?;
        let source_out = source::run(SourceInput {
            sources: &self.plan.sources,
            post_commands: &self.plan.post_commands,
            layout: &staging,
            executor: self.executor.as_ref(),
            mode: self.options.toolchain_mode,
        })
        .await?;

        // Stage 4: Entrypoint
        self.checkpoint(entrypoint::STAGE)?;
        let entry_out = entrypoint::run(EntrypointInput {
            argv: &self.plan.entrypoint,
            workdir: &self.plan.workdir,
            layout: &staging,
        })?;

        // Stage 5: Cleanup
        self.checkpoint(cleanup::STAGE)?;
        let cleanup_out = cleanup::run(CleanupInput {
            step: &self.plan.cleanup,
            package_manager: self.plan.toolchain.package_manager,
            build_packages: &self.plan.toolchain.packages,
            runtime_requires: &deps_out.report.runtime_requires,
            purge_build_tools: self.options.purge_build_tools,
            layout: &staging,
            executor: self.executor.as_ref(),
            mode: self.options.toolchain_mode,
        })
        .await?;

        let mut config = ImageConfig {
            base_image: self.plan.base_image.clone(),
            entrypoint: entry_out.argv,
            working_dir: entry_out.working_dir,
            env: Vec::new(),
            exposed_ports: self.plan.exposed_ports.clone(),
            labels: self.plan.labels.clone(),
            user: self.plan.user.clone(),
            requirements: deps_out.requirements,
            dependency_dir: self.options.dependency_dir.clone(),
            source_digest: source_out.digest,
            build_packages: self
                .plan
                .toolchain
                .packages
                .iter()
                .filter(|p| !cleanup_out.purged.contains(p))
                .cloned()
                .collect(),
            retained_packages: cleanup_out.retained,
            created: Utc::now(),
        };
        config.merge_env(self.plan.env.clone());
        config.merge_env(vec![(
            "PYTHONPATH".to_string(),
            join_env_path(config.env_var("PYTHONPATH"), &self.options.dependency_dir),
        )]);

        // Config last: its presence marks a complete image
        config.save(&staging.config_path())?;
        self.checkpoint("finalize")?;
        publish(&staging, &target)?;
        guard.disarm();

        tracing::info!(
            output = %self.output.display(),
            requirements = config.requirements.len(),
            verified_tools = toolchain_out.verified.len(),
            digest = %config.source_digest,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Build complete"
        );

        Ok(BuiltImage {
            path: self.output,
            config,
        })
    }

    fn checkpoint(&self, stage: &'static str) -> ArchlensResult<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!(stage, "Build cancelled");
            return Err(ArchlensError::Cancelled);
        }
        tracing::debug!(stage, "Entering stage");
        Ok(())
    }
}

fn join_env_path(existing: Option<&str>, dir: &str) -> String {
    match existing {
        Some(value) if !value.is_empty() && !value.split(':').any(|p| p == dir) => {
            format!("{}:{}", dir, value)
        }
        Some(value) if !value.is_empty() => value.to_string(),
        _ => dir.to_string(),
    }
}

/// Move the staging directory into place, replacing any previous image.
fn publish(staging: &ImageLayout, target: &ImageLayout) -> ArchlensResult<()> {
    if let Some(parent) = target.root().parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    target.cleanup()?;
    rename(staging.root(), target.root())
}

fn rename(from: &Path, to: &Path) -> ArchlensResult<()> {
    std::fs::rename(from, to).map_err(|e| {
        ArchlensError::Storage(format!(
            "failed to move {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::manifest::BuildManifest;
    use crate::provision::plan::BuildContext;
    use crate::provision::testing::{FakeInstaller, RecordingExecutor};
    use crate::runtime::options::ToolchainMode;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
FROM python:3.11-slim
RUN apt-get update && apt-get install -y gcc git && rm -rf /var/lib/apt/lists/*
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY src/ ./src/
ENV APP_ENV=production
EXPOSE 8080
CMD ["python", "src/orchestrator.py"]
"#;

    fn context(requirements: &str) -> (TempDir, BuildPlan) {
        let tmp = TempDir::new().unwrap();
        let ctx = tmp.path().join("ctx");
        std::fs::create_dir_all(ctx.join("src")).unwrap();
        std::fs::write(ctx.join("requirements.txt"), requirements).unwrap();
        std::fs::write(ctx.join("src/orchestrator.py"), "print('ok')\n").unwrap();
        let manifest = BuildManifest::parse(MANIFEST).unwrap();
        let plan = BuildPlan::from_manifest(&manifest, &BuildContext::new(&ctx)).unwrap();
        (tmp, plan)
    }

    fn options() -> ProvisionOptions {
        ProvisionOptions {
            toolchain_mode: ToolchainMode::Execute,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_build_publishes_image() {
        let (tmp, plan) = context("requests==2.31.0\n");
        let output = tmp.path().join("out/orchestrator");
        let executor = Arc::new(RecordingExecutor::new());

        let image = BuildPipeline::with_backends(
            plan,
            &output,
            options(),
            executor.clone(),
            Arc::new(FakeInstaller::new()),
        )
        .run()
        .await
        .unwrap();

        assert!(output.join("config.json").is_file());
        assert!(!tmp.path().join("out/orchestrator.partial").exists());
        assert_eq!(image.config.entrypoint, vec!["python", "src/orchestrator.py"]);
        assert_eq!(image.config.working_dir, "/app");
        assert_eq!(image.config.env_var("APP_ENV"), Some("production"));
        assert_eq!(image.config.env_var("PYTHONPATH"), Some("/opt/archlens/deps"));
        assert_eq!(image.config.tcp_ports(), vec![8080]);
        assert_eq!(image.config.requirements[0].name, "requests");
        assert!(output.join("rootfs/app/src/orchestrator.py").is_file());

        let loaded = ImageConfig::load(&output.join("config.json")).unwrap();
        assert_eq!(loaded.source_digest, image.config.source_digest);

        // Toolchain ran before anything else, against the image rootfs
        let calls = executor.calls();
        let first = calls[0].join(" ");
        assert!(first.contains("install -y gcc git"), "{first}");
        assert!(first.contains("RootDir="), "{first}");
        assert!(!first.contains("RootDir=/ "), "{first}");
    }

    #[tokio::test]
    async fn test_runtime_requirement_survives_purge() {
        let (tmp, plan) = context("requests==2.31.0\n");
        let output = tmp.path().join("out/orchestrator");
        let executor = Arc::new(RecordingExecutor::new());
        let purge = ProvisionOptions {
            purge_build_tools: true,
            ..options()
        };

        let image = BuildPipeline::with_backends(
            plan,
            &output,
            purge,
            executor.clone(),
            Arc::new(FakeInstaller::new().runtime_requires("git")),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(image.config.retained_packages, vec!["git"]);
        assert_eq!(image.config.build_packages, vec!["git"]);
        let calls = executor.calls();
        let purge_argv = calls.last().unwrap();
        assert!(purge_argv.contains(&"purge".to_string()), "{purge_argv:?}");
        assert!(purge_argv.contains(&"gcc".to_string()));
        assert!(!purge_argv.contains(&"git".to_string()));
    }

    #[tokio::test]
    async fn test_unresolvable_requirement_leaves_no_image() {
        let (tmp, plan) = context("requests==2.31.0\nghost-pkg==1.0\n");
        let output = tmp.path().join("out/orchestrator");

        let err = BuildPipeline::with_backends(
            plan,
            &output,
            options(),
            Arc::new(RecordingExecutor::new()),
            Arc::new(FakeInstaller::new().unresolvable("ghost-pkg")),
        )
        .run()
        .await
        .unwrap_err();

        assert!(err.to_string().contains("stage 'dependencies' failed"));
        assert!(!output.exists());
        assert!(!tmp.path().join("out/orchestrator.partial").exists());
    }

    #[tokio::test]
    async fn test_toolchain_failure_stops_before_dependencies() {
        let (tmp, plan) = context("requests==2.31.0\n");
        let output = tmp.path().join("out/orchestrator");
        let executor = Arc::new(RecordingExecutor::new().fail_on("apt-get"));

        let err = BuildPipeline::with_backends(
            plan,
            &output,
            options(),
            executor.clone(),
            Arc::new(FakeInstaller::new().unresolvable("requests")),
        )
        .run()
        .await
        .unwrap_err();

        // Installer would also fail; the toolchain error must come first
        assert!(err.to_string().contains("stage 'toolchain' failed"), "{err}");
        assert_eq!(executor.calls().len(), 1);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_existing_output_requires_overwrite() {
        let (tmp, plan) = context("requests==2.31.0\n");
        let output = tmp.path().join("out/orchestrator");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("marker"), "old").unwrap();

        let err = BuildPipeline::with_backends(
            plan.clone(),
            &output,
            options(),
            Arc::new(RecordingExecutor::new()),
            Arc::new(FakeInstaller::new()),
        )
        .run()
        .await
        .unwrap_err();
        assert!(matches!(err, ArchlensError::Config(_)));
        assert!(output.join("marker").exists());

        let overwrite = ProvisionOptions {
            overwrite: true,
            ..options()
        };
        BuildPipeline::with_backends(
            plan,
            &output,
            overwrite,
            Arc::new(RecordingExecutor::new()),
            Arc::new(FakeInstaller::new()),
        )
        .run()
        .await
        .unwrap();
        assert!(!output.join("marker").exists());
        assert!(output.join("config.json").is_file());
    }

    #[tokio::test]
    async fn test_cancelled_build_leaves_no_image() {
        let (tmp, plan) = context("requests==2.31.0\n");
        let output = tmp.path().join("out/orchestrator");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = BuildPipeline::with_backends(
            plan,
            &output,
            options(),
            Arc::new(RecordingExecutor::new()),
            Arc::new(FakeInstaller::new()),
        )
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap_err();
        assert!(matches!(err, ArchlensError::Cancelled));
        assert!(!tmp.path().join("out/orchestrator.partial").exists());
    }

    #[test]
    fn test_join_env_path() {
        assert_eq!(join_env_path(None, "/deps"), "/deps");
        assert_eq!(join_env_path(Some("/lib"), "/deps"), "/deps:/lib");
        assert_eq!(join_env_path(Some("/deps:/lib"), "/deps"), "/deps:/lib");
    }
}
