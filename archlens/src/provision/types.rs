//! Type definitions for the build pipeline.

use crate::provision::digest::CopyStats;
use crate::provision::executor::CommandExecutor;
use crate::provision::installer::{DependencyInstaller, InstallReport};
use crate::provision::image::InstalledRequirement;
use crate::provision::plan::{
    CleanupStep, DependencyStep, PackageManager, PlannedCommand, SourceStep, ToolchainStep,
};
use crate::provision::requirements::DependencyManifest;
use crate::runtime::options::ToolchainMode;
use archlens_shared::layout::ImageLayout;

/// RAII guard for cleanup on build failure.
///
/// Removes the staging directory if dropped without being disarmed, so a
/// failed build never leaves a partial image behind.
pub struct CleanupGuard {
    layout: Option<ImageLayout>,
    armed: bool,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self {
            layout: None,
            armed: true,
        }
    }

    /// Register the staging layout for cleanup on failure.
    pub fn set_layout(&mut self, layout: ImageLayout) {
        self.layout = Some(layout);
    }

    /// Disarm the guard (call on success).
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Default for CleanupGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!("Build failed, removing staging directory");

        if let Some(ref layout) = self.layout
            && let Err(e) = layout.cleanup()
        {
            tracing::warn!("Failed to remove staging directory: {}", e);
        }
    }
}

pub struct ToolchainInput<'a> {
    pub step: &'a ToolchainStep,
    pub layout: &'a ImageLayout,
    pub executor: &'a dyn CommandExecutor,
    pub mode: ToolchainMode,
}

#[derive(Debug, Default)]
pub struct ToolchainOutput {
    /// Commands executed (Execute mode).
    pub executed: usize,
    /// Tools found on PATH (Verify mode).
    pub verified: Vec<String>,
}

pub struct DependenciesInput<'a> {
    pub step: &'a DependencyStep,
    pub layout: &'a ImageLayout,
    pub installer: &'a dyn DependencyInstaller,
    /// In-image directory dependencies are installed into.
    pub dependency_dir: &'a str,
}

#[derive(Debug)]
pub struct DependenciesOutput {
    pub manifest: DependencyManifest,
    pub report: InstallReport,
    pub requirements: Vec<InstalledRequirement>,
}

pub struct SourceInput<'a> {
    pub sources: &'a [SourceStep],
    pub post_commands: &'a [PlannedCommand],
    pub layout: &'a ImageLayout,
    pub executor: &'a dyn CommandExecutor,
    pub mode: ToolchainMode,
}

#[derive(Debug, Default)]
pub struct SourceOutput {
    pub digest: String,
    pub stats: CopyStats,
}

pub struct EntrypointInput<'a> {
    pub argv: &'a [String],
    pub workdir: &'a str,
    pub layout: &'a ImageLayout,
}

#[derive(Debug)]
pub struct EntrypointOutput {
    pub argv: Vec<String>,
    pub working_dir: String,
}

pub struct CleanupInput<'a> {
    pub step: &'a CleanupStep,
    pub package_manager: Option<PackageManager>,
    pub build_packages: &'a [String],
    /// Packages the installer reported as needed at runtime.
    pub runtime_requires: &'a [String],
    pub purge_build_tools: bool,
    pub layout: &'a ImageLayout,
    pub executor: &'a dyn CommandExecutor,
    pub mode: ToolchainMode,
}

#[derive(Debug, Default)]
pub struct CleanupOutput {
    pub removed_paths: Vec<String>,
    pub purged: Vec<String>,
    pub retained: Vec<String>,
}
