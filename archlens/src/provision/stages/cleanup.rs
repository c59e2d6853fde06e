//! Stage 5: Cleanup.
//!
//! Removes package-manager metadata from the image and, when requested,
//! purges build-only packages from the image rootfs. A package the installer reported as needed at
//! runtime is never purged; it is retained and logged.

use crate::provision::executor::{ExecEnv, execute_checked};
use crate::provision::types::{CleanupInput, CleanupOutput};
use crate::runtime::options::ToolchainMode;
use archlens_shared::errors::{ArchlensError, ArchlensResult};

pub const STAGE: &str = "cleanup";

pub async fn run(input: CleanupInput<'_>) -> ArchlensResult<CleanupOutput> {
    let mut output = CleanupOutput::default();

    for path in &input.step.metadata_paths {
        let host = input.layout.resolve(path)?;
        if !host.exists() {
            continue;
        }
        remove_contents(&host).map_err(|e| e.in_stage(STAGE))?;
        tracing::debug!(path = %path, "Removed package metadata");
        output.removed_paths.push(path.clone());
    }

    let (retained, purgeable) = partition_packages(input.build_packages, input.runtime_requires);
    for package in &retained {
        tracing::info!(package = %package, "Retaining build package required at runtime");
    }
    output.retained = retained;

    if input.purge_build_tools && !purgeable.is_empty() {
        match (input.mode, input.package_manager) {
            (ToolchainMode::Execute, Some(pm)) => {
                let rootfs = input.layout.rootfs_dir();
                let argv = pm.purge_command(&purgeable, &rootfs);
                let env = ExecEnv {
                    cwd: Some(rootfs),
                    env: Vec::new(),
                };
                execute_checked(input.executor, &argv, &env)
                    .await
                    .map_err(|e| e.in_stage(STAGE))?;
                output.purged = purgeable;
            }
            (ToolchainMode::Execute, None) => {
                tracing::warn!(packages = ?purgeable, "No package manager detected, build packages kept");
            }
            (ToolchainMode::Verify, _) => {
                tracing::info!(packages = ?purgeable, "Build packages are host tools, nothing to purge");
            }
        }
    }

    tracing::info!(
        removed = output.removed_paths.len(),
        purged = output.purged.len(),
        retained = output.retained.len(),
        "Cleanup complete"
    );
    Ok(output)
}

/// Split build packages into (retained, purgeable).
///
/// Matching ignores case and version suffixes (`libpq5=15.4`).
pub fn partition_packages(
    build_packages: &[String],
    runtime_requires: &[String],
) -> (Vec<String>, Vec<String>) {
    let base = |p: &str| {
        p.split(['=', ':'])
            .next()
            .unwrap_or(p)
            .trim()
            .to_ascii_lowercase()
    };
    let required: Vec<String> = runtime_requires.iter().map(|p| base(p.as_str())).collect();

    build_packages
        .iter()
        .cloned()
        .partition(|p| required.contains(&base(p.as_str())))
}

/// Remove everything inside `dir`, keeping the directory itself.
fn remove_contents(dir: &std::path::Path) -> ArchlensResult<()> {
    if dir.is_file() {
        return std::fs::remove_file(dir).map_err(|e| {
            ArchlensError::Storage(format!("failed to remove {}: {}", dir.display(), e))
        });
    }
    let entries = std::fs::read_dir(dir).map_err(|e| {
        ArchlensError::Storage(format!("failed to read {}: {}", dir.display(), e))
    })?;
    for entry in entries {
        let path = entry?.path();
        let result = if path.is_dir() && !path.is_symlink() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| {
            ArchlensError::Storage(format!("failed to remove {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::plan::{CleanupStep, PackageManager};
    use crate::provision::testing::RecordingExecutor;
    use archlens_shared::layout::ImageLayout;
    use proptest::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_metadata_removed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = ImageLayout::new(tmp.path());
        let lists = layout.rootfs_dir().join("var/lib/apt/lists");
        std::fs::create_dir_all(lists.join("partial")).unwrap();
        std::fs::write(lists.join("deb.debian.org_dists"), "x").unwrap();

        let step = CleanupStep {
            metadata_paths: strings(&["/var/lib/apt/lists", "/var/cache/apt/archives"]),
        };
        let out = run(CleanupInput {
            step: &step,
            package_manager: Some(PackageManager::Apt),
            build_packages: &[],
            runtime_requires: &[],
            purge_build_tools: false,
            layout: &layout,
            executor: &RecordingExecutor::new(),
            mode: ToolchainMode::Verify,
        })
        .await
        .unwrap();

        assert_eq!(out.removed_paths, strings(&["/var/lib/apt/lists"]));
        assert!(lists.is_dir());
        assert_eq!(std::fs::read_dir(&lists).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_runtime_required_package_is_retained() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = ImageLayout::new(tmp.path());
        let executor = RecordingExecutor::new();
        let build = strings(&["gcc", "git", "libpq-dev"]);
        let required = strings(&["git"]);

        let out = run(CleanupInput {
            step: &CleanupStep::default(),
            package_manager: Some(PackageManager::Apt),
            build_packages: &build,
            runtime_requires: &required,
            purge_build_tools: true,
            layout: &layout,
            executor: &executor,
            mode: ToolchainMode::Execute,
        })
        .await
        .unwrap();

        assert_eq!(out.retained, strings(&["git"]));
        assert_eq!(out.purged, strings(&["gcc", "libpq-dev"]));
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        let root_arg = format!("RootDir={}", layout.rootfs_dir().display());
        assert_eq!(
            calls[0],
            vec!["apt-get", "-o", root_arg.as_str(), "purge", "-y", "--auto-remove", "gcc", "libpq-dev"]
        );
    }

    #[tokio::test]
    async fn test_no_purge_by_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = ImageLayout::new(tmp.path());
        let executor = RecordingExecutor::new();
        let build = strings(&["gcc"]);
        let out = run(CleanupInput {
            step: &CleanupStep::default(),
            package_manager: Some(PackageManager::Apt),
            build_packages: &build,
            runtime_requires: &[],
            purge_build_tools: false,
            layout: &layout,
            executor: &executor,
            mode: ToolchainMode::Execute,
        })
        .await
        .unwrap();
        assert!(out.purged.is_empty());
        assert!(executor.calls().is_empty());
    }

    proptest! {
        #[test]
        fn prop_required_packages_never_purged(
            build in proptest::collection::vec("[a-z][a-z0-9-]{0,8}", 0..8),
            required in proptest::collection::vec("[a-z][a-z0-9-]{0,8}", 0..8),
        ) {
            let (retained, purgeable) = partition_packages(&build, &required);
            for pkg in &purgeable {
                prop_assert!(!required.contains(pkg));
            }
            prop_assert_eq!(retained.len() + purgeable.len(), build.len());
        }
    }
}
