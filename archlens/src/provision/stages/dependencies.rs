//! Stage 2: Dependencies.
//!
//! Copies the dependency manifest into the image, validates it and installs
//! every requirement. Any requirement the installer does not resolve fails
//! the build.

use crate::provision::digest::copy_tree;
use crate::provision::image::InstalledRequirement;
use crate::provision::installer::InstallRequest;
use crate::provision::requirements::DependencyManifest;
use crate::provision::types::{DependenciesInput, DependenciesOutput};
use archlens_shared::errors::{ArchlensError, ArchlensResult};

pub const STAGE: &str = "dependencies";

pub async fn run(input: DependenciesInput<'_>) -> ArchlensResult<DependenciesOutput> {
    let manifest = DependencyManifest::from_path(&input.step.manifest)?;

    if manifest.is_empty() {
        tracing::warn!(manifest = %input.step.manifest.display(), "Dependency manifest declares no requirements");
    }
    for req in manifest.unpinned() {
        tracing::warn!(requirement = %req, line = req.line, "Requirement is not pinned to an exact version");
    }

    let manifest_path = input.layout.resolve(&input.step.image_path)?;
    copy_tree(&input.step.manifest, &manifest_path).map_err(|e| e.in_stage(STAGE))?;

    let target_dir = input.layout.resolve(input.dependency_dir)?;
    std::fs::create_dir_all(&target_dir).map_err(|e| {
        ArchlensError::stage(
            STAGE,
            format!("failed to create {}: {}", target_dir.display(), e),
        )
    })?;

    tracing::info!(
        manifest = %input.step.manifest.display(),
        requirements = manifest.len(),
        target = %input.dependency_dir,
        "Installing dependency manifest"
    );

    let report = input
        .installer
        .install(&InstallRequest {
            manifest: &manifest,
            manifest_path,
            target_dir,
            rootfs: input.layout.rootfs_dir(),
        })
        .await
        .map_err(|e| e.in_stage(STAGE))?;

    let mut requirements = Vec::with_capacity(manifest.len());
    let mut unresolved = Vec::new();
    for req in manifest.requirements() {
        match report.installed.get(&req.normalized_name()) {
            Some(version) => {
                requirements.push(InstalledRequirement::from_requirement(req, version.clone()))
            }
            None => unresolved.push(format!("{} (line {})", req, req.line)),
        }
    }
    if !unresolved.is_empty() {
        return Err(ArchlensError::stage(
            STAGE,
            format!("unresolved requirements: {}", unresolved.join(", ")),
        ));
    }

    tracing::info!(installed = requirements.len(), "Dependencies installed");

    Ok(DependenciesOutput {
        manifest,
        report,
        requirements,
    })
}
