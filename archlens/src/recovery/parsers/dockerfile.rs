//! Dockerfile → container component.
//!
//! Reuses the build-manifest parser, so anything `archlens build` accepts is
//! understood here too.

use super::{detect_technology, parse_port};
use crate::provision::manifest::BuildManifest;
use crate::recovery::model::{Component, ComponentType};
use archlens_shared::errors::ArchlensResult;
use std::path::Path;

/// Parse the Dockerfile at `path`.
///
/// The component is named after the directory holding the file, or
/// `fallback_name` when that directory is the repository root.
pub fn parse_file(path: &Path, relative: &Path, fallback_name: &str) -> ArchlensResult<Component> {
    let manifest = BuildManifest::from_path(path)?;
    let name = relative
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| fallback_name.to_string());
    Ok(component(&manifest, name, relative))
}

pub fn component(manifest: &BuildManifest, name: String, relative: &Path) -> Component {
    let base_image = manifest.base_image().unwrap_or_default();
    let mut component = Component::new(name, ComponentType::Container, detect_technology(base_image))
        .with_metadata("base_image", base_image)
        .with_metadata("source", relative.display().to_string());

    if let Some(workdir) = manifest.workdir() {
        component = component.with_metadata("workdir", workdir);
    }

    for port in manifest.exposed_ports() {
        match parse_port(&port) {
            Some(p) if !component.exposed_ports.contains(&p) => component.exposed_ports.push(p),
            Some(_) => {}
            None => tracing::debug!(port = %port, "Ignoring unparseable EXPOSE value"),
        }
    }
    component.environment.extend(manifest.env());
    component
}
