//! On-disk layout of a built image.
//!
//! ```text
//! {image}/
//! ├── config.json          # ImageConfig (written last)
//! └── rootfs/
//!     └── {workdir}/       # application root, e.g. rootfs/app
//!         └── src/         # copied source tree
//! ```
//!
//! A build assembles into `{image}.partial` and renames it into place only
//! after every stage succeeded.

use crate::constants::{filenames, image};
use crate::errors::{ArchlensError, ArchlensResult};
use std::path::{Component, Path, PathBuf};

/// Image directory names.
pub mod dirs {
    /// Application filesystem root inside the image directory.
    pub const ROOTFS: &str = "rootfs";
}

#[derive(Clone, Debug)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout of the staging directory next to `target`.
    pub fn staging_for(target: &Path) -> Self {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "image".into());
        name.push(image::STAGING_SUFFIX);
        Self::new(target.with_file_name(name))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem root: {image}/rootfs
    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join(dirs::ROOTFS)
    }

    /// Image configuration: {image}/config.json
    pub fn config_path(&self) -> PathBuf {
        self.root.join(filenames::IMAGE_CONFIG)
    }

    /// Map an absolute in-image path (e.g. `/app/src`) to its host location.
    ///
    /// Rejects `..` components so a manifest cannot write outside rootfs.
    pub fn resolve(&self, image_path: &str) -> ArchlensResult<PathBuf> {
        let mut resolved = self.rootfs_dir();
        for component in Path::new(image_path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ArchlensError::Config(format!(
                        "image path escapes rootfs: {}",
                        image_path
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// Create the image directory structure.
    pub fn prepare(&self) -> ArchlensResult<()> {
        std::fs::create_dir_all(self.rootfs_dir())
            .map_err(|e| ArchlensError::Storage(format!("failed to create rootfs: {e}")))
    }

    /// Whether this directory holds a finished image.
    pub fn is_complete(&self) -> bool {
        self.config_path().is_file()
    }

    /// Remove the whole image directory.
    pub fn cleanup(&self) -> ArchlensResult<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|e| {
                ArchlensError::Storage(format!(
                    "failed to remove {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}
