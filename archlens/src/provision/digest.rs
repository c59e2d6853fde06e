//! Source tree copy and content digest.
//!
//! The digest covers relative paths, entry kinds and file contents, walked
//! in sorted order, so identical trees hash identically on any host.

use archlens_shared::errors::{ArchlensError, ArchlensResult};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Summary of a copy operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

/// SHA-256 over a file or directory tree, hex encoded.
pub fn tree_digest(root: &Path) -> ArchlensResult<String> {
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ArchlensError::Storage(format!("failed to walk {}: {}", root.display(), e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ArchlensError::Internal(e.to_string()))?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        let file_type = entry.file_type();

        if file_type.is_dir() {
            hasher.update(b"D\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            hasher.update(b"L\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
            hasher.update(target.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        } else {
            hasher.update(b"F\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
            hash_file(&mut hasher, entry.path())?;
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

fn hash_file(hasher: &mut Sha256, path: &Path) -> ArchlensResult<()> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        ArchlensError::Storage(format!("failed to open {}: {}", path.display(), e))
    })?;
    let mut buf = [0u8; 64 * 1024];
    let mut len: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        len += n as u64;
        hasher.update(&buf[..n]);
    }
    hasher.update(len.to_le_bytes());
    Ok(())
}

/// Copy `src` (file or directory) to `dst`, preserving symlinks.
///
/// Existing files at the destination are overwritten; parent directories
/// are created as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> ArchlensResult<CopyStats> {
    let mut stats = CopyStats::default();

    if !src.exists() {
        return Err(ArchlensError::Storage(format!(
            "source does not exist: {}",
            src.display()
        )));
    }

    if src.is_file() {
        if let Some(parent) = dst.parent() {
            create_dir(parent)?;
        }
        stats.bytes += copy_file(src, dst)?;
        stats.files += 1;
        return Ok(stats);
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            ArchlensError::Storage(format!("failed to walk {}: {}", src.display(), e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ArchlensError::Internal(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            create_dir(&target)?;
            stats.dirs += 1;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                std::fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(&link, &target).map_err(|e| {
                ArchlensError::Storage(format!(
                    "failed to create symlink {}: {}",
                    target.display(),
                    e
                ))
            })?;
            stats.symlinks += 1;
        } else {
            stats.bytes += copy_file(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

fn create_dir(path: &Path) -> ArchlensResult<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        ArchlensError::Storage(format!(
            "failed to create directory {}: {}",
            path.display(),
            e
        ))
    })
}

fn copy_file(src: &Path, dst: &Path) -> ArchlensResult<u64> {
    std::fs::copy(src, dst).map_err(|e| {
        ArchlensError::Storage(format!(
            "failed to copy {} to {}: {}",
            src.display(),
            dst.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) {
        std::fs::create_dir_all(root.join("pkg/sub")).unwrap();
        std::fs::write(root.join("main.py"), "print('hi')\n").unwrap();
        std::fs::write(root.join("pkg/__init__.py"), "").unwrap();
        std::fs::write(root.join("pkg/sub/mod.py"), "x = 1\n").unwrap();
        std::os::unix::fs::symlink("main.py", root.join("link.py")).unwrap();
    }

    #[test]
    fn test_copy_preserves_digest() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("out/app/src");
        sample_tree(&src);

        let stats = copy_tree(&src, &dst).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.symlinks, 1);
        assert_eq!(tree_digest(&src).unwrap(), tree_digest(&dst).unwrap());
        assert!(std::fs::symlink_metadata(dst.join("link.py")).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_digest_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        sample_tree(tmp.path());
        let before = tree_digest(tmp.path()).unwrap();

        std::fs::write(tmp.path().join("pkg/sub/mod.py"), "x = 2\n").unwrap();
        assert_ne!(before, tree_digest(tmp.path()).unwrap());
    }

    #[test]
    fn test_digest_changes_with_rename() {
        let tmp = TempDir::new().unwrap();
        sample_tree(tmp.path());
        let before = tree_digest(tmp.path()).unwrap();

        std::fs::rename(tmp.path().join("main.py"), tmp.path().join("app.py")).unwrap();
        assert_ne!(before, tree_digest(tmp.path()).unwrap());
    }

    #[test]
    fn test_copy_single_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("requirements.txt");
        std::fs::write(&src, "requests\n").unwrap();
        let dst = tmp.path().join("rootfs/app/requirements.txt");

        let stats = copy_tree(&src, &dst).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "requests\n");
    }

    #[test]
    fn test_copy_missing_source() {
        let tmp = TempDir::new().unwrap();
        let err = copy_tree(&tmp.path().join("nope"), &tmp.path().join("dst")).unwrap_err();
        assert!(err.to_string().contains("source does not exist"));
    }
}
