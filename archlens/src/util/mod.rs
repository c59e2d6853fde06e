use std::path::{Path, PathBuf};

use archlens_shared::errors::{ArchlensError, ArchlensResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::runtime::constants::logging;

/// Env filter from `RUST_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new(logging::DEFAULT_FILTER))
}

/// Initialize logging to stderr, plus a daily-rotated file when `log_dir` is set.
///
/// Keep the returned guard alive until exit so buffered file logs are flushed.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(logging::DEFAULT_FILTER))
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {}", dir.display(), e);
        return init_logging(None);
    }

    let file_appender = tracing_appender::rolling::daily(dir, logging::FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    register_to_tracing(non_blocking, env_filter(logging::DEFAULT_FILTER));
    Some(guard)
}

/// Register a subscriber writing to both stderr and `non_blocking`.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}

/// Find a binary on `PATH`.
///
/// # Returns
/// * `Ok(PathBuf)` - First match
/// * `Err(...)` - Not found; the error lists every searched location
pub fn find_in_path(binary_name: &str) -> ArchlensResult<PathBuf> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    find_in_dirs(binary_name, std::env::split_paths(&path_var))
}

/// Find a binary in the given directories.
pub fn find_in_dirs<I>(binary_name: &str, dirs: I) -> ArchlensResult<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let candidates: Vec<PathBuf> = dirs.into_iter().map(|d| d.join(binary_name)).collect();

    for candidate in &candidates {
        if is_executable(candidate) {
            tracing::debug!(binary = %candidate.display(), "Found binary");
            return Ok(candidate.clone());
        }
    }

    let locations = candidates
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ArchlensError::Storage(format!(
        "Binary '{}' not found.\nSearched locations:\n{}",
        binary_name, locations
    )))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_find_in_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = dir.path().join("gcc");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let found = find_in_dirs("gcc", vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, bin);
    }

    #[test]
    fn test_non_executable_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("make"), "").unwrap();
        std::fs::set_permissions(dir.path().join("make"), std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = find_in_dirs("make", vec![dir.path().to_path_buf()]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Binary 'make' not found"));
        assert!(msg.contains(&dir.path().join("make").display().to_string()));
    }

    #[test]
    fn test_find_sh_on_path() {
        assert!(find_in_path("sh").is_ok());
    }
}
