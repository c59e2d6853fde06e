//! Constants for the archlens runtime
//!
//! Centralized location for defaults and environment variable names.

// Re-export shared constants
pub use archlens_shared::constants::{envs, exit_codes, filenames, image};

/// Default option values.
pub mod defaults {
    /// Repository analyzed when none is configured (the application root).
    pub const REPO_PATH: &str = ".";

    /// Output directory, relative to the application root.
    pub const OUTPUT_DIR: &str = "output";

    /// Python files inspected per run.
    pub const MAX_SOURCE_FILES: usize = 10;

    /// Seconds between a termination signal and forced abort.
    pub const SHUTDOWN_GRACE_SECS: u64 = 10;

    pub const LLM_BASE_URL: &str = "http://localhost:11434";
    pub const LLM_MODEL: &str = "llama3.1:8b";
    pub const LLM_TIMEOUT_SECS: u64 = 120;

    /// In-image dependency install directory.
    pub const DEPENDENCY_DIR: &str = "/opt/archlens/deps";

    pub const COMMAND_TIMEOUT_SECS: u64 = 1800;
}

/// Repository scanning
pub mod scan {
    /// Paths skipped while walking a repository.
    ///
    /// Plain entries match a path component exactly; `*.ext` entries match
    /// file name suffixes.
    pub const IGNORE_PATTERNS: &[&str] = &[
        "__pycache__",
        ".git",
        "node_modules",
        "venv",
        ".env",
        ".venv",
        "dist",
        "build",
        "target",
        "*.log",
        "*.tmp",
        ".DS_Store",
    ];
}

/// Log file naming
pub mod logging {
    pub const FILE_PREFIX: &str = "archlens-orchestrator.log";
    pub const DEFAULT_FILTER: &str = "info";
}
