//! Shared constants
//!
//! These values must be identical for the build pipeline (which writes the
//! image) and the orchestrator (which runs inside it).

/// Process exit codes reported by the orchestrator and the CLI.
pub mod exit_codes {
    /// Job completed.
    pub const SUCCESS: i32 = 0;

    /// Job failed.
    pub const FAILURE: i32 = 1;

    /// Invalid configuration or manifest.
    pub const CONFIG: i32 = 2;

    /// Grace period expired and the job was aborted.
    pub const FORCED: i32 = 124;

    /// Stopped by SIGINT (128 + 2).
    pub const INTERRUPTED: i32 = 130;

    /// Stopped by SIGTERM (128 + 15).
    pub const TERMINATED: i32 = 143;
}

/// Environment variables read by the orchestrator.
pub mod envs {
    pub const REPO_PATH: &str = "ARCHLENS_REPO_PATH";
    pub const OUTPUT_DIR: &str = "ARCHLENS_OUTPUT_DIR";
    pub const SKIP_LLM: &str = "ARCHLENS_SKIP_LLM";
    pub const MAX_SOURCE_FILES: &str = "ARCHLENS_MAX_SOURCE_FILES";
    pub const SHUTDOWN_GRACE_SECS: &str = "ARCHLENS_SHUTDOWN_GRACE_SECS";
    pub const LOG_DIR: &str = "ARCHLENS_LOG_DIR";
    pub const LLM_BASE_URL: &str = "OLLAMA_BASE_URL";
    pub const LLM_MODEL: &str = "ARCHLENS_LLM_MODEL";
}

/// Well-known file names.
pub mod filenames {
    /// Image configuration written by the build pipeline.
    pub const IMAGE_CONFIG: &str = "config.json";

    /// Optional orchestrator configuration in the application root.
    pub const ORCHESTRATOR_CONFIG: &str = "archlens.yaml";

    /// Default dependency manifest name.
    pub const DEPENDENCY_MANIFEST: &str = "requirements.txt";

    /// Default build manifest name.
    pub const BUILD_MANIFEST: &str = "Dockerfile";

    /// Knowledge graph export.
    pub const KNOWLEDGE_GRAPH: &str = "knowledge_graph.json";

    /// Graph metrics export.
    pub const METRICS: &str = "metrics.json";
}

/// Image defaults
pub mod image {
    /// Working directory used when the build manifest declares none.
    pub const DEFAULT_WORKDIR: &str = "/app";

    /// Suffix of the staging directory a build assembles into.
    pub const STAGING_SUFFIX: &str = ".partial";
}
