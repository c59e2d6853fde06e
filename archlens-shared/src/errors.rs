//! Error type shared across the archlens crates.
//!
//! Errors are categorized by who can fix them:
//! - `Config` / `Manifest`: the user (bad input, exit code 2)
//! - `Stage` / `Process` / `Storage`: the environment (exit code 1)
//! - `Cancelled`: a termination signal arrived before the work finished

use crate::constants::exit_codes;
use thiserror::Error;

pub type ArchlensResult<T> = Result<T, ArchlensError>;

#[derive(Debug, Error)]
pub enum ArchlensError {
    /// Invalid configuration or build plan.
    #[error("config: {0}")]
    Config(String),

    /// A manifest line could not be parsed.
    #[error("{origin}:{line}: {message}")]
    Manifest {
        origin: String,
        line: usize,
        message: String,
    },

    /// A build stage failed. The build is aborted.
    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: &'static str, message: String },

    /// Filesystem operation failed.
    #[error("storage: {0}")]
    Storage(String),

    /// Spawning or waiting on a child process failed.
    #[error("process: {0}")]
    Process(String),

    /// An artifact (YAML, Dockerfile, source file) could not be parsed.
    #[error("parse: {0}")]
    Parse(String),

    /// Work stopped because shutdown was requested.
    #[error("cancelled")]
    Cancelled,

    #[error("internal: {0}")]
    Internal(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ArchlensError {
    /// Build a manifest error for the given origin (usually a file name).
    pub fn manifest(origin: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Manifest {
            origin: origin.into(),
            line,
            message: message.into(),
        }
    }

    /// Build a stage error.
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }

    /// Wrap this error as a failure of `stage`, keeping stage errors as-is.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            e @ Self::Stage { .. } | e @ Self::Cancelled => e,
            other => Self::stage(stage, other.to_string()),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Manifest { .. } => exit_codes::CONFIG,
            Self::Cancelled => exit_codes::INTERRUPTED,
            _ => exit_codes::FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_display() {
        let err = ArchlensError::manifest("requirements.txt", 3, "invalid requirement");
        assert_eq!(err.to_string(), "requirements.txt:3: invalid requirement");
    }

    #[test]
    fn test_in_stage_wraps_once() {
        let err = ArchlensError::Storage("disk full".into()).in_stage("source");
        assert_eq!(err.to_string(), "stage 'source' failed: storage: disk full");

        // Already a stage error, keep the original stage name
        let err = err.in_stage("cleanup");
        assert!(err.to_string().starts_with("stage 'source'"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ArchlensError::Config("x".into()).exit_code(), 2);
        assert_eq!(ArchlensError::manifest("f", 1, "m").exit_code(), 2);
        assert_eq!(ArchlensError::Cancelled.exit_code(), 130);
        assert_eq!(ArchlensError::Process("x".into()).exit_code(), 1);
    }
}
