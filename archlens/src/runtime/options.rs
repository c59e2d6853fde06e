//! Configuration for archlens.

use crate::runtime::constants::{defaults, envs as const_envs};
use archlens_shared::constants::filenames;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Provisioning Options
// ============================================================================

/// How toolchain commands are handled by the build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolchainMode {
    /// Check that the declared build tools are available on PATH.
    #[default]
    Verify,
    /// Run the declared commands through the executor.
    Execute,
}

/// Build pipeline options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionOptions {
    #[serde(default)]
    pub toolchain_mode: ToolchainMode,

    /// Installer argv template; see `provision::installer`.
    #[serde(default = "default_installer_command")]
    pub installer_command: String,

    /// In-image directory the dependencies are installed into.
    #[serde(default = "default_dependency_dir")]
    pub dependency_dir: String,

    /// Remove build-only system packages in the cleanup stage.
    ///
    /// Packages a dependency needs at runtime are always retained.
    #[serde(default)]
    pub purge_build_tools: bool,

    /// Replace an existing image at the output path.
    #[serde(default)]
    pub overwrite: bool,

    /// Per-command timeout in seconds (0 disables).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_installer_command() -> String {
    crate::provision::installer::DEFAULT_INSTALL_COMMAND.to_string()
}

fn default_dependency_dir() -> String {
    defaults::DEPENDENCY_DIR.to_string()
}

fn default_command_timeout_secs() -> u64 {
    defaults::COMMAND_TIMEOUT_SECS
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            toolchain_mode: ToolchainMode::default(),
            installer_command: default_installer_command(),
            dependency_dir: default_dependency_dir(),
            purge_build_tools: false,
            overwrite: false,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl ProvisionOptions {
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

// ============================================================================
// Orchestrator Options
// ============================================================================

/// LLM backend used for semantic enrichment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmOptions {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    defaults::LLM_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    defaults::LLM_MODEL.to_string()
}

fn default_llm_timeout_secs() -> u64 {
    defaults::LLM_TIMEOUT_SECS
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Orchestrator configuration.
///
/// Resolution order: defaults, then `archlens.yaml` in the application
/// root, then environment variables. Relative paths resolve against the
/// application root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorOptions {
    /// Repository to analyze.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,

    /// Where diagrams and JSON exports are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Use heuristic enrichment only.
    #[serde(default)]
    pub skip_llm: bool,

    /// Python files inspected for imports and outbound calls.
    #[serde(default = "default_max_source_files")]
    pub max_source_files: usize,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Directory for the rotating log file; stderr only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Extra ignore patterns, added to the built-in list.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    #[serde(default)]
    pub llm: LlmOptions,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(defaults::REPO_PATH)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(defaults::OUTPUT_DIR)
}

fn default_max_source_files() -> usize {
    defaults::MAX_SOURCE_FILES
}

fn default_shutdown_grace_secs() -> u64 {
    defaults::SHUTDOWN_GRACE_SECS
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            output_dir: default_output_dir(),
            skip_llm: false,
            max_source_files: default_max_source_files(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_dir: None,
            ignore_patterns: Vec::new(),
            llm: LlmOptions::default(),
        }
    }
}

impl OrchestratorOptions {
    /// Load options for the application rooted at `app_root`.
    pub fn load(app_root: &Path) -> ArchlensResult<Self> {
        Self::load_with_env(app_root, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with_env<F>(app_root: &Path, env: F) -> ArchlensResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = app_root.join(filenames::ORCHESTRATOR_CONFIG);
        let mut options = if config_path.is_file() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        options.apply_env(env)?;
        options.resolve_paths(app_root);
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> ArchlensResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ArchlensError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text)
            .map_err(|e| ArchlensError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Apply environment overrides.
    pub fn apply_env<F>(&mut self, env: F) -> ArchlensResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(const_envs::REPO_PATH) {
            self.repo_path = PathBuf::from(v);
        }
        if let Some(v) = get(const_envs::OUTPUT_DIR) {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get(const_envs::SKIP_LLM) {
            self.skip_llm = parse_bool(const_envs::SKIP_LLM, &v)?;
        }
        if let Some(v) = get(const_envs::MAX_SOURCE_FILES) {
            self.max_source_files = parse_number(const_envs::MAX_SOURCE_FILES, &v)?;
        }
        if let Some(v) = get(const_envs::SHUTDOWN_GRACE_SECS) {
            self.shutdown_grace_secs = parse_number(const_envs::SHUTDOWN_GRACE_SECS, &v)?;
        }
        if let Some(v) = get(const_envs::LOG_DIR) {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get(const_envs::LLM_BASE_URL) {
            self.llm.base_url = v;
        }
        if let Some(v) = get(const_envs::LLM_MODEL) {
            self.llm.model = v;
        }
        Ok(())
    }

    fn resolve_paths(&mut self, app_root: &Path) {
        if self.repo_path.is_relative() {
            self.repo_path = app_root.join(&self.repo_path);
        }
        if self.output_dir.is_relative() {
            self.output_dir = app_root.join(&self.output_dir);
        }
        if let Some(dir) = &self.log_dir
            && dir.is_relative()
        {
            self.log_dir = Some(app_root.join(dir));
        }
    }

    pub fn validate(&self) -> ArchlensResult<()> {
        if self.max_source_files == 0 {
            return Err(ArchlensError::Config(
                "max_source_files must be at least 1".into(),
            ));
        }
        if !self.skip_llm
            && !(self.llm.base_url.starts_with("http://") || self.llm.base_url.starts_with("https://"))
        {
            return Err(ArchlensError::Config(format!(
                "llm.base_url must be an http(s) URL: {}",
                self.llm.base_url
            )));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse_bool(key: &str, value: &str) -> ArchlensResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ArchlensError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ArchlensResult<T> {
    value.trim().parse().map_err(|_| {
        ArchlensError::Config(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_resolve_against_app_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = OrchestratorOptions::load_with_env(dir.path(), env_of(&[])).unwrap();

        assert_eq!(options.repo_path, dir.path().join(defaults::REPO_PATH));
        assert_eq!(options.output_dir, dir.path().join(defaults::OUTPUT_DIR));
        assert_eq!(options.max_source_files, 10);
        assert_eq!(options.shutdown_grace(), Duration::from_secs(10));
        assert!(!options.skip_llm);
    }

    #[test]
    fn test_file_then_env_precedence() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(filenames::ORCHESTRATOR_CONFIG),
            "repo_path: /repos/shop\nmax_source_files: 3\nskip_llm: false\nllm:\n  model: codellama:13b\n",
        )
        .unwrap();

        let options = OrchestratorOptions::load_with_env(
            dir.path(),
            env_of(&[
                (const_envs::MAX_SOURCE_FILES, "5"),
                (const_envs::SKIP_LLM, "yes"),
                (const_envs::OUTPUT_DIR, "/tmp/out"),
            ]),
        )
        .unwrap();

        assert_eq!(options.repo_path, PathBuf::from("/repos/shop"));
        assert_eq!(options.max_source_files, 5);
        assert!(options.skip_llm);
        assert_eq!(options.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(options.llm.model, "codellama:13b");
        assert_eq!(options.llm.base_url, defaults::LLM_BASE_URL);
    }

    #[test]
    fn test_invalid_env_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = OrchestratorOptions::load_with_env(
            dir.path(),
            env_of(&[(const_envs::SHUTDOWN_GRACE_SECS, "soon")]),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(filenames::ORCHESTRATOR_CONFIG), "max_source_files: [").unwrap();
        let err = OrchestratorOptions::load_with_env(dir.path(), env_of(&[])).unwrap_err();
        assert!(matches!(err, ArchlensError::Config(_)));
    }

    #[test]
    fn test_zero_source_files_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = OrchestratorOptions::load_with_env(
            dir.path(),
            env_of(&[(const_envs::MAX_SOURCE_FILES, "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_source_files"));
    }

    #[test]
    fn test_provision_defaults() {
        let options: ProvisionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.toolchain_mode, ToolchainMode::Verify);
        assert_eq!(options.dependency_dir, defaults::DEPENDENCY_DIR);
        assert!(options.installer_command.contains("{manifest}"));
        assert!(!options.purge_build_tools);
        assert_eq!(options.command_timeout(), Some(Duration::from_secs(1800)));
    }
}
