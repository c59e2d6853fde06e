//! Executor and installer fakes.
//!
//! Both record what they were asked to do so tests can assert on order and
//! arguments without touching the host package manager.

use archlens::provision::executor::{CommandExecutor, CommandOutput, ExecEnv};
use archlens::provision::installer::{DependencyInstaller, InstallReport, InstallRequest};
use archlens::{ArchlensError, ArchlensResult};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Succeeds for every command unless its text contains a failing needle.
#[derive(Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<String>>,
    failing: Vec<String>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    /// Commands run so far, each joined with spaces.
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, argv: &[String], _env: &ExecEnv) -> ArchlensResult<CommandOutput> {
        let line = argv.join(" ");
        let failed = self.failing.iter().any(|n| line.contains(n.as_str()));
        self.calls.lock().push(line);
        Ok(CommandOutput {
            status: Some(if failed { 1 } else { 0 }),
            stdout: String::new(),
            stderr: if failed {
                "E: Unable to locate package".to_string()
            } else {
                String::new()
            },
        })
    }
}

/// Installs each requirement as an empty package directory in the target.
#[derive(Default)]
pub struct FakeInstaller {
    missing: Vec<String>,
    runtime_requires: Vec<String>,
    installs: Mutex<usize>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the install when this (normalized) name is requested.
    pub fn missing(mut self, name: &str) -> Self {
        self.missing.push(name.to_string());
        self
    }

    /// Report `package` as a system package needed at runtime.
    pub fn requiring(mut self, package: &str) -> Self {
        self.runtime_requires.push(package.to_string());
        self
    }

    pub fn install_count(&self) -> usize {
        *self.installs.lock()
    }
}

#[async_trait]
impl DependencyInstaller for FakeInstaller {
    async fn install(&self, request: &InstallRequest<'_>) -> ArchlensResult<InstallReport> {
        *self.installs.lock() += 1;
        let mut report = InstallReport {
            runtime_requires: self.runtime_requires.clone(),
            ..Default::default()
        };
        for req in request.manifest.requirements() {
            let name = req.normalized_name();
            if self.missing.contains(&name) {
                return Err(ArchlensError::Process(format!(
                    "ERROR: No matching distribution found for {}",
                    req
                )));
            }
            std::fs::create_dir_all(request.target_dir.join(&name))?;
            report.installed.insert(name, Some("1.0.0".to_string()));
        }
        Ok(report)
    }
}
