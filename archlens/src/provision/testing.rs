//! In-process fakes for the executor and installer seams.

use crate::provision::executor::{CommandExecutor, CommandOutput, ExecEnv};
use crate::provision::installer::{DependencyInstaller, InstallReport, InstallRequest};
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use async_trait::async_trait;
use std::sync::Mutex;

/// Records every argv and succeeds, unless the command mentions `fail_on`.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on: Option<String>,
    stdout: String,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, argv: &[String], _env: &ExecEnv) -> ArchlensResult<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(argv.to_vec());
        }
        let failed = self
            .fail_on
            .as_ref()
            .is_some_and(|needle| argv.join(" ").contains(needle.as_str()));
        Ok(CommandOutput {
            status: Some(if failed { 1 } else { 0 }),
            stdout: self.stdout.clone(),
            stderr: if failed { "simulated failure".into() } else { String::new() },
        })
    }
}

/// Resolves every requirement except those listed as unresolvable.
#[derive(Default)]
pub struct FakeInstaller {
    unresolvable: Vec<String>,
    runtime_requires: Vec<String>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unresolvable(mut self, name: &str) -> Self {
        self.unresolvable.push(name.to_string());
        self
    }

    pub fn runtime_requires(mut self, package: &str) -> Self {
        self.runtime_requires.push(package.to_string());
        self
    }
}

#[async_trait]
impl DependencyInstaller for FakeInstaller {
    async fn install(&self, request: &InstallRequest<'_>) -> ArchlensResult<InstallReport> {
        let mut report = InstallReport {
            runtime_requires: self.runtime_requires.clone(),
            ..Default::default()
        };
        for req in request.manifest.requirements() {
            if self.unresolvable.contains(&req.normalized_name()) {
                return Err(ArchlensError::Process(format!(
                    "no matching distribution found for {}",
                    req
                )));
            }
            report
                .installed
                .insert(req.normalized_name(), Some("1.0.0".to_string()));
        }
        std::fs::create_dir_all(&request.target_dir)?;
        Ok(report)
    }
}
