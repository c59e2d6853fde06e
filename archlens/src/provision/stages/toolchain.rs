//! Stage 1: Toolchain.
//!
//! Makes the build-only system tools available before dependencies are
//! installed. In Verify mode the declared packages must already be on PATH;
//! in Execute mode the declared install commands run through the executor,
//! with every package-manager call pointed at the image rootfs.

use crate::provision::executor::{ExecEnv, execute_checked};
use crate::provision::plan::target_root;
use crate::provision::types::{ToolchainInput, ToolchainOutput};
use crate::runtime::options::ToolchainMode;
use crate::util::find_in_path;
use archlens_shared::errors::{ArchlensError, ArchlensResult};

pub const STAGE: &str = "toolchain";

/// Install or verify the toolchain.
pub async fn run(input: ToolchainInput<'_>) -> ArchlensResult<ToolchainOutput> {
    let mut output = ToolchainOutput::default();

    match input.mode {
        ToolchainMode::Verify => {
            let mut missing = Vec::new();
            for package in &input.step.packages {
                for binary in binaries_for(package) {
                    match find_in_path(binary) {
                        Ok(path) => {
                            tracing::debug!(package = %package, binary = %path.display(), "Toolchain binary found");
                            output.verified.push(binary.to_string());
                        }
                        Err(_) => missing.push(format!("{} ({})", binary, package)),
                    }
                }
            }
            if !missing.is_empty() {
                return Err(ArchlensError::stage(
                    STAGE,
                    format!("missing build tools: {}", missing.join(", ")),
                ));
            }
        }
        ToolchainMode::Execute => {
            let rootfs = input.layout.rootfs_dir();
            for command in &input.step.commands {
                let env = ExecEnv {
                    cwd: Some(rootfs.clone()),
                    env: command.env.clone(),
                };
                let rooted = target_root(&command.command, &rootfs);
                tracing::info!(line = command.line, command = %rooted.text(), "Running toolchain command");
                execute_checked(input.executor, &rooted.argv(), &env)
                    .await
                    .map_err(|e| e.in_stage(STAGE))?;
                output.executed += 1;
            }
        }
    }

    tracing::info!(
        packages = ?input.step.packages,
        executed = output.executed,
        verified = output.verified.len(),
        "Toolchain ready"
    );
    Ok(output)
}

/// Binaries that indicate a package is installed.
fn binaries_for(package: &str) -> Vec<&str> {
    let name = package.split(['=', ':']).next().unwrap_or(package);
    match name {
        "build-essential" | "build-base" => vec!["gcc", "make"],
        "g++" | "gcc-c++" => vec!["g++"],
        "python3-dev" | "python3-devel" | "python-dev" => vec!["python3"],
        "pkg-config" | "pkgconf" => vec!["pkg-config"],
        n if n.starts_with("lib") => Vec::new(),
        n => vec![n],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::manifest::CommandForm;
    use crate::provision::plan::{PlannedCommand, ToolchainStep};
    use archlens_shared::layout::ImageLayout;
    use crate::provision::testing::RecordingExecutor;

    #[test]
    fn test_binaries_for() {
        assert_eq!(binaries_for("build-essential"), vec!["gcc", "make"]);
        assert_eq!(binaries_for("git=1:2.39"), vec!["git"]);
        assert!(binaries_for("libpq-dev").is_empty());
    }

    #[tokio::test]
    async fn test_verify_reports_missing_tools() {
        let step = ToolchainStep {
            packages: vec!["sh".into(), "definitely-missing-tool".into()],
            ..Default::default()
        };
        let executor = RecordingExecutor::new();
        let layout = ImageLayout::new("/tmp/unused");
        let err = run(ToolchainInput {
            step: &step,
            layout: &layout,
            executor: &executor,
            mode: ToolchainMode::Verify,
        })
        .await
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("stage 'toolchain' failed"), "{msg}");
        assert!(msg.contains("definitely-missing-tool"), "{msg}");
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_execute_runs_commands_in_order() {
        let step = ToolchainStep {
            packages: vec!["gcc".into()],
            commands: vec![
                PlannedCommand {
                    line: 2,
                    command: CommandForm::Shell("apt-get update".into()),
                    workdir: "/".into(),
                    env: vec![],
                },
                PlannedCommand {
                    line: 3,
                    command: CommandForm::Exec(vec!["apt-get".into(), "install".into(), "gcc".into()]),
                    workdir: "/".into(),
                    env: vec![],
                },
            ],
            ..Default::default()
        };
        let executor = RecordingExecutor::new();
        let layout = ImageLayout::new("/tmp/unused");
        let out = run(ToolchainInput {
            step: &step,
            layout: &layout,
            executor: &executor,
            mode: ToolchainMode::Execute,
        })
        .await
        .unwrap();

        assert_eq!(out.executed, 2);
        let calls = executor.calls();
        assert_eq!(
            calls[0],
            vec!["/bin/sh", "-c", "apt-get -o RootDir=/tmp/unused/rootfs update"]
        );
        assert_eq!(
            calls[1],
            vec!["apt-get", "-o", "RootDir=/tmp/unused/rootfs", "install", "gcc"]
        );
    }

    #[tokio::test]
    async fn test_execute_failure_is_stage_error() {
        let step = ToolchainStep {
            commands: vec![PlannedCommand {
                line: 2,
                command: CommandForm::Shell("apt-get install -y gcc".into()),
                workdir: "/".into(),
                env: vec![],
            }],
            ..Default::default()
        };
        let executor = RecordingExecutor::new().fail_on("apt-get");
        let layout = ImageLayout::new("/tmp/unused");
        let err = run(ToolchainInput {
            step: &step,
            layout: &layout,
            executor: &executor,
            mode: ToolchainMode::Execute,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ArchlensError::Stage { stage: "toolchain", .. }));
    }
}
