use std::fmt;

use archlens::supervisor::Outcome;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands;

/// archlens - build orchestrator images and recover C4 architecture diagrams
#[derive(Parser, Debug)]
#[command(name = "archlens", author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an image directory from a build manifest
    Build(commands::build::BuildArgs),
    /// Print the configuration of a built image
    Inspect(commands::inspect::InspectArgs),
    /// Recover C4 diagrams from a repository
    Analyze(commands::analyze::AnalyzeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Log filter (e.g. `info`, `archlens=debug`); overrides RUST_LOG
    #[arg(long, global = true, env = "ARCHLENS_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl GlobalFlags {
    /// Log to stderr. `--log-level` wins over RUST_LOG, which wins over `default`.
    pub fn init_logging(&self, default: &str) {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::try_new(level).unwrap_or_else(|e| {
                eprintln!("Warning: invalid --log-level '{}': {}", level, e);
                EnvFilter::new(default)
            }),
            None => archlens::util::env_filter(default),
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

impl Cli {
    /// Default log filter for the chosen command.
    pub fn default_log_filter(&self) -> &'static str {
        match &self.command {
            Commands::Analyze(args) if args.verbose => "debug",
            Commands::Analyze(_) | Commands::Build(_) => "info",
            Commands::Inspect(_) => "warn",
        }
    }
}

/// A command failure that maps to a specific process exit status.
#[derive(Debug)]
pub struct CommandExit {
    pub code: i32,
    pub message: String,
}

impl CommandExit {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        let message = match outcome {
            Outcome::Completed => "completed".to_string(),
            Outcome::Failed(e) => e.to_string(),
            Outcome::Stopped(signal) => format!("stopped by {}", signal.name()),
            Outcome::Forced(signal) => format!(
                "aborted: grace period expired after {}",
                signal.name()
            ),
        };
        Self {
            code: outcome.exit_code(),
            message,
        }
    }
}

impl fmt::Display for CommandExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CommandExit {}

#[cfg(test)]
mod tests {
    use super::*;
    use archlens::ArchlensError;
    use archlens::supervisor::ShutdownSignal;

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::parse_from([
            "archlens",
            "--log-level",
            "debug",
            "build",
            "--context",
            "ctx",
            "--output",
            "out/image",
            "--purge-build-tools",
            "--force",
        ]);
        assert_eq!(cli.global.log_level.as_deref(), Some("debug"));
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.context.to_str(), Some("ctx"));
        assert!(args.purge_build_tools);
        assert!(args.force);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_verbose_analyze_logs_debug() {
        let cli = Cli::parse_from(["archlens", "analyze", "repo", "-v", "--skip-llm"]);
        assert_eq!(cli.default_log_filter(), "debug");
        let cli = Cli::parse_from(["archlens", "inspect", "image"]);
        assert_eq!(cli.default_log_filter(), "warn");
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(
            CommandExit::from_outcome(&Outcome::Stopped(ShutdownSignal::Interrupt)).code,
            130
        );
        let failed = CommandExit::from_outcome(&Outcome::Failed(ArchlensError::Config(
            "bad".into(),
        )));
        assert_eq!(failed.code, 2);
        assert!(failed.message.contains("bad"));
        assert_eq!(
            CommandExit::from_outcome(&Outcome::Forced(ShutdownSignal::Terminate)).code,
            124
        );
    }
}
