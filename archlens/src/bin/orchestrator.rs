//! Container entrypoint.
//!
//! Takes no arguments. The working directory is the application root;
//! configuration comes from an optional `archlens.yaml` there and from
//! `ARCHLENS_*` environment variables. The exit status is the only result:
//!
//! | code | meaning                              |
//! |------|--------------------------------------|
//! | 0    | job completed                        |
//! | 1    | job failed                           |
//! | 2    | invalid configuration                |
//! | 124  | grace period expired, job aborted    |
//! | 130  | stopped by SIGINT                    |
//! | 143  | stopped by SIGTERM                   |

use std::sync::Arc;

use archlens::recovery::RecoveryJob;
use archlens::runtime::OrchestratorOptions;
use archlens::runtime::constants::exit_codes;
use archlens::supervisor::{Outcome, Supervisor};
use archlens::util;
use clap::Parser;

/// archlens orchestrator - recovers C4 diagrams from the repository it runs in
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct OrchestratorArgs {}

fn main() {
    let _args = OrchestratorArgs::parse();
    std::process::exit(run());
}

fn run() -> i32 {
    let app_root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("failed to resolve working directory: {}", e);
            return exit_codes::CONFIG;
        }
    };

    let options = match OrchestratorOptions::load(&app_root) {
        Ok(options) => options,
        Err(e) => {
            let _guard = util::init_logging(None);
            tracing::error!(error = %e, "Invalid configuration");
            return e.exit_code();
        }
    };

    // Keep the guard alive until exit so buffered file logs are flushed
    let _log_guard = util::init_logging(options.log_dir.as_deref());

    tracing::info!(
        app_root = %app_root.display(),
        repo = %options.repo_path.display(),
        output = %options.output_dir.display(),
        skip_llm = options.skip_llm,
        "Orchestrator starting"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start async runtime");
            return exit_codes::FAILURE;
        }
    };

    let outcome = runtime.block_on(async {
        let job = match RecoveryJob::new(&options) {
            Ok(job) => Arc::new(job),
            Err(e) => return Outcome::Failed(e),
        };
        Supervisor::new(options.shutdown_grace()).run(job).await
    });

    let code = outcome.exit_code();
    tracing::info!(outcome = ?outcome, exit_code = code, "Orchestrator exiting");

    // Aborted tasks may still hold blocking threads; do not wait for them
    runtime.shutdown_background();
    code
}
