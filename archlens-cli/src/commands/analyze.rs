use std::path::PathBuf;
use std::sync::Arc;

use archlens::recovery::RecoveryJob;
use archlens::runtime::OrchestratorOptions;
use archlens::supervisor::{Outcome, Supervisor};
use clap::Args;

use crate::cli::CommandExit;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Repository to analyze
    pub repo: PathBuf,

    /// Directory for diagrams and JSON exports
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Orchestrator configuration file (archlens.yaml format)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use heuristic enrichment only
    #[arg(long)]
    pub skip_llm: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn execute(args: AnalyzeArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let mut options = match &args.config {
        Some(path) => OrchestratorOptions::from_file(path)?,
        None => OrchestratorOptions::default(),
    };
    options.apply_env(|key| std::env::var(key).ok())?;
    options.repo_path = args.repo;
    options.output_dir = args.output;
    if args.skip_llm {
        options.skip_llm = true;
    }
    options.validate()?;

    let job = RecoveryJob::new(&options)?;
    let outcome = Supervisor::new(options.shutdown_grace())
        .run(Arc::new(job))
        .await;

    match outcome {
        Outcome::Completed => {
            println!("{}", options.output_dir.display());
            Ok(())
        }
        other => Err(CommandExit::from_outcome(&other).into()),
    }
}
