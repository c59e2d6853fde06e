mod cli;
mod commands;

use std::process::ExitCode;

use archlens::ArchlensError;
use archlens::runtime::constants::exit_codes;
use clap::Parser;

use crate::cli::{Cli, CommandExit, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.global.init_logging(cli.default_log_filter());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            return ExitCode::from(exit_codes::FAILURE as u8);
        }
    };

    let global = cli.global;
    let result = runtime.block_on(async {
        match cli.command {
            Commands::Build(args) => commands::build::execute(args, &global).await,
            Commands::Inspect(args) => commands::inspect::execute(args, &global),
            Commands::Analyze(args) => commands::analyze::execute(args, &global).await,
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e) as u8)
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(exit) = error.downcast_ref::<CommandExit>() {
        return exit.code;
    }
    if let Some(e) = error.downcast_ref::<ArchlensError>() {
        return e.exit_code();
    }
    exit_codes::FAILURE
}
