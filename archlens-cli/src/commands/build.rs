use std::path::PathBuf;

use archlens::provision::{BuildContext, BuildManifest, BuildPipeline, BuildPlan};
use archlens::runtime::constants::filenames;
use archlens::runtime::{ProvisionOptions, ToolchainMode};
use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build context directory
    #[arg(short = 'C', long, default_value = ".")]
    pub context: PathBuf,

    /// Build manifest, relative to the context
    #[arg(short, long, default_value = filenames::BUILD_MANIFEST)]
    pub file: PathBuf,

    /// Image directory to create
    #[arg(short, long, required_unless_present = "dry_run")]
    pub output: Option<PathBuf>,

    /// Installer command template; placeholders {manifest}, {target}, {rootfs}
    #[arg(long)]
    pub installer: Option<String>,

    /// Remove build-only system packages not needed at runtime
    #[arg(long)]
    pub purge_build_tools: bool,

    /// Run the manifest's system package commands instead of checking tools on PATH
    #[arg(long)]
    pub execute_toolchain: bool,

    /// Print the build plan without building
    #[arg(long)]
    pub dry_run: bool,

    /// Replace an existing image at the output path
    #[arg(long)]
    pub force: bool,
}

pub async fn execute(args: BuildArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let manifest_path = if args.file.is_absolute() {
        args.file.clone()
    } else {
        args.context.join(&args.file)
    };
    let manifest = BuildManifest::from_path(&manifest_path)?;
    let plan = BuildPlan::from_manifest(&manifest, &BuildContext::new(&args.context))?;

    if args.dry_run {
        println!("{}", plan_table(&plan));
        return Ok(());
    }
    let Some(output) = args.output else {
        anyhow::bail!("--output is required unless --dry-run is given");
    };

    let mut options = ProvisionOptions {
        purge_build_tools: args.purge_build_tools,
        overwrite: args.force,
        ..Default::default()
    };
    if let Some(installer) = args.installer {
        options.installer_command = installer;
    }
    if args.execute_toolchain {
        options.toolchain_mode = ToolchainMode::Execute;
    }

    // Ctrl-C stops the build between stages; the staging directory is removed
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, stopping after the current stage");
                cancel.cancel();
            }
        })
    };

    let result = BuildPipeline::new(plan, &output, options)?
        .with_cancellation(cancel)
        .run()
        .await;
    watcher.abort();
    let image = result?;

    eprintln!(
        "Built {} ({} requirements, source {})",
        image.config.base_image,
        image.config.requirements.len(),
        short_digest(&image.config.source_digest)
    );
    println!("{}", image.path.display());
    Ok(())
}

fn plan_table(plan: &BuildPlan) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["STAGE", "DETAILS"]);

    let toolchain = if plan.toolchain.packages.is_empty() {
        format!("{} command(s)", plan.toolchain.commands.len())
    } else {
        format!(
            "{} command(s); packages: {}",
            plan.toolchain.commands.len(),
            plan.toolchain.packages.join(" ")
        )
    };
    let sources = plan
        .sources
        .iter()
        .map(|s| format!("{} -> {}", s.source.display(), s.dest))
        .collect::<Vec<_>>()
        .join("\n");

    let details = [
        toolchain,
        format!(
            "{} -> {}",
            plan.dependencies.manifest.display(),
            plan.dependencies.image_path
        ),
        sources,
        format!("{:?}", plan.entrypoint),
        plan.cleanup.metadata_paths.join("\n"),
    ];

    table.add_row(vec!["base".to_string(), plan.base_image.clone()]);
    for (stage, detail) in plan.stage_names().into_iter().zip(details) {
        table.add_row(vec![stage.to_string(), detail]);
    }
    table
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}
