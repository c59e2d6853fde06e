use std::path::PathBuf;

use archlens::provision::ImageConfig;
use archlens_shared::layout::ImageLayout;
use clap::{Args, ValueEnum};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Image directory produced by `archlens build`
    pub image: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = InspectFormat::Json)]
    pub format: InspectFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InspectFormat {
    Json,
    Yaml,
}

pub fn execute(args: InspectArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let layout = ImageLayout::new(&args.image);
    if !layout.is_complete() {
        anyhow::bail!(
            "{}: not an image (no {})",
            args.image.display(),
            layout.config_path().display()
        );
    }
    let config = ImageConfig::load(&layout.config_path())?;

    let rendered = match args.format {
        InspectFormat::Json => serde_json::to_string_pretty(&config)?,
        InspectFormat::Yaml => serde_yaml::to_string(&config)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}
