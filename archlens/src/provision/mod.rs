//! Image provisioning.
//!
//! A build manifest is parsed, classified into a [`BuildPlan`] and executed
//! by the [`BuildPipeline`] into an image directory.

pub mod digest;
pub mod executor;
pub mod image;
pub mod installer;
pub mod manifest;
pub mod pipeline;
pub mod plan;
pub mod requirements;
pub mod stages;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::{CommandExecutor, CommandOutput, ExecEnv, ShellExecutor};
pub use image::{ImageConfig, InstalledRequirement};
pub use installer::{CommandInstaller, DependencyInstaller, InstallReport, InstallRequest};
pub use manifest::{BuildManifest, CommandForm, Instruction};
pub use pipeline::{BuildPipeline, BuiltImage};
pub use plan::{BuildContext, BuildPlan, PackageManager, StandardPlan};
pub use requirements::{DependencyManifest, Requirement};
