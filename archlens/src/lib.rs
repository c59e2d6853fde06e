//! archlens: reproducible image provisioning and a supervised C4
//! architecture-recovery orchestrator.
//!
//! - [`provision`] builds an image directory from a build manifest, a
//!   dependency manifest and a source tree
//! - [`supervisor`] runs one cancellable job under SIGTERM/SIGINT handling
//!   and maps its outcome to an exit status
//! - [`recovery`] is the job the orchestrator runs

pub mod provision;
pub mod recovery;
pub mod runtime;
pub mod supervisor;
pub mod util;

pub use archlens_shared::errors::{ArchlensError, ArchlensResult};
pub use provision::{BuildManifest, BuildPipeline, BuildPlan, BuiltImage, ImageConfig};
pub use recovery::{RecoveryJob, RecoveryReport};
pub use runtime::{OrchestratorOptions, ProvisionOptions};
pub use supervisor::{Job, Outcome, ShutdownSignal, Supervisor};
