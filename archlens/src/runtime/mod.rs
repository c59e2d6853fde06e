pub mod constants;
pub mod options;

pub use options::{LlmOptions, OrchestratorOptions, ProvisionOptions, ToolchainMode};
