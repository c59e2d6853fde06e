//! Archlens Shared - code used by both the build pipeline and the
//! orchestrator entrypoint.
//!
//! This crate contains the error type, the constants both sides must agree
//! on (exit codes, environment variable names, file names) and the on-disk
//! image layout.

pub mod constants;
pub mod errors;
pub mod layout;

pub use errors::{ArchlensError, ArchlensResult};
pub use layout::ImageLayout;
