//! Build stages.
//!
//! Each stage is a function with typed input/output.
//! Stages do ONE thing and fail fast: any error aborts the build.
//!
//! ## Stage Order
//!
//! ```text
//! Toolchain ──→ Dependencies ──→ Source ──→ Entrypoint ──→ Cleanup
//! ```
//!
//! All stages are sequential; the ordering is what guarantees dependencies
//! are installed before the application can start.

pub mod cleanup;
pub mod dependencies;
pub mod entrypoint;
pub mod source;
pub mod toolchain;
