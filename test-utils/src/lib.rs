//! Shared helpers for archlens integration tests.
//!
//! - [`fixtures`] writes sample repositories and build contexts to disk
//! - [`fakes`] stands in for the command executor and dependency installer

pub mod fakes;
pub mod fixtures;

pub use fakes::{FakeExecutor, FakeInstaller};
pub use fixtures::{BuildContextFixture, SampleRepo};
