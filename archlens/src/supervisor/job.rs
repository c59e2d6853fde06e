//! The unit of work a supervisor runs.

use archlens_shared::errors::ArchlensResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A long-running, cancellable job.
///
/// Implementations should check `cancel` between steps and return
/// [`ArchlensError::Cancelled`](archlens_shared::errors::ArchlensError::Cancelled)
/// once it fires, leaving no partial output behind.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, cancel: CancellationToken) -> ArchlensResult<()>;
}
