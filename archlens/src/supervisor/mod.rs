//! Process supervisor for the orchestrator entrypoint.
//!
//! Runs one cancellable job and maps how it ended to an exit status:
//!
//! ```text
//! job done ─────────────────────────────→ 0 / 1 / 2
//! signal ──→ cancel ──→ job stops ──────→ 143 (SIGTERM) / 130 (SIGINT)
//!                   └─→ grace expires ──→ abort, 124
//! ```
//!
//! A second signal during the grace period aborts immediately.

pub mod job;
pub mod signals;

pub use job::Job;
pub use signals::{ShutdownSignal, SignalSource, UnixSignals};

use archlens_shared::constants::exit_codes;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a supervised run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The job finished on its own.
    Completed,
    /// The job returned an error.
    Failed(ArchlensError),
    /// A signal arrived and the job stopped within the grace period.
    Stopped(ShutdownSignal),
    /// The job did not stop within the grace period and was aborted.
    Forced(ShutdownSignal),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => exit_codes::SUCCESS,
            Self::Failed(e) => match e {
                ArchlensError::Cancelled => exit_codes::FAILURE,
                other => other.exit_code(),
            },
            Self::Stopped(signal) => signal.exit_code(),
            Self::Forced(_) => exit_codes::FORCED,
        }
    }
}

/// Runs a job until it completes or a shutdown signal stops it.
pub struct Supervisor {
    grace: Duration,
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Supervise `job` against the process's SIGTERM/SIGINT.
    pub async fn run(&self, job: Arc<dyn Job>) -> Outcome {
        match UnixSignals::register() {
            Ok(signals) => self.run_with_signals(job, signals).await,
            Err(e) => Outcome::Failed(e),
        }
    }

    /// Supervise `job` against an arbitrary signal source.
    pub async fn run_with_signals<S: SignalSource>(&self, job: Arc<dyn Job>, mut signals: S) -> Outcome {
        let cancel = CancellationToken::new();
        let name = job.name().to_string();
        let mut handle = spawn_job(job, cancel.clone());

        tracing::info!(job = %name, "Job started");

        let signal = tokio::select! {
            result = &mut handle => return finished(&name, result),
            signal = recv_or_pending(&mut signals) => signal,
        };

        tracing::info!(
            job = %name,
            signal = signal.name(),
            grace_secs = self.grace.as_secs_f64(),
            "Shutdown requested, cancelling job"
        );
        cancel.cancel();

        tokio::select! {
            result = &mut handle => match finished(&name, result) {
                Outcome::Completed => Outcome::Completed,
                Outcome::Failed(ArchlensError::Cancelled) => Outcome::Stopped(signal),
                Outcome::Failed(e) => {
                    tracing::warn!(job = %name, error = %e, "Job failed while shutting down");
                    Outcome::Stopped(signal)
                }
                other => other,
            },
            _ = tokio::time::sleep(self.grace) => {
                tracing::error!(job = %name, "Grace period expired, aborting job");
                handle.abort();
                Outcome::Forced(signal)
            }
            second = recv_or_pending(&mut signals) => {
                tracing::error!(job = %name, signal = second.name(), "Second signal, aborting job");
                handle.abort();
                Outcome::Forced(signal)
            }
        }
    }
}

fn spawn_job(job: Arc<dyn Job>, cancel: CancellationToken) -> JoinHandle<ArchlensResult<()>> {
    tokio::spawn(async move { job.run(cancel).await })
}

/// Next signal, or never if the source is closed.
async fn recv_or_pending<S: SignalSource>(signals: &mut S) -> ShutdownSignal {
    match signals.recv().await {
        Some(signal) => signal,
        None => std::future::pending().await,
    }
}

fn finished(
    name: &str,
    result: Result<ArchlensResult<()>, tokio::task::JoinError>,
) -> Outcome {
    match result {
        Ok(Ok(())) => {
            tracing::info!(job = %name, "Job completed");
            Outcome::Completed
        }
        Ok(Err(e)) => {
            tracing::error!(job = %name, error = %e, "Job failed");
            Outcome::Failed(e)
        }
        Err(e) => {
            tracing::error!(job = %name, error = %e, "Job panicked");
            Outcome::Failed(ArchlensError::Internal(format!("job task failed: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Sleeps for `work`, honoring cancellation unless `stubborn`.
    struct SleepJob {
        work: Duration,
        stubborn: bool,
        fail: Option<fn() -> ArchlensError>,
    }

    #[async_trait]
    impl Job for SleepJob {
        fn name(&self) -> &str {
            "sleep"
        }

        async fn run(&self, cancel: CancellationToken) -> ArchlensResult<()> {
            if self.stubborn {
                tokio::time::sleep(self.work).await;
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.work) => {}
                _ = cancel.cancelled() => return Err(ArchlensError::Cancelled),
            }
            match self.fail {
                Some(f) => Err(f()),
                None => Ok(()),
            }
        }
    }

    fn job(work_ms: u64, stubborn: bool) -> Arc<dyn Job> {
        Arc::new(SleepJob {
            work: Duration::from_millis(work_ms),
            stubborn,
            fail: None,
        })
    }

    #[tokio::test]
    async fn test_completion_exits_zero() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let outcome = Supervisor::new(Duration::from_secs(1))
            .run_with_signals(job(10, false), rx)
            .await;
        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_failure_exit_codes() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let failing = Arc::new(SleepJob {
            work: Duration::from_millis(1),
            stubborn: false,
            fail: Some(|| ArchlensError::Process("boom".into())),
        });
        let outcome = Supervisor::new(Duration::from_secs(1))
            .run_with_signals(failing, rx)
            .await;
        assert_eq!(outcome.exit_code(), 1);

        let (_tx, rx) = mpsc::unbounded_channel();
        let misconfigured = Arc::new(SleepJob {
            work: Duration::from_millis(1),
            stubborn: false,
            fail: Some(|| ArchlensError::Config("bad".into())),
        });
        let outcome = Supervisor::new(Duration::from_secs(1))
            .run_with_signals(misconfigured, rx)
            .await;
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_sigterm_stops_job() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ShutdownSignal::Terminate).unwrap();
        let outcome = Supervisor::new(Duration::from_secs(5))
            .run_with_signals(job(60_000, false), rx)
            .await;
        assert!(matches!(outcome, Outcome::Stopped(ShutdownSignal::Terminate)));
        assert_eq!(outcome.exit_code(), 143);
    }

    #[tokio::test]
    async fn test_sigint_stops_job() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ShutdownSignal::Interrupt).unwrap();
        let outcome = Supervisor::new(Duration::from_secs(5))
            .run_with_signals(job(60_000, false), rx)
            .await;
        assert_eq!(outcome.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_grace_period_expiry_forces_abort() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ShutdownSignal::Terminate).unwrap();
        let start = std::time::Instant::now();
        let outcome = Supervisor::new(Duration::from_millis(100))
            .run_with_signals(job(60_000, true), rx)
            .await;
        assert!(matches!(outcome, Outcome::Forced(_)));
        assert_eq!(outcome.exit_code(), 124);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_second_signal_forces_abort() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ShutdownSignal::Interrupt).unwrap();
        tx.send(ShutdownSignal::Interrupt).unwrap();
        let outcome = Supervisor::new(Duration::from_secs(60))
            .run_with_signals(job(60_000, true), rx)
            .await;
        assert!(matches!(outcome, Outcome::Forced(ShutdownSignal::Interrupt)));
    }

    #[tokio::test]
    async fn test_closed_signal_source_waits_for_job() {
        let (tx, rx) = mpsc::unbounded_channel::<ShutdownSignal>();
        drop(tx);
        let outcome = Supervisor::new(Duration::from_secs(1))
            .run_with_signals(job(20, false), rx)
            .await;
        assert!(matches!(outcome, Outcome::Completed));
    }
}
