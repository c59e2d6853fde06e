//! The supervisor driving the real recovery job.

use std::sync::Arc;
use std::time::Duration;

use archlens::recovery::RecoveryJob;
use archlens::runtime::OrchestratorOptions;
use archlens::supervisor::{Outcome, ShutdownSignal, Supervisor};
use archlens_test_utils::SampleRepo;
use tokio::sync::mpsc;

fn job(repo: &SampleRepo) -> Arc<RecoveryJob> {
    let options = OrchestratorOptions {
        repo_path: repo.root(),
        output_dir: repo.output(),
        skip_llm: true,
        ..Default::default()
    };
    Arc::new(RecoveryJob::new(&options).unwrap())
}

#[tokio::test]
async fn test_completed_recovery_exits_zero() {
    let repo = SampleRepo::new();
    let (_tx, rx) = mpsc::unbounded_channel();

    let outcome = Supervisor::new(Duration::from_secs(5))
        .run_with_signals(job(&repo), rx)
        .await;

    assert!(matches!(outcome, Outcome::Completed), "{outcome:?}");
    assert_eq!(outcome.exit_code(), 0);
    assert!(repo.output().join("context.puml").is_file());
}

#[tokio::test]
async fn test_sigterm_before_work_stops_with_143() {
    let repo = SampleRepo::new();
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(ShutdownSignal::Terminate).unwrap();

    let outcome = Supervisor::new(Duration::from_secs(5))
        .run_with_signals(job(&repo), rx)
        .await;

    // The signal may race a fast job; either way nothing half-written remains
    match outcome {
        Outcome::Stopped(ShutdownSignal::Terminate) => {
            assert_eq!(outcome.exit_code(), 143);
            assert!(!repo.output().join("metrics.json.tmp").exists());
        }
        Outcome::Completed => assert!(repo.output().join("metrics.json").is_file()),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_repository_exits_two() {
    let repo = SampleRepo::new();
    let options = OrchestratorOptions {
        repo_path: repo.root().join("missing"),
        output_dir: repo.output(),
        skip_llm: true,
        ..Default::default()
    };
    let (_tx, rx) = mpsc::unbounded_channel();

    let outcome = Supervisor::new(Duration::from_secs(5))
        .run_with_signals(Arc::new(RecoveryJob::new(&options).unwrap()), rx)
        .await;
    assert_eq!(outcome.exit_code(), 2);
}
