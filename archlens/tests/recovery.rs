//! Recovery job against a sample multi-service repository.

use std::sync::Arc;

use archlens::recovery::{HeuristicEnricher, RecoveryJob};
use archlens::runtime::OrchestratorOptions;
use archlens::ArchlensError;
use archlens_test_utils::SampleRepo;
use tokio_util::sync::CancellationToken;

fn options(repo: &SampleRepo) -> OrchestratorOptions {
    OrchestratorOptions {
        repo_path: repo.root(),
        output_dir: repo.output(),
        skip_llm: true,
        ..Default::default()
    }
}

fn read_json(path: std::path::PathBuf) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_recovers_architecture_from_sample_repo() {
    let repo = SampleRepo::new();
    let job = RecoveryJob::new(&options(&repo)).unwrap();

    let report = job.execute(&CancellationToken::new()).await.unwrap();
    let out = repo.output();

    for file in ["context.puml", "container.puml", "component_api.puml", "knowledge_graph.json", "metrics.json"] {
        assert!(out.join(file).is_file(), "missing {file}");
    }
    assert!(report.files.iter().all(|f| f.is_file()));
    assert!(report.files.contains(&out.join("component_worker.puml")));

    let graph = read_json(out.join("knowledge_graph.json"));
    let ids: Vec<&str> = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap())
        .collect();
    for id in ["api", "worker", "db", "cache", "api-svc", "shop-ingress", "postgresql", "redis", "assets", "network"] {
        assert!(ids.contains(&id), "missing node {id} in {ids:?}");
    }
    // node_modules is ignored
    assert!(!ids.contains(&"left-pad"));
    assert_eq!(report.components, ids.len());

    let edges: Vec<(String, String, String)> = graph["edges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| {
            (
                e["source"].as_str().unwrap().to_string(),
                e["target"].as_str().unwrap().to_string(),
                e["type"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    let has = |s: &str, t: &str, k: &str| edges.iter().any(|e| e.0 == s && e.1 == t && e.2 == k);
    assert!(has("api", "worker", "calls"), "{edges:?}");
    assert!(has("api-svc", "api", "routes_to"), "{edges:?}");
    assert!(has("api", "db", "depends_on"), "{edges:?}");
    assert!(has("worker", "cache", "depends_on"), "{edges:?}");

    let api = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["id"] == "api")
        .unwrap();
    assert_eq!(api["type"], "service");
    assert_eq!(api["properties"]["metadata"]["framework"], "flask");

    // Terraform resources and modules
    let node_type = |id: &str| {
        graph["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["id"] == id)
            .map(|n| n["type"].clone())
    };
    assert_eq!(node_type("assets"), Some(serde_json::json!("storage")));
    assert_eq!(node_type("network"), Some(serde_json::json!("infrastructure")));

    let metrics = read_json(out.join("metrics.json"));
    let stores: Vec<&str> = metrics["data_stores"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert!(stores.contains(&"db"));
    assert!(stores.contains(&"cache"));
    assert!(stores.contains(&"assets"));
    assert!(metrics["entry_points"].as_array().unwrap().contains(&serde_json::json!("api-svc")));

    let container = std::fs::read_to_string(out.join("container.puml")).unwrap();
    assert!(container.starts_with("@startuml\n"));
    assert!(container.contains("ContainerDb(db, \"db\""));
    assert!(container.contains("Rel(api, worker, \"HTTP call\", \"http\")"));
    assert!(container.ends_with("@enduml\n"));
}

#[tokio::test]
async fn test_cancelled_recovery_writes_nothing() {
    let repo = SampleRepo::new();
    let job = RecoveryJob::new(&options(&repo))
        .unwrap()
        .with_enricher(Arc::new(HeuristicEnricher));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = job.execute(&cancel).await.unwrap_err();
    assert!(matches!(err, ArchlensError::Cancelled));
    assert!(!repo.output().exists());
}

#[tokio::test]
async fn test_missing_repository_is_config_error() {
    let repo = SampleRepo::new();
    let mut opts = options(&repo);
    opts.repo_path = repo.root().join("does-not-exist");

    let err = RecoveryJob::new(&opts)
        .unwrap()
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
