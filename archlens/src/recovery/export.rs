//! Result export.
//!
//! Files are written to a temporary name and renamed into place, so an
//! interrupted export never leaves a truncated file behind.

use crate::recovery::c4::Diagram;
use crate::recovery::graph::KnowledgeGraph;
use crate::runtime::constants::filenames;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Contents of `metrics.json`.
#[derive(Debug, Serialize)]
pub struct Metrics {
    pub component_criticality: BTreeMap<String, f64>,
    pub subsystems: Vec<BTreeSet<String>>,
    pub entry_points: Vec<String>,
    pub data_stores: Vec<String>,
}

impl Metrics {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        Self {
            component_criticality: graph.criticality(),
            subsystems: graph.subsystems(),
            entry_points: graph.entry_points(),
            data_stores: graph.data_stores(),
        }
    }
}

pub fn write_diagrams(output_dir: &Path, diagrams: &[Diagram]) -> ArchlensResult<Vec<PathBuf>> {
    ensure_dir(output_dir)?;
    diagrams
        .iter()
        .map(|d| {
            let path = output_dir.join(&d.file_name);
            write_atomic(&path, d.content.as_bytes())?;
            Ok(path)
        })
        .collect()
}

/// Write `knowledge_graph.json` and `metrics.json`.
pub fn write_results(output_dir: &Path, graph: &KnowledgeGraph) -> ArchlensResult<Vec<PathBuf>> {
    ensure_dir(output_dir)?;

    let graph_path = output_dir.join(filenames::KNOWLEDGE_GRAPH);
    let graph_json = serde_json::to_vec_pretty(&graph.to_document())?;
    write_atomic(&graph_path, &graph_json)?;

    let metrics_path = output_dir.join(filenames::METRICS);
    let metrics_json = serde_json::to_vec_pretty(&Metrics::from_graph(graph))?;
    write_atomic(&metrics_path, &metrics_json)?;

    Ok(vec![graph_path, metrics_path])
}

fn ensure_dir(dir: &Path) -> ArchlensResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        ArchlensError::Storage(format!(
            "failed to create output directory {}: {}",
            dir.display(),
            e
        ))
    })
}

fn write_atomic(path: &Path, contents: &[u8]) -> ArchlensResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            ArchlensError::Storage(format!("failed to write {}: {}", path.display(), e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::model::{Component, ComponentType, Relationship, RelationshipKind};

    #[test]
    fn test_write_results() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let mut g = KnowledgeGraph::new();
        g.add_component(Component::new("api", ComponentType::Service, "python"), None);
        g.add_component(Component::new("db", ComponentType::Database, "postgresql"), None);
        g.add_relationship(
            Relationship::new("api", "db", RelationshipKind::DependsOn, "docker", "Service dependency"),
            None,
        );

        let written = write_results(&out, &g).unwrap();
        assert_eq!(written.len(), 2);

        let metrics: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("metrics.json")).unwrap()).unwrap();
        assert_eq!(metrics["entry_points"], serde_json::json!(["api"]));
        assert_eq!(metrics["data_stores"], serde_json::json!(["db"]));
        assert_eq!(metrics["subsystems"], serde_json::json!([["api", "db"]]));
        assert!(metrics["component_criticality"]["db"].as_f64().unwrap() > 0.0);

        let graph: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("knowledge_graph.json")).unwrap()).unwrap();
        assert_eq!(graph["nodes"].as_array().unwrap().len(), 2);
        assert!(!out.join("metrics.json.tmp").exists());
    }

    #[test]
    fn test_write_diagrams() {
        let tmp = tempfile::TempDir::new().unwrap();
        let diagrams = vec![Diagram {
            file_name: "context.puml".into(),
            content: "@startuml\n@enduml\n".into(),
        }];
        let paths = write_diagrams(tmp.path(), &diagrams).unwrap();
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "@startuml\n@enduml\n");
    }
}
