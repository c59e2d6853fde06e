//! The recovery job the orchestrator supervises.
//!
//! Seven steps, run in order, with a cancellation checkpoint before each:
//!
//! 1. scan the repository
//! 2. parse infrastructure and source files into components
//! 3. extract relationships
//! 4. enrich components and relationships
//! 5. build the knowledge graph
//! 6. render C4 diagrams
//! 7. export diagrams, graph and metrics
//!
//! Nothing is written until step 7, so a cancelled run leaves the output
//! directory untouched.

use crate::recovery::c4::C4Generator;
use crate::recovery::enrich::{Enricher, HeuristicEnricher};
use crate::recovery::export;
use crate::recovery::graph::KnowledgeGraph;
use crate::recovery::model::{Component, Relationship};
use crate::recovery::parsers::compose::ComposeFile;
use crate::recovery::parsers::kubernetes::{self, Resource};
use crate::recovery::parsers::python::PythonModule;
use crate::recovery::parsers::terraform::TerraformFile;
use crate::recovery::parsers::{dockerfile, merge_components};
use crate::recovery::relationships;
use crate::recovery::scanner::{self, IgnoreSet, RepositoryStructure};
use crate::runtime::constants::scan::IGNORE_PATTERNS;
use crate::runtime::options::OrchestratorOptions;
use crate::supervisor::Job;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const JOB_NAME: &str = "c4-recovery";

/// What a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub components: usize,
    pub relationships: usize,
    pub entry_points: Vec<String>,
    pub files: Vec<PathBuf>,
}

/// Everything step 2 extracted.
#[derive(Debug, Default)]
struct ParsedArtifacts {
    components: Vec<Component>,
    resources: Vec<Resource>,
    compose_files: Vec<ComposeFile>,
    python_modules: Vec<(String, PythonModule)>,
}

pub struct RecoveryJob {
    repo_path: PathBuf,
    output_dir: PathBuf,
    max_source_files: usize,
    ignore: IgnoreSet,
    system_name: String,
    enricher: Arc<dyn Enricher>,
}

impl RecoveryJob {
    pub fn new(options: &OrchestratorOptions) -> ArchlensResult<Self> {
        let system_name = options
            .repo_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "System".to_string());
        Ok(Self {
            repo_path: options.repo_path.clone(),
            output_dir: options.output_dir.clone(),
            max_source_files: options.max_source_files,
            ignore: ignore_set(&options.ignore_patterns),
            system_name,
            enricher: select_enricher(options)?,
        })
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> ArchlensResult<RecoveryReport> {
        checkpoint(cancel)?;
        tracing::info!(repo = %self.repo_path.display(), "Step 1: Scanning repository");
        let root = self.repo_path.clone();
        let ignore = self.ignore.clone();
        let structure = blocking(move || scanner::scan(&root, &ignore)).await?;

        checkpoint(cancel)?;
        tracing::info!("Step 2: Parsing infrastructure files");
        let max = self.max_source_files;
        let fallback = self.system_name.clone();
        let mut artifacts = blocking(move || Ok(parse_artifacts(&structure, max, &fallback))).await?;
        let components = merge_components(std::mem::take(&mut artifacts.components));

        checkpoint(cancel)?;
        tracing::info!("Step 3: Extracting relationships");
        let relationships = extract_relationships(&artifacts);

        checkpoint(cancel)?;
        tracing::info!(enricher = self.enricher.name(), "Step 4: Semantic enrichment");
        let mut component_contexts = Vec::with_capacity(components.len());
        for component in &components {
            checkpoint(cancel)?;
            component_contexts.push(self.enricher.enrich_component(component).await?);
        }
        let mut relationship_contexts = Vec::with_capacity(relationships.len());
        for relationship in &relationships {
            checkpoint(cancel)?;
            relationship_contexts.push(self.enricher.enrich_relationship(relationship).await?);
        }

        checkpoint(cancel)?;
        tracing::info!("Step 5: Building knowledge graph");
        let mut graph = KnowledgeGraph::new();
        for (component, context) in components.into_iter().zip(component_contexts) {
            graph.add_component(component, Some(context));
        }
        for (relationship, context) in relationships.into_iter().zip(relationship_contexts) {
            graph.add_relationship(relationship, Some(context));
        }

        checkpoint(cancel)?;
        tracing::info!("Step 6: Generating C4 diagrams");
        let diagrams = C4Generator::new(&graph, self.system_name.as_str()).generate_all();

        checkpoint(cancel)?;
        tracing::info!(output = %self.output_dir.display(), "Step 7: Exporting results");
        let mut files = export::write_diagrams(&self.output_dir, &diagrams)?;
        files.extend(export::write_results(&self.output_dir, &graph)?);

        let report = RecoveryReport {
            components: graph.node_count(),
            relationships: graph.edge_count(),
            entry_points: graph.entry_points(),
            files,
        };
        tracing::info!(
            components = report.components,
            relationships = report.relationships,
            output = %self.output_dir.display(),
            "C4 diagrams generated"
        );
        Ok(report)
    }
}

#[async_trait]
impl Job for RecoveryJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn run(&self, cancel: CancellationToken) -> ArchlensResult<()> {
        self.execute(&cancel).await.map(|_| ())
    }
}

fn select_enricher(options: &OrchestratorOptions) -> ArchlensResult<Arc<dyn Enricher>> {
    if options.skip_llm {
        return Ok(Arc::new(HeuristicEnricher));
    }
    #[cfg(feature = "llm")]
    {
        Ok(Arc::new(crate::recovery::enrich::ollama::OllamaEnricher::new(&options.llm)?))
    }
    #[cfg(not(feature = "llm"))]
    {
        tracing::warn!(
            base_url = %options.llm.base_url,
            "Built without the llm feature, using heuristic enrichment"
        );
        Ok(Arc::new(HeuristicEnricher))
    }
}

/// Built-in ignore patterns plus the configured extras.
fn ignore_set(extra: &[String]) -> IgnoreSet {
    let patterns: Vec<&str> = IGNORE_PATTERNS
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .collect();
    IgnoreSet::new(&patterns)
}

fn checkpoint(cancel: &CancellationToken) -> ArchlensResult<()> {
    if cancel.is_cancelled() {
        return Err(ArchlensError::Cancelled);
    }
    Ok(())
}

async fn blocking<T, F>(f: F) -> ArchlensResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ArchlensResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArchlensError::Internal(format!("blocking task failed: {}", e)))?
}

fn parse_artifacts(
    structure: &RepositoryStructure,
    max_source_files: usize,
    fallback_name: &str,
) -> ParsedArtifacts {
    let mut artifacts = ParsedArtifacts::default();

    for relative in &structure.dockerfiles {
        match dockerfile::parse_file(&structure.absolute(relative), relative, fallback_name) {
            Ok(component) => artifacts.components.push(component),
            Err(e) => tracing::warn!(file = %relative.display(), error = %e, "Failed to parse Dockerfile"),
        }
    }

    for relative in &structure.kubernetes_files {
        match read(structure, relative).and_then(|text| kubernetes::parse(&text)) {
            Ok(resources) => {
                artifacts.components.extend(kubernetes::components(&resources));
                artifacts.resources.extend(resources);
            }
            Err(e) => tracing::warn!(file = %relative.display(), error = %e, "Failed to parse Kubernetes manifest"),
        }
    }

    for relative in &structure.compose_files {
        match read(structure, relative).and_then(|text| ComposeFile::parse(&text)) {
            Ok(file) => {
                artifacts.components.extend(file.components());
                artifacts.compose_files.push(file);
            }
            Err(e) => tracing::warn!(file = %relative.display(), error = %e, "Failed to parse compose file"),
        }
    }

    for relative in &structure.terraform_files {
        match read(structure, relative).and_then(|text| TerraformFile::parse(&text)) {
            Ok(file) => artifacts
                .components
                .extend(file.components(&relative.display().to_string())),
            Err(e) => tracing::warn!(file = %relative.display(), error = %e, "Failed to parse Terraform file"),
        }
    }

    let service_dirs: Vec<(PathBuf, String)> = artifacts
        .components
        .iter()
        .filter_map(|c| {
            let source = c.metadata.get("source")?.as_str()?;
            let dir = Path::new(source).parent()?;
            (!dir.as_os_str().is_empty()).then(|| (dir.to_path_buf(), c.name.clone()))
        })
        .collect();

    let python_files = structure.source_files_for("python");
    if python_files.len() > max_source_files {
        tracing::info!(
            total = python_files.len(),
            limit = max_source_files,
            "Limiting Python source analysis"
        );
    }
    for relative in python_files.iter().take(max_source_files) {
        match read(structure, relative) {
            Ok(text) => {
                let module = PythonModule::parse(&text);
                let owner = owner_for(relative, &service_dirs, fallback_name);
                artifacts
                    .components
                    .extend(module.components(&owner, &relative.display().to_string()));
                artifacts.python_modules.push((owner, module));
            }
            Err(e) => tracing::warn!(file = %relative.display(), error = %e, "Failed to read source file"),
        }
    }

    tracing::info!(components = artifacts.components.len(), "Artifacts parsed");
    artifacts
}

fn extract_relationships(artifacts: &ParsedArtifacts) -> Vec<Relationship> {
    let mut all = Vec::new();
    for (owner, module) in &artifacts.python_modules {
        all.extend(module.relationships(owner));
    }
    all.extend(relationships::kubernetes_routes(&artifacts.resources));
    for file in &artifacts.compose_files {
        all.extend(relationships::compose_dependencies(file));
    }
    let all = relationships::dedupe(all);
    tracing::info!(relationships = all.len(), "Relationships extracted");
    all
}

/// Service a source file belongs to: the deepest Dockerfile directory above
/// it, else its top-level directory, else `fallback`.
fn owner_for(relative: &Path, service_dirs: &[(PathBuf, String)], fallback: &str) -> String {
    if let Some((_, name)) = service_dirs
        .iter()
        .filter(|(dir, _)| relative.starts_with(dir))
        .max_by_key(|(dir, _)| dir.components().count())
    {
        return name.clone();
    }
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(first), Some(_)) => first.as_os_str().to_string_lossy().to_string(),
        _ => fallback.to_string(),
    }
}

fn read(structure: &RepositoryStructure, relative: &Path) -> ArchlensResult<String> {
    let path = structure.absolute(relative);
    std::fs::read_to_string(&path)
        .map_err(|e| ArchlensError::Storage(format!("failed to read {}: {}", path.display(), e)))
}
