//! Semantic enrichment.
//!
//! An [`Enricher`] explains what each component and relationship is for.
//! [`HeuristicEnricher`] works offline from type and technology; the
//! `llm` feature adds [`OllamaEnricher`](ollama::OllamaEnricher), which
//! asks a local model and falls back to the heuristic on any error.

#[cfg(feature = "llm")]
pub mod ollama;

use crate::recovery::model::{
    Component, ComponentType, Relationship, RelationshipContext, SemanticContext,
};
use archlens_shared::errors::ArchlensResult;
use async_trait::async_trait;

#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    async fn enrich_component(&self, component: &Component) -> ArchlensResult<SemanticContext>;

    async fn enrich_relationship(
        &self,
        relationship: &Relationship,
    ) -> ArchlensResult<RelationshipContext>;
}

/// Rule-based enrichment from component type and technology.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEnricher;

impl HeuristicEnricher {
    pub fn component_context(component: &Component) -> SemanticContext {
        let (purpose, capability, responsibilities): (String, &str, &[&str]) =
            match component.component_type {
                ComponentType::Database => (
                    format!("Stores persistent data ({})", component.technology),
                    "Data management",
                    &["Persist records", "Serve queries"],
                ),
                ComponentType::Cache => (
                    format!("Caches hot data ({})", component.technology),
                    "Performance",
                    &["Serve cached reads", "Expire stale entries"],
                ),
                ComponentType::Queue => (
                    format!("Brokers asynchronous messages ({})", component.technology),
                    "Integration",
                    &["Buffer messages", "Decouple producers from consumers"],
                ),
                ComponentType::Storage => (
                    format!("Stores objects and files ({})", component.technology),
                    "Data management",
                    &["Store blobs"],
                ),
                ComponentType::Ingress | ComponentType::ApiGateway => (
                    "Routes external traffic into the system".to_string(),
                    "Edge access",
                    &["Terminate client connections", "Route requests to services"],
                ),
                ComponentType::Frontend => (
                    "Serves the user interface".to_string(),
                    "User experience",
                    &["Render pages", "Call backend APIs"],
                ),
                ComponentType::Infrastructure => (
                    format!("Provisions cloud infrastructure ({})", component.technology),
                    "Platform",
                    &["Provision resources"],
                ),
                ComponentType::Service | ComponentType::Container => (
                    format!("Component: {}", component.component_type),
                    "Unknown",
                    &[],
                ),
            };

        SemanticContext {
            purpose,
            business_capability: capability.to_string(),
            responsibilities: responsibilities.iter().map(|r| r.to_string()).collect(),
            technology_stack: vec![component.technology.clone()],
        }
    }

    pub fn relationship_context(relationship: &Relationship) -> RelationshipContext {
        RelationshipContext {
            relationship_type: relationship.kind.as_str().to_string(),
            protocol: relationship.protocol.clone(),
            purpose: relationship.description.clone(),
            direction: "unidirectional".to_string(),
        }
    }
}

#[async_trait]
impl Enricher for HeuristicEnricher {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn enrich_component(&self, component: &Component) -> ArchlensResult<SemanticContext> {
        Ok(Self::component_context(component))
    }

    async fn enrich_relationship(
        &self,
        relationship: &Relationship,
    ) -> ArchlensResult<RelationshipContext> {
        Ok(Self::relationship_context(relationship))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::model::RelationshipKind;

    #[tokio::test]
    async fn test_heuristic_contexts() {
        let db = Component::new("orders-db", ComponentType::Database, "postgresql");
        let ctx = HeuristicEnricher.enrich_component(&db).await.unwrap();
        assert_eq!(ctx.purpose, "Stores persistent data (postgresql)");
        assert_eq!(ctx.business_capability, "Data management");
        assert_eq!(ctx.technology_stack, vec!["postgresql"]);

        let svc = Component::new("api", ComponentType::Service, "python");
        let ctx = HeuristicEnricher.enrich_component(&svc).await.unwrap();
        assert_eq!(ctx.purpose, "Component: service");
        assert_eq!(ctx.business_capability, "Unknown");
    }

    #[tokio::test]
    async fn test_relationship_context_mirrors_edge() {
        let rel = Relationship::new("web", "api", RelationshipKind::DependsOn, "docker", "Service dependency");
        let ctx = HeuristicEnricher.enrich_relationship(&rel).await.unwrap();
        assert_eq!(ctx.protocol, "docker");
        assert_eq!(ctx.purpose, "Service dependency");
        assert_eq!(ctx.relationship_type, "depends_on");
        assert_eq!(ctx.direction, "unidirectional");
    }
}
