//! Architecture model shared by the recovery steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role a component plays in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// A built container image (Dockerfile).
    Container,
    Service,
    Database,
    Cache,
    Queue,
    Storage,
    Frontend,
    ApiGateway,
    Ingress,
    /// A Terraform module or other provisioning unit.
    Infrastructure,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Service => "service",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Queue => "queue",
            Self::Storage => "storage",
            Self::Frontend => "frontend",
            Self::ApiGateway => "api_gateway",
            Self::Ingress => "ingress",
            Self::Infrastructure => "infrastructure",
        }
    }

    pub fn is_data_store(&self) -> bool {
        matches!(self, Self::Database | Self::Cache | Self::Storage)
    }

    /// Types that show up on the C4 container diagram.
    pub fn is_c4_container(&self) -> bool {
        matches!(
            self,
            Self::Service | Self::Database | Self::Cache | Self::Queue | Self::Frontend
        )
    }

    /// Types through which users reach the system.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Frontend | Self::ApiGateway | Self::Ingress)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something discovered in the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub technology: String,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form details from the artifact (kind, namespace, image, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        component_type: ComponentType,
        technology: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            component_type,
            technology: technology.into(),
            exposed_ports: Vec::new(),
            environment: BTreeMap::new(),
            endpoints: Vec::new(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_external(&self) -> bool {
        self.tags.iter().any(|t| t == "external")
    }
}

/// How two components are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    RoutesTo,
    DependsOn,
    LinksTo,
    Calls,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoutesTo => "routes_to",
            Self::DependsOn => "depends_on",
            Self::LinksTo => "links_to",
            Self::Calls => "calls",
        }
    }
}

/// A directed edge between two components, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    pub protocol: String,
    pub description: String,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        kind: RelationshipKind,
        protocol: &str,
        description: &str,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            protocol: protocol.to_string(),
            description: description.to_string(),
        }
    }
}

/// What a component is for, as judged by an enricher.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SemanticContext {
    pub purpose: String,
    pub business_capability: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub technology_stack: Vec<String>,
}

/// Semantic reading of a relationship.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipContext {
    /// `sync` or `async`.
    pub relationship_type: String,
    pub protocol: String,
    pub purpose: String,
    /// `unidirectional` or `bidirectional`.
    pub direction: String,
}
