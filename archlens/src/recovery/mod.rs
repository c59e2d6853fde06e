//! C4 architecture recovery.
//!
//! Reads a repository's infrastructure artifacts and sources and produces
//! C4-PlantUML diagrams plus a JSON knowledge graph. [`RecoveryJob`] runs
//! the whole sequence and is what the orchestrator supervises.

pub mod c4;
pub mod enrich;
pub mod export;
pub mod graph;
pub mod job;
pub mod model;
pub mod parsers;
pub mod relationships;
pub mod scanner;

pub use c4::{C4Generator, Diagram};
pub use enrich::{Enricher, HeuristicEnricher};
pub use graph::KnowledgeGraph;
pub use job::{RecoveryJob, RecoveryReport};
pub use model::{Component, ComponentType, Relationship, RelationshipKind, SemanticContext};
pub use scanner::{IgnoreSet, RepositoryStructure};
