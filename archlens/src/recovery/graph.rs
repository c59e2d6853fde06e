//! Knowledge graph of components and their relationships.
//!
//! A directed graph keyed by component name. Edges may name components that
//! were never parsed (an HTTP call to an external host, a compose link to a
//! service defined elsewhere); those endpoints become bare nodes.

use crate::recovery::model::{
    Component, ComponentType, Relationship, RelationshipContext, SemanticContext,
};
use petgraph::Direction;
use petgraph::algo::page_rank;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{Bfs, EdgeRef};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

const DAMPING: f64 = 0.85;
const RANK_ITERATIONS: usize = 100;

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub component: Option<Component>,
    pub context: Option<SemanticContext>,
}

impl GraphNode {
    pub fn component_type(&self) -> Option<ComponentType> {
        self.component.as_ref().map(|c| c.component_type)
    }

    pub fn purpose(&self) -> &str {
        self.context.as_ref().map(|c| c.purpose.as_str()).unwrap_or_default()
    }

    pub fn technology(&self) -> &str {
        self.component
            .as_ref()
            .map(|c| c.technology.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub relationship: Relationship,
    pub context: Option<RelationshipContext>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    /// Component name to node index.
    index: HashMap<String, NodeIndex>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or fill in the node for `component`.
    pub fn add_component(&mut self, component: Component, context: Option<SemanticContext>) {
        let idx = self.ensure_node(&component.name);
        let node = &mut self.graph[idx];
        node.component = Some(component);
        if context.is_some() {
            node.context = context;
        }
    }

    /// Add an edge; unknown endpoints become bare nodes. Repeated
    /// (source, target, kind) triples are kept once.
    pub fn add_relationship(&mut self, relationship: Relationship, context: Option<RelationshipContext>) {
        let source = self.ensure_node(&relationship.source);
        let target = self.ensure_node(&relationship.target);
        let duplicate = self
            .graph
            .edges_connecting(source, target)
            .any(|e| e.weight().relationship.kind == relationship.kind);
        if duplicate {
            return;
        }
        self.graph.add_edge(
            source,
            target,
            GraphEdge {
                relationship,
                context,
            },
        );
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            id: id.to_string(),
            component: None,
            context: None,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.graph.edge_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.graph[i])
    }

    /// Outgoing edges of `id`, in insertion order.
    pub fn edges_from(&self, id: &str) -> Vec<&GraphEdge> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.id(), e.weight()))
            .collect();
        edges.sort_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, w)| w).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes nothing points at, in insertion order.
    pub fn entry_points(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter(|&i| {
                self.graph
                    .neighbors_directed(i, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|i| self.graph[i].id.clone())
            .collect()
    }

    pub fn data_stores(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.component_type().is_some_and(|t| t.is_data_store()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// PageRank over the directed graph, parallel edges counted once.
    ///
    /// Scores sum to 1.
    pub fn criticality(&self) -> BTreeMap<String, f64> {
        let mut simple: DiGraph<(), ()> = DiGraph::with_capacity(self.node_count(), self.edge_count());
        for _ in self.graph.node_indices() {
            simple.add_node(());
        }
        for edge in self.graph.raw_edges() {
            simple.update_edge(edge.source(), edge.target(), ());
        }

        page_rank(&simple, DAMPING, RANK_ITERATIONS)
            .into_iter()
            .zip(self.nodes())
            .map(|(score, node)| (node.id.clone(), score))
            .collect()
    }

    /// Weakly connected components, largest first.
    pub fn subsystems(&self) -> Vec<BTreeSet<String>> {
        let mut sets = UnionFind::<usize>::new(self.node_count());
        for edge in self.graph.raw_edges() {
            sets.union(edge.source().index(), edge.target().index());
        }

        let mut groups: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        for (i, label) in sets.into_labeling().into_iter().enumerate() {
            groups
                .entry(label)
                .or_default()
                .insert(self.graph[NodeIndex::new(i)].id.clone());
        }

        let mut groups: Vec<_> = groups.into_values().collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        groups
    }

    /// Everything reachable from `id`, sorted; empty for unknown nodes.
    pub fn dependency_chain(&self, id: &str) -> Vec<String> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = BTreeSet::new();
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                found.insert(self.graph[idx].id.clone());
            }
        }
        found.into_iter().collect()
    }

    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self
                .nodes()
                .map(|n| NodeDocument {
                    id: n.id.clone(),
                    node_type: n.component_type().map(|t| t.as_str()).unwrap_or("unknown"),
                    properties: NodeProperties {
                        technology: n.technology().to_string(),
                        ports: n.component.as_ref().map(|c| c.exposed_ports.clone()).unwrap_or_default(),
                        env_vars: n.component.as_ref().map(|c| c.environment.clone()).unwrap_or_default(),
                        endpoints: n.component.as_ref().map(|c| c.endpoints.clone()).unwrap_or_default(),
                        tags: n.component.as_ref().map(|c| c.tags.clone()).unwrap_or_default(),
                        metadata: n.component.as_ref().map(|c| c.metadata.clone()).unwrap_or_default(),
                    },
                    semantic_context: ContextDocument {
                        purpose: n.purpose().to_string(),
                        business_capability: n
                            .context
                            .as_ref()
                            .map(|c| c.business_capability.clone())
                            .unwrap_or_default(),
                    },
                })
                .collect(),
            edges: self
                .edges()
                .map(|e| EdgeDocument {
                    source: e.relationship.source.clone(),
                    target: e.relationship.target.clone(),
                    edge_type: e.relationship.kind.as_str(),
                    properties: EdgeProperties {
                        protocol: e.relationship.protocol.clone(),
                        description: e.relationship.description.clone(),
                        semantic: e.context.clone(),
                    },
                })
                .collect(),
        }
    }
}

/// Serialized form of the graph (`knowledge_graph.json`).
#[derive(Debug, Serialize)]
pub struct GraphDocument {
    pub nodes: Vec<NodeDocument>,
    pub edges: Vec<EdgeDocument>,
}

#[derive(Debug, Serialize)]
pub struct NodeDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: &'static str,
    pub properties: NodeProperties,
    pub semantic_context: ContextDocument,
}

#[derive(Debug, Serialize)]
pub struct NodeProperties {
    pub technology: String,
    pub ports: Vec<u16>,
    pub env_vars: BTreeMap<String, String>,
    pub endpoints: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ContextDocument {
    pub purpose: String,
    pub business_capability: String,
}

#[derive(Debug, Serialize)]
pub struct EdgeDocument {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: &'static str,
    pub properties: EdgeProperties,
}

#[derive(Debug, Serialize)]
pub struct EdgeProperties {
    pub protocol: String,
    pub description: String,
    #[serde(flatten)]
    pub semantic: Option<RelationshipContext>,
}
