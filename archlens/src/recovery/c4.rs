//! C4 diagrams rendered as C4-PlantUML.
//!
//! Three levels are produced from the knowledge graph:
//!
//! - context: the system, external systems and, when an entry point faces
//!   users, a person
//! - container: services, data stores, queues and frontends with the edges
//!   between them
//! - component: one per service, the service inside its boundary with its
//!   direct dependencies around it

use crate::recovery::graph::{GraphNode, KnowledgeGraph};
use crate::recovery::model::ComponentType;
use std::collections::{HashMap, HashSet};

const INCLUDE_BASE: &str = "https://raw.githubusercontent.com/plantuml-stdlib/C4-PlantUML/master";

/// Aliases the context diagram uses for itself.
const RESERVED_ALIASES: [&str; 2] = ["system", "user"];

/// A rendered diagram and the file it belongs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagram {
    pub file_name: String,
    pub content: String,
}

pub struct C4Generator<'a> {
    graph: &'a KnowledgeGraph,
    system_name: String,
    /// Node id to PlantUML alias, unique within the graph.
    aliases: HashMap<String, String>,
}

impl<'a> C4Generator<'a> {
    pub fn new(graph: &'a KnowledgeGraph, system_name: impl Into<String>) -> Self {
        Self {
            graph,
            system_name: system_name.into(),
            aliases: unique_aliases(graph),
        }
    }

    fn alias_of(&self, id: &str) -> String {
        self.aliases.get(id).cloned().unwrap_or_else(|| alias(id))
    }

    pub fn context_diagram(&self) -> String {
        let mut lines = header("C4_Context");
        lines.push(format!(
            "System(system, \"{}\", \"The main system\")",
            escape(&self.system_name)
        ));

        let externals: Vec<&GraphNode> = self
            .graph
            .nodes()
            .filter(|n| n.component.as_ref().is_some_and(|c| c.is_external()))
            .collect();
        for node in &externals {
            lines.push(format!(
                "System_Ext({}, \"{}\", \"{}\")",
                self.alias_of(&node.id),
                escape(&node.id),
                escape(node.purpose())
            ));
        }

        let has_users = self.graph.entry_points().iter().any(|id| {
            self.graph
                .node(id)
                .and_then(GraphNode::component_type)
                .is_some_and(|t| t.is_user_facing())
        });
        if has_users {
            lines.push("Person(user, \"User\", \"System user\")".to_string());
        }

        lines.push(String::new());
        for node in &externals {
            lines.push(format!("Rel(system, {}, \"Uses\")", self.alias_of(&node.id)));
        }
        if has_users {
            lines.push("Rel(user, system, \"Uses\")".to_string());
        }
        footer(lines)
    }

    pub fn container_diagram(&self) -> String {
        let mut lines = header("C4_Container");
        let containers = self.containers();
        for node in &containers {
            lines.push(self.element(container_macro(node), node));
        }
        lines.push(String::new());
        lines.extend(self.relations_within(&containers, true));
        footer(lines)
    }

    /// Component view of one container; `None` if `id` is not a container.
    pub fn component_diagram(&self, id: &str) -> Option<String> {
        let node = self.graph.node(id)?;
        node.component_type().filter(|t| t.is_c4_container())?;

        let mut lines = header("C4_Component");
        lines.push(format!(
            "Container_Boundary({}_boundary, \"{}\") {{",
            self.alias_of(id),
            escape(id)
        ));
        lines.push(format!("  {}", self.element("Component", node)));
        lines.push("}".to_string());

        let mut members = vec![node];
        for edge in self.graph.edges_from(id) {
            let Some(target) = self.graph.node(&edge.relationship.target) else {
                continue;
            };
            if members.iter().any(|m| m.id == target.id) {
                continue;
            }
            lines.push(self.element(container_macro(target), target));
            members.push(target);
        }

        lines.push(String::new());
        lines.extend(self.relations_within(&members, false));
        Some(footer(lines))
    }

    /// Every diagram: context, container, and one component view per service.
    pub fn generate_all(&self) -> Vec<Diagram> {
        let mut diagrams = vec![
            Diagram {
                file_name: "context.puml".to_string(),
                content: self.context_diagram(),
            },
            Diagram {
                file_name: "container.puml".to_string(),
                content: self.container_diagram(),
            },
        ];
        for node in self.containers() {
            if node.component_type() != Some(ComponentType::Service) {
                continue;
            }
            if let Some(content) = self.component_diagram(&node.id) {
                diagrams.push(Diagram {
                    file_name: format!("component_{}.puml", self.alias_of(&node.id)),
                    content,
                });
            }
        }
        diagrams
    }

    fn containers(&self) -> Vec<&'a GraphNode> {
        self.graph
            .nodes()
            .filter(|n| n.component_type().is_some_and(|t| t.is_c4_container()))
            .collect()
    }

    fn relations_within(&self, members: &[&GraphNode], with_technology: bool) -> Vec<String> {
        let contains = |id: &str| members.iter().any(|m| m.id == id);
        self.graph
            .edges()
            .filter(|e| contains(&e.relationship.source) && contains(&e.relationship.target))
            .map(|e| {
                let r = &e.relationship;
                if with_technology && !r.protocol.is_empty() {
                    format!(
                        "Rel({}, {}, \"{}\", \"{}\")",
                        self.alias_of(&r.source),
                        self.alias_of(&r.target),
                        escape(&r.description),
                        escape(&r.protocol)
                    )
                } else {
                    format!(
                        "Rel({}, {}, \"{}\")",
                        self.alias_of(&r.source),
                        self.alias_of(&r.target),
                        escape(&r.description)
                    )
                }
            })
            .collect()
    }

    fn element(&self, macro_name: &str, node: &GraphNode) -> String {
        format!(
            "{}({}, \"{}\", \"{}\", \"{}\")",
            macro_name,
            self.alias_of(&node.id),
            escape(&node.id),
            escape(node.technology()),
            escape(node.purpose())
        )
    }
}

/// Assign aliases in node order; a clash gets the first free `_<n>` suffix.
fn unique_aliases(graph: &KnowledgeGraph) -> HashMap<String, String> {
    let mut taken: HashSet<String> = RESERVED_ALIASES.iter().map(|a| a.to_string()).collect();
    let mut aliases = HashMap::new();
    for node in graph.nodes() {
        let base = alias(&node.id);
        let mut candidate = base.clone();
        let mut n = 2;
        while !taken.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        aliases.insert(node.id.clone(), candidate);
    }
    aliases
}

fn container_macro(node: &GraphNode) -> &'static str {
    match node.component_type() {
        Some(ComponentType::Database | ComponentType::Cache) => "ContainerDb",
        Some(ComponentType::Queue) => "ContainerQueue",
        _ => "Container",
    }
}

fn header(library: &str) -> Vec<String> {
    vec![
        "@startuml".to_string(),
        format!("!include {}/{}.puml", INCLUDE_BASE, library),
        String::new(),
        "LAYOUT_WITH_LEGEND()".to_string(),
        String::new(),
    ]
}

fn footer(mut lines: Vec<String>) -> String {
    lines.push("@enduml".to_string());
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// PlantUML identifier for a component name.
pub fn alias(id: &str) -> String {
    let mut out: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn escape(text: &str) -> String {
    text.replace('"', "'").replace('\n', " ")
}
