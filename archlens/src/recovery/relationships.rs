//! Relationship extraction from parsed artifacts.

use crate::recovery::model::{Relationship, RelationshipKind};
use crate::recovery::parsers::compose::ComposeFile;
use crate::recovery::parsers::kubernetes::Resource;

/// Service → Deployment edges where the Service selector is a subset of the
/// Deployment's pod template labels.
///
/// A Service without a selector routes to nothing.
pub fn kubernetes_routes(resources: &[Resource]) -> Vec<Relationship> {
    let deployments: Vec<_> = resources
        .iter()
        .filter(|r| r.kind == "Deployment")
        .map(|r| (r.name.as_str(), r.template_labels()))
        .collect();

    let mut relationships = Vec::new();
    for service in resources.iter().filter(|r| r.kind == "Service") {
        let selector = service.selector();
        if selector.is_empty() {
            continue;
        }
        for (deployment, labels) in &deployments {
            if selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                relationships.push(Relationship::new(
                    service.name.as_str(),
                    *deployment,
                    RelationshipKind::RoutesTo,
                    "kubernetes",
                    "Service routes traffic to deployment",
                ));
            }
        }
    }
    relationships
}

/// `depends_on` and `links` edges of a compose file.
pub fn compose_dependencies(file: &ComposeFile) -> Vec<Relationship> {
    let mut relationships = Vec::new();
    for service in &file.services {
        for dependency in &service.depends_on {
            relationships.push(Relationship::new(
                service.name.as_str(),
                dependency.as_str(),
                RelationshipKind::DependsOn,
                "docker",
                "Service dependency",
            ));
        }
        for link in &service.links {
            relationships.push(Relationship::new(
                service.name.as_str(),
                link.as_str(),
                RelationshipKind::LinksTo,
                "docker",
                "Network link",
            ));
        }
    }
    relationships
}

/// Drop repeated (source, target, kind) edges, keeping the first.
pub fn dedupe(relationships: Vec<Relationship>) -> Vec<Relationship> {
    let mut seen = std::collections::HashSet::new();
    relationships
        .into_iter()
        .filter(|r| seen.insert((r.source.clone(), r.target.clone(), r.kind)))
        .collect()
}
