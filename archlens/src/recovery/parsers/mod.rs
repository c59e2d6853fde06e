//! Artifact parsers.
//!
//! Each parser turns one file into components. Parsers do not touch the
//! filesystem beyond reading the file they are given; the recovery job
//! decides which files to feed them and logs failures per file.

pub mod compose;
pub mod dockerfile;
pub mod kubernetes;
pub mod python;
pub mod terraform;

use crate::recovery::model::{Component, ComponentType};

/// Image-name fragment → technology, checked in order.
const TECHNOLOGIES: &[(&str, &str)] = &[
    ("python", "python"),
    ("node", "nodejs"),
    ("openjdk", "java"),
    ("golang", "go"),
    ("nginx", "nginx"),
    ("postgres", "postgresql"),
    ("mongo", "mongodb"),
    ("redis", "redis"),
    ("mysql", "mysql"),
    ("mariadb", "mariadb"),
    ("rabbitmq", "rabbitmq"),
    ("kafka", "kafka"),
];

/// Technology of an image reference, `unknown` if unrecognized.
pub fn detect_technology(image: &str) -> &'static str {
    let image = image.to_ascii_lowercase();
    TECHNOLOGIES
        .iter()
        .find(|(key, _)| image.contains(key))
        .map(|(_, tech)| *tech)
        .unwrap_or("unknown")
}

/// Component type implied by a technology.
pub fn type_for_technology(technology: &str) -> ComponentType {
    match technology {
        "postgresql" | "mongodb" | "mysql" | "mariadb" => ComponentType::Database,
        "redis" | "memcached" => ComponentType::Cache,
        "rabbitmq" | "kafka" => ComponentType::Queue,
        "nginx" => ComponentType::ApiGateway,
        _ => ComponentType::Service,
    }
}

/// Container port of a port spec: `8080`, `8080/tcp`, `80:8080`, `127.0.0.1:80:8080`.
pub fn parse_port(spec: &str) -> Option<u16> {
    let spec = spec.split('/').next().unwrap_or(spec);
    spec.rsplit(':').next()?.trim().parse().ok()
}

/// Fold components with the same name into one.
///
/// The first occurrence keeps its name, type and technology; later ones
/// contribute ports, environment, endpoints, tags and metadata it lacks.
/// A generic `container` type and an `unknown` technology are replaced by
/// more specific ones.
pub fn merge_components(components: Vec<Component>) -> Vec<Component> {
    let mut merged: Vec<Component> = Vec::with_capacity(components.len());
    for component in components {
        let Some(existing) = merged.iter_mut().find(|c| c.name == component.name) else {
            merged.push(component);
            continue;
        };
        if existing.component_type == ComponentType::Container {
            existing.component_type = component.component_type;
        }
        if existing.technology == "unknown" {
            existing.technology = component.technology;
        }
        for port in component.exposed_ports {
            if !existing.exposed_ports.contains(&port) {
                existing.exposed_ports.push(port);
            }
        }
        for (key, value) in component.environment {
            existing.environment.entry(key).or_insert(value);
        }
        for endpoint in component.endpoints {
            if !existing.endpoints.contains(&endpoint) {
                existing.endpoints.push(endpoint);
            }
        }
        for tag in component.tags {
            if !existing.tags.contains(&tag) {
                existing.tags.push(tag);
            }
        }
        for (key, value) in component.metadata {
            existing.metadata.entry(key).or_insert(value);
        }
    }
    merged
}
