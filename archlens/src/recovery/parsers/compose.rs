//! docker-compose files.
//!
//! Compose allows several shapes for the same key (`depends_on` as a list or
//! a map, `environment` as `KEY=VALUE` strings or a map, ports as strings,
//! numbers or long-form maps). Everything is read through `serde_yaml::Value`
//! and normalized here.

use super::{detect_technology, parse_port, type_for_technology};
use crate::recovery::model::Component;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComposeService {
    pub name: String,
    pub image: Option<String>,
    pub build_context: Option<String>,
    pub ports: Vec<u16>,
    pub environment: BTreeMap<String, String>,
    pub depends_on: Vec<String>,
    /// Link targets with any `:alias` removed.
    pub links: Vec<String>,
}

impl ComposeService {
    pub fn technology(&self) -> &'static str {
        match &self.image {
            Some(image) => detect_technology(image),
            None => "unknown",
        }
    }

    pub fn to_component(&self) -> Component {
        let technology = self.technology();
        let mut component = Component::new(&self.name, type_for_technology(technology), technology);
        component.exposed_ports = self.ports.clone();
        component.environment = self.environment.clone();
        if let Some(image) = &self.image {
            component = component.with_metadata("image", image.as_str());
        }
        if let Some(context) = &self.build_context {
            component = component.with_metadata("build_context", context.as_str());
        }
        component.with_metadata("kind", "compose_service")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComposeFile {
    pub services: Vec<ComposeService>,
}

impl ComposeFile {
    pub fn parse(text: &str) -> ArchlensResult<Self> {
        let doc: Value = serde_yaml::from_str(text)?;
        let Some(services) = doc.get("services") else {
            return Ok(Self::default());
        };
        let Value::Mapping(services) = services else {
            return Err(ArchlensError::Parse("'services' must be a mapping".into()));
        };

        let mut parsed = Vec::with_capacity(services.len());
        for (name, config) in services {
            let Some(name) = name.as_str() else {
                continue;
            };
            if !config.is_mapping() {
                tracing::debug!(service = %name, "Skipping compose service without a mapping");
                continue;
            }
            parsed.push(parse_service(name, config));
        }
        Ok(Self { services: parsed })
    }

    pub fn components(&self) -> Vec<Component> {
        self.services.iter().map(ComposeService::to_component).collect()
    }
}

fn parse_service(name: &str, config: &Value) -> ComposeService {
    let image = config.get("image").and_then(scalar);
    let build_context = match config.get("build") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(build @ Value::Mapping(_)) => build
            .get("context")
            .or_else(|| build.get("dockerfile"))
            .and_then(scalar),
        _ => None,
    };

    let ports = sequence(config.get("ports"))
        .filter_map(|p| match p {
            Value::Mapping(_) => p
                .get("target")
                .or_else(|| p.get("published"))
                .and_then(scalar)
                .and_then(|s| parse_port(&s)),
            other => scalar(other).and_then(|s| parse_port(&s)),
        })
        .collect();

    let environment = match config.get("environment") {
        Some(Value::Mapping(map)) => map
            .iter()
            .filter_map(|(k, v)| Some((scalar(k)?, scalar(v).unwrap_or_default())))
            .collect(),
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(scalar)
            .filter_map(|item| {
                let (k, v) = item.split_once('=')?;
                Some((k.to_string(), v.to_string()))
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    let depends_on = match config.get("depends_on") {
        Some(Value::Mapping(map)) => map.keys().filter_map(scalar).collect(),
        other => sequence(other).filter_map(scalar).collect(),
    };

    let links = sequence(config.get("links"))
        .filter_map(scalar)
        .map(|link| link.split(':').next().unwrap_or_default().to_string())
        .filter(|link| !link.is_empty())
        .collect();

    ComposeService {
        name: name.to_string(),
        image,
        build_context,
        ports,
        environment,
        depends_on,
        links,
    }
}

fn sequence(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value
        .and_then(Value::as_sequence)
        .map(|s| s.iter())
        .into_iter()
        .flatten()
}

/// String form of a scalar (strings, numbers, bools).
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::model::ComponentType;

    const COMPOSE: &str = r#"
version: "3.9"
services:
  web:
    build: ./web
    ports:
      - "8080:80"
    environment:
      - API_URL=http://api:8000
    depends_on:
      - api
    links:
      - "api:backend"
  api:
    build:
      context: ./api
    ports:
      - target: 8000
        published: 18000
    environment:
      DB_PORT: 5432
    depends_on:
      db:
        condition: service_healthy
      cache:
        condition: service_started
  db:
    image: postgres:16
  cache:
    image: redis:7
"#;

    #[test]
    fn test_parse_compose_shapes() {
        let file = ComposeFile::parse(COMPOSE).unwrap();
        let names: Vec<_> = file.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["web", "api", "db", "cache"]);

        let web = &file.services[0];
        assert_eq!(web.build_context.as_deref(), Some("./web"));
        assert_eq!(web.ports, vec![80]);
        assert_eq!(web.environment["API_URL"], "http://api:8000");
        assert_eq!(web.depends_on, vec!["api"]);
        assert_eq!(web.links, vec!["api"]);

        let api = &file.services[1];
        assert_eq!(api.build_context.as_deref(), Some("./api"));
        assert_eq!(api.ports, vec![8000]);
        assert_eq!(api.environment["DB_PORT"], "5432");
        assert_eq!(api.depends_on, vec!["db", "cache"]);
    }

    #[test]
    fn test_components_typed_by_image() {
        let components = ComposeFile::parse(COMPOSE).unwrap().components();
        let types: Vec<_> = components.iter().map(|c| c.component_type).collect();
        assert_eq!(
            types,
            [
                ComponentType::Service,
                ComponentType::Service,
                ComponentType::Database,
                ComponentType::Cache
            ]
        );
        assert_eq!(components[2].technology, "postgresql");
    }

    #[test]
    fn test_no_services_is_empty() {
        assert!(ComposeFile::parse("version: '3'\n").unwrap().services.is_empty());
        assert!(ComposeFile::parse("services: [a, b]\n").is_err());
        assert!(ComposeFile::parse("services: {a: [\n").is_err());
    }
}
