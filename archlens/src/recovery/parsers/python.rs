//! Python sources.
//!
//! Import-level detection only: which web framework a module serves with,
//! which database, cache and queue clients it pulls in, and which hosts it
//! calls over HTTP.

use crate::recovery::model::{Component, ComponentType, Relationship, RelationshipKind};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:from\s+(?P<from>[A-Za-z_][\w.]*)\s+import\b|import\s+(?P<import>[A-Za-z_][\w.]*(?:\s*,\s*[A-Za-z_][\w.]*)*))")
        .expect("import regex is valid")
});

static HTTP_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:requests|httpx|session|client|aiohttp)\.(?:get|post|put|patch|delete|head|request)\(\s*(?:"[A-Z]+"\s*,\s*)?f?["']https?://(?P<host>[A-Za-z0-9_.-]+)"#)
        .expect("http call regex is valid")
});

/// Server frameworks; a module importing one serves traffic.
const FRAMEWORKS: &[(&str, &str)] = &[
    ("flask", "flask"),
    ("fastapi", "fastapi"),
    ("django", "django"),
    ("tornado", "tornado"),
    ("starlette", "starlette"),
];

/// Client libraries → (backing technology, component type).
const BACKENDS: &[(&str, &str, ComponentType)] = &[
    ("psycopg2", "postgresql", ComponentType::Database),
    ("psycopg", "postgresql", ComponentType::Database),
    ("asyncpg", "postgresql", ComponentType::Database),
    ("pymongo", "mongodb", ComponentType::Database),
    ("motor", "mongodb", ComponentType::Database),
    ("pymysql", "mysql", ComponentType::Database),
    ("mysql", "mysql", ComponentType::Database),
    ("redis", "redis", ComponentType::Cache),
    ("pika", "rabbitmq", ComponentType::Queue),
    ("aio_pika", "rabbitmq", ComponentType::Queue),
    ("kafka", "kafka", ComponentType::Queue),
    ("confluent_kafka", "kafka", ComponentType::Queue),
    ("aiokafka", "kafka", ComponentType::Queue),
    ("boto3", "s3", ComponentType::Storage),
];

const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0"];

/// What one Python module reveals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PythonModule {
    /// Top-level imported packages, deduplicated.
    pub imports: BTreeSet<String>,
    pub frameworks: Vec<&'static str>,
    pub backends: Vec<(&'static str, ComponentType)>,
    /// Hosts of outbound `http(s)://` calls.
    pub http_hosts: BTreeSet<String>,
}

impl PythonModule {
    pub fn parse(text: &str) -> Self {
        let mut module = Self::default();
        for caps in IMPORT_RE.captures_iter(text) {
            if let Some(from) = caps.name("from") {
                module.imports.insert(top_level(from.as_str()));
            }
            if let Some(list) = caps.name("import") {
                for name in list.as_str().split(',') {
                    module.imports.insert(top_level(name.trim()));
                }
            }
        }

        for (package, framework) in FRAMEWORKS {
            if module.imports.contains(*package) {
                module.frameworks.push(*framework);
            }
        }
        for (package, technology, kind) in BACKENDS {
            if module.imports.contains(*package)
                && !module.backends.iter().any(|(t, _)| t == technology)
            {
                module.backends.push((*technology, *kind));
            }
        }
        for caps in HTTP_CALL_RE.captures_iter(text) {
            let host = &caps["host"];
            if !LOCAL_HOSTS.contains(&host) {
                module.http_hosts.insert(host.to_string());
            }
        }
        module
    }

    /// Components this module implies, as seen from `owner` (the service the file belongs to).
    ///
    /// A framework import makes `owner` a service; each backing client adds
    /// an external component named after its technology.
    pub fn components(&self, owner: &str, source: &str) -> Vec<Component> {
        let mut components = Vec::new();
        if let Some(framework) = self.frameworks.first() {
            components.push(
                Component::new(owner, ComponentType::Service, "python")
                    .with_metadata("framework", *framework)
                    .with_metadata("source", source),
            );
        }
        for (technology, kind) in &self.backends {
            let mut backend = Component::new(*technology, *kind, *technology)
                .with_metadata("detected_in", source);
            backend.tags.push("external".to_string());
            components.push(backend);
        }
        components
    }

    /// Outbound HTTP calls from `owner`.
    pub fn relationships(&self, owner: &str) -> Vec<Relationship> {
        self.http_hosts
            .iter()
            .filter(|host| host.as_str() != owner)
            .map(|host| {
                Relationship::new(owner, host.as_str(), RelationshipKind::Calls, "http", "HTTP call")
            })
            .collect()
    }
}

fn top_level(module: &str) -> String {
    module.split('.').next().unwrap_or(module).to_string()
}
