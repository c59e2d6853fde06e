//! Image configuration written into every built image.

use crate::provision::requirements::Requirement;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A requirement the installer resolved, as recorded in the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRequirement {
    pub name: String,
    /// Requirement line as declared in the manifest.
    pub declared: String,
    /// Version the installer reported, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl InstalledRequirement {
    pub fn from_requirement(req: &Requirement, version: Option<String>) -> Self {
        Self {
            name: req.normalized_name(),
            declared: req.to_string(),
            version,
        }
    }
}

/// Runtime configuration of a built image.
///
/// Written as `config.json` only after every build stage succeeded, so its
/// presence marks a complete image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub base_image: String,

    /// Exec-form argv started by the runtime (ENTRYPOINT + CMD).
    pub entrypoint: Vec<String>,

    /// Working directory (e.g., "/app"); the orchestrator's application root.
    pub working_dir: String,

    /// Environment variables (e.g., ["PYTHONPATH=/opt/archlens/deps"])
    pub env: Vec<String>,

    /// Exposed ports (e.g., ["8080/tcp"])
    #[serde(default)]
    pub exposed_ports: Vec<String>,

    #[serde(default)]
    pub labels: Vec<(String, String)>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default)]
    pub requirements: Vec<InstalledRequirement>,

    /// Directory inside the image the dependencies were installed into.
    pub dependency_dir: String,

    /// SHA-256 of the source tree (relative paths and contents).
    pub source_digest: String,

    /// System packages only needed while building.
    #[serde(default)]
    pub build_packages: Vec<String>,

    /// Build packages kept because a dependency needs them at runtime.
    #[serde(default)]
    pub retained_packages: Vec<String>,

    pub created: DateTime<Utc>,
}

impl ImageConfig {
    /// Parse port number and protocol from an exposed port string.
    ///
    /// - "8080/tcp" -> Some((8080, "tcp"))
    /// - "8080" -> Some((8080, "tcp"))
    pub fn parse_exposed_port(port_spec: &str) -> Option<(u16, &str)> {
        let mut parts = port_spec.split('/');
        let port: u16 = parts.next()?.parse().ok()?;
        let protocol = parts.next().unwrap_or("tcp");
        Some((port, protocol))
    }

    pub fn tcp_ports(&self) -> Vec<u16> {
        self.exposed_ports
            .iter()
            .filter_map(|spec| {
                Self::parse_exposed_port(spec)
                    .and_then(|(port, protocol)| (protocol == "tcp").then_some(port))
            })
            .collect()
    }

    /// Merge environment variables into the image environment.
    ///
    /// Later values override existing keys; output is sorted for determinism.
    pub fn merge_env(&mut self, env: Vec<(String, String)>) {
        use std::collections::BTreeMap;

        let mut env_map: BTreeMap<String, String> = self
            .env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env_map.extend(env);

        self.env = env_map
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
    }

    /// Look up an environment variable.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn load(path: &Path) -> ArchlensResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            ArchlensError::Storage(format!(
                "failed to read image config {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: &Path) -> ArchlensResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data).map_err(|e| {
            ArchlensError::Storage(format!(
                "failed to write image config {}: {}",
                path.display(),
                e
            ))
        })
    }
}
