//! Kubernetes manifests.
//!
//! A file may hold several `---` separated documents. Deployments and
//! Services become service components, StatefulSets databases, Ingresses
//! ingress components; other kinds are kept as resources but yield no
//! component.

use crate::recovery::model::{Component, ComponentType};
use archlens_shared::errors::ArchlensResult;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub spec: Value,
}

impl Resource {
    fn from_document(doc: &Value) -> Option<Self> {
        let kind = doc.get("kind")?.as_str()?.to_string();
        let metadata = doc.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        Some(Self {
            kind,
            name,
            namespace,
            labels: string_map(metadata.and_then(|m| m.get("labels"))),
            spec: doc.get("spec").cloned().unwrap_or(Value::Null),
        })
    }

    /// Service `spec.selector`.
    pub fn selector(&self) -> BTreeMap<String, String> {
        string_map(self.spec.get("selector"))
    }

    /// Deployment pod template labels.
    pub fn template_labels(&self) -> BTreeMap<String, String> {
        string_map(
            self.spec
                .get("template")
                .and_then(|t| t.get("metadata"))
                .and_then(|m| m.get("labels")),
        )
    }

    fn containers(&self) -> impl Iterator<Item = &Value> {
        self.spec
            .get("template")
            .and_then(|t| t.get("spec"))
            .and_then(|s| s.get("containers"))
            .and_then(Value::as_sequence)
            .map(|c| c.iter())
            .into_iter()
            .flatten()
    }

    pub fn to_component(&self) -> Option<Component> {
        match self.kind.as_str() {
            "Deployment" => Some(self.deployment()),
            "Service" => Some(self.service()),
            "StatefulSet" => Some(
                Component::new(&self.name, ComponentType::Database, "kubernetes")
                    .with_metadata("kind", "StatefulSet")
                    .with_metadata("namespace", self.namespace.as_str()),
            ),
            "Ingress" => Some(self.ingress()),
            _ => None,
        }
    }

    fn deployment(&self) -> Component {
        let mut component = Component::new(&self.name, ComponentType::Service, "kubernetes")
            .with_metadata("kind", "Deployment")
            .with_metadata("namespace", self.namespace.as_str())
            .with_metadata("labels", json_map(&self.labels));

        for container in self.containers() {
            if let Some(image) = container.get("image").and_then(Value::as_str) {
                component = component.with_metadata("image", image);
            }
            let ports = container
                .get("ports")
                .and_then(Value::as_sequence)
                .into_iter()
                .flatten();
            for port in ports {
                if let Some(p) = port.get("containerPort").and_then(as_port)
                    && !component.exposed_ports.contains(&p)
                {
                    component.exposed_ports.push(p);
                }
            }
            let env = container
                .get("env")
                .and_then(Value::as_sequence)
                .into_iter()
                .flatten();
            for var in env {
                if let Some(name) = var.get("name").and_then(Value::as_str) {
                    let value = var.get("value").and_then(Value::as_str).unwrap_or_default();
                    component.environment.insert(name.to_string(), value.to_string());
                }
            }
        }
        component
    }

    fn service(&self) -> Component {
        let mut component = Component::new(&self.name, ComponentType::Service, "kubernetes")
            .with_metadata("kind", "Service")
            .with_metadata("namespace", self.namespace.as_str())
            .with_metadata(
                "type",
                self.spec
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("ClusterIP"),
            )
            .with_metadata("selector", json_map(&self.selector()));
        component.exposed_ports = self
            .spec
            .get("ports")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
            .filter_map(|p| p.get("port").and_then(as_port))
            .collect();
        component
    }

    fn ingress(&self) -> Component {
        let mut component = Component::new(&self.name, ComponentType::Ingress, "kubernetes")
            .with_metadata("kind", "Ingress")
            .with_metadata("namespace", self.namespace.as_str());
        component.exposed_ports = vec![80, 443];

        let rules = self
            .spec
            .get("rules")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten();
        for rule in rules {
            let host = rule.get("host").and_then(Value::as_str).unwrap_or_default();
            let paths = rule
                .get("http")
                .and_then(|h| h.get("paths"))
                .and_then(Value::as_sequence)
                .into_iter()
                .flatten();
            for path in paths {
                let path = path.get("path").and_then(Value::as_str).unwrap_or_default();
                component.endpoints.push(format!("{}{}", host, path));
            }
        }
        component
    }
}

/// All resources in a (possibly multi-document) manifest.
pub fn parse(text: &str) -> ArchlensResult<Vec<Resource>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)?;
        if let Some(resource) = Resource::from_document(&value) {
            resources.push(resource);
        }
    }
    Ok(resources)
}

pub fn components(resources: &[Resource]) -> Vec<Component> {
    resources.iter().filter_map(Resource::to_component).collect()
}

fn as_port(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|p| u16::try_from(p).ok())
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_mapping)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => return None,
                    };
                    Some((k.as_str()?.to_string(), v))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn json_map(map: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: orders
  namespace: shop
  labels:
    app: orders
spec:
  template:
    metadata:
      labels:
        app: orders
        tier: backend
    spec:
      containers:
        - name: orders
          image: registry.local/orders:1.4
          ports:
            - containerPort: 8080
          env:
            - name: DB_HOST
              value: orders-db
            - name: SECRET
              valueFrom:
                secretKeyRef: {name: s, key: k}
---
apiVersion: v1
kind: Service
metadata:
  name: orders-svc
spec:
  type: NodePort
  selector:
    app: orders
  ports:
    - port: 80
      targetPort: 8080
---
apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: orders-db
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: edge
spec:
  rules:
    - host: shop.example.com
      http:
        paths:
          - path: /orders
          - path: /cart
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
"#;

    #[test]
    fn test_parse_resources() {
        let resources = parse(MANIFEST).unwrap();
        let kinds: Vec<_> = resources.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, ["Deployment", "Service", "StatefulSet", "Ingress", "ConfigMap"]);
        assert_eq!(resources[0].namespace, "shop");
        assert_eq!(resources[1].namespace, "default");
        assert_eq!(resources[0].template_labels()["tier"], "backend");
        assert_eq!(resources[1].selector()["app"], "orders");
    }

    #[test]
    fn test_components() {
        let components = components(&parse(MANIFEST).unwrap());
        assert_eq!(components.len(), 4);

        let deploy = &components[0];
        assert_eq!(deploy.component_type, ComponentType::Service);
        assert_eq!(deploy.exposed_ports, vec![8080]);
        assert_eq!(deploy.environment["DB_HOST"], "orders-db");
        assert_eq!(deploy.environment["SECRET"], "");
        assert_eq!(deploy.metadata["image"], "registry.local/orders:1.4");

        assert_eq!(components[1].exposed_ports, vec![80]);
        assert_eq!(components[1].metadata["type"], "NodePort");
        assert_eq!(components[2].component_type, ComponentType::Database);

        let ingress = &components[3];
        assert_eq!(ingress.component_type, ComponentType::Ingress);
        assert_eq!(ingress.exposed_ports, vec![80, 443]);
        assert_eq!(ingress.endpoints, vec!["shop.example.com/orders", "shop.example.com/cart"]);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(parse("kind: [unclosed\n").is_err());
        assert!(parse("").unwrap().is_empty());
    }
}
