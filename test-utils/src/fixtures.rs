//! On-disk fixtures.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Build manifest used by [`BuildContextFixture`].
pub const BUILD_MANIFEST: &str = r#"FROM python:3.11-slim
RUN apt-get update && apt-get install -y gcc git && rm -rf /var/lib/apt/lists/*
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY src/ ./src/
ENV PYTHONUNBUFFERED=1
CMD ["python", "src/orchestrator.py"]
"#;

pub const REQUIREMENTS: &str = "\
# runtime dependencies
requests==2.31.0
pyyaml>=6.0
networkx==3.2.1
";

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture directory");
    }
    std::fs::write(&path, contents).expect("write fixture file");
}

/// A build context: Dockerfile, requirements.txt and a small source tree.
pub struct BuildContextFixture {
    dir: TempDir,
}

impl BuildContextFixture {
    pub fn new() -> Self {
        Self::with_requirements(REQUIREMENTS)
    }

    pub fn with_requirements(requirements: &str) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().join("context");
        write(&root, "Dockerfile", BUILD_MANIFEST);
        write(&root, "requirements.txt", requirements);
        write(&root, "src/orchestrator.py", "import sys\nsys.exit(0)\n");
        write(&root, "src/recovery/__init__.py", "");
        write(&root, "src/recovery/graph.py", "NODES = []\n");
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("context")
    }

    pub fn manifest(&self) -> PathBuf {
        self.root().join("Dockerfile")
    }

    /// Fresh output path next to the context; not created.
    pub fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join("images").join(name)
    }
}

impl Default for BuildContextFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A small multi-service repository.
///
/// `api` (flask, postgres, redis) calls `worker` over HTTP; compose wires
/// `api` to `db` and `cache`; a Kubernetes Service fronts the `api`
/// Deployment behind an Ingress.
pub struct SampleRepo {
    dir: TempDir,
}

impl SampleRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().join("shop");

        write(
            &root,
            "services/api/Dockerfile",
            "FROM python:3.11-slim\nWORKDIR /app\nENV PORT=8000\nEXPOSE 8000\nCMD [\"python\", \"app.py\"]\n",
        );
        write(
            &root,
            "services/api/app.py",
            r#"from flask import Flask
import psycopg2
import redis
import requests

app = Flask(__name__)

def enqueue(job):
    return requests.post("http://worker:9000/jobs", json=job)
"#,
        );
        write(
            &root,
            "services/worker/Dockerfile",
            "FROM python:3.11-slim\nWORKDIR /worker\nEXPOSE 9000\nCMD [\"python\", \"main.py\"]\n",
        );
        write(&root, "services/worker/main.py", "import json\nimport time\n");
        write(
            &root,
            "docker-compose.yml",
            r#"services:
  api:
    build: ./services/api
    ports:
      - "8000:8000"
    environment:
      DATABASE_URL: postgres://db:5432/shop
    depends_on:
      - db
      - cache
  worker:
    build:
      context: ./services/worker
    depends_on:
      - cache
  db:
    image: postgres:15
    ports:
      - "5432"
  cache:
    image: redis:7
"#,
        );
        write(
            &root,
            "k8s/api.yaml",
            r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
  labels:
    app: api
spec:
  selector:
    matchLabels:
      app: api
  template:
    metadata:
      labels:
        app: api
    spec:
      containers:
        - name: api
          image: shop/api:1.0
          ports:
            - containerPort: 8000
---
apiVersion: v1
kind: Service
metadata:
  name: api-svc
spec:
  selector:
    app: api
  ports:
    - port: 80
      targetPort: 8000
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: shop-ingress
spec:
  rules:
    - host: shop.example.com
      http:
        paths:
          - path: /
            backend:
              service:
                name: api-svc
                port:
                  number: 80
"#,
        );
        write(
            &root,
            "infra/main.tf",
            "resource \"aws_s3_bucket\" \"assets\" {}\n\nmodule \"network\" {\n  source = \"./modules/network\"\n}\n",
        );
        write(&root, "node_modules/left-pad/Dockerfile", "FROM node:20\n");

        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("shop")
    }

    /// Output directory beside the repository; not created.
    pub fn output(&self) -> PathBuf {
        self.dir.path().join("c4")
    }
}

impl Default for SampleRepo {
    fn default() -> Self {
        Self::new()
    }
}
