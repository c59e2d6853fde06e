#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Manifest without system packages, so builds need nothing from the host.
pub const PLAIN_MANIFEST: &str = r#"FROM python:3.11-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY src/ ./src/
ENV APP_ENV=test
EXPOSE 8080
CMD ["python", "src/orchestrator.py"]
"#;

/// Installer that succeeds without installing anything.
pub const NOOP_INSTALLER: &str = "true {manifest}";

pub fn archlens() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_archlens"));
    // You can override this with .timeout(Duration::from_secs(N))
    cmd.timeout(Duration::from_secs(60));
    cmd.env_remove("RUST_LOG");
    cmd
}

pub struct BuildContext {
    pub dir: TempDir,
}

impl BuildContext {
    pub fn new(manifest: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ctx");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("Dockerfile"), manifest).unwrap();
        std::fs::write(root.join("requirements.txt"), "requests==2.31.0\npyyaml>=6.0\n").unwrap();
        std::fs::write(root.join("src/orchestrator.py"), "print('hello')\n").unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("ctx")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("image")
    }

    /// Build into [`Self::output`] and return it.
    pub fn build(&self) -> PathBuf {
        archlens()
            .args(["build", "--installer", NOOP_INSTALLER, "--context"])
            .arg(self.root())
            .arg("--output")
            .arg(self.output())
            .assert()
            .success();
        self.output()
    }
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
