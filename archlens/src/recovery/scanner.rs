//! Repository scanner.
//!
//! Walks a repository once and sorts the files the later steps care about.
//! Paths are kept relative to the repository root.

use archlens_shared::errors::{ArchlensError, ArchlensResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Languages recognized by file extension.
const LANGUAGE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("python", &["py"]),
    ("java", &["java"]),
    ("javascript", &["js", "ts"]),
    ("go", &["go"]),
    ("csharp", &["cs"]),
    ("rust", &["rs"]),
];

const DEPENDENCY_FILES: &[&str] = &["requirements.txt", "package.json", "go.mod", "Cargo.toml"];

/// Files found in a repository, grouped by what they describe.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepositoryStructure {
    pub root: PathBuf,
    pub dockerfiles: Vec<PathBuf>,
    pub compose_files: Vec<PathBuf>,
    pub kubernetes_files: Vec<PathBuf>,
    pub terraform_files: Vec<PathBuf>,
    pub source_files: BTreeMap<String, Vec<PathBuf>>,
    pub dependency_files: Vec<PathBuf>,
}

impl RepositoryStructure {
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn source_files_for(&self, language: &str) -> &[PathBuf] {
        self.source_files
            .get(language)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn file_count(&self) -> usize {
        self.dockerfiles.len()
            + self.compose_files.len()
            + self.kubernetes_files.len()
            + self.terraform_files.len()
            + self.dependency_files.len()
            + self.source_files.values().map(Vec::len).sum::<usize>()
    }
}

/// Path filter built from ignore patterns.
///
/// A plain pattern matches a path component exactly; `*.ext` matches a
/// file-name suffix.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    names: Vec<String>,
    suffixes: Vec<String>,
}

impl IgnoreSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            match pattern.strip_prefix('*') {
                Some(suffix) => set.suffixes.push(suffix.to_string()),
                None => set.names.push(pattern.to_string()),
            }
        }
        set
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name) || self.suffixes.iter().any(|s| name.ends_with(s))
    }
}

pub fn scan(root: &Path, ignore: &IgnoreSet) -> ArchlensResult<RepositoryStructure> {
    if !root.is_dir() {
        return Err(ArchlensError::Config(format!(
            "repository path is not a directory: {}",
            root.display()
        )));
    }

    let mut structure = RepositoryStructure {
        root: root.to_path_buf(),
        ..Default::default()
    };

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !ignored(e, ignore));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        classify(&mut structure, entry.path(), relative.to_path_buf());
    }

    tracing::info!(
        dockerfiles = structure.dockerfiles.len(),
        compose = structure.compose_files.len(),
        kubernetes = structure.kubernetes_files.len(),
        terraform = structure.terraform_files.len(),
        languages = structure.source_files.len(),
        "Repository scanned"
    );
    Ok(structure)
}

fn ignored(entry: &DirEntry, ignore: &IgnoreSet) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| ignore.is_ignored(name))
}

fn classify(structure: &mut RepositoryStructure, path: &Path, relative: PathBuf) {
    let name = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = relative
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if name.starts_with("Dockerfile") {
        structure.dockerfiles.push(relative);
        return;
    }
    if is_yaml(&extension) && name.starts_with("docker-compose") {
        structure.compose_files.push(relative);
        return;
    }
    if is_yaml(&extension) {
        if is_kubernetes_manifest(path) {
            structure.kubernetes_files.push(relative);
        }
        return;
    }
    if extension == "tf" {
        structure.terraform_files.push(relative);
        return;
    }
    if DEPENDENCY_FILES.contains(&name.as_str()) {
        structure.dependency_files.push(relative);
        return;
    }
    if let Some((language, _)) = LANGUAGE_EXTENSIONS
        .iter()
        .find(|(_, exts)| exts.contains(&extension.as_str()))
    {
        structure
            .source_files
            .entry(language.to_string())
            .or_default()
            .push(relative);
    }
}

fn is_yaml(extension: &str) -> bool {
    extension == "yaml" || extension == "yml"
}

/// A YAML file is a Kubernetes manifest when any document is a mapping with `kind`.
fn is_kubernetes_manifest(path: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(path) else {
        return false;
    };
    serde_yaml::Deserializer::from_str(&text).any(|doc| {
        serde_yaml::Value::deserialize(doc)
            .ok()
            .is_some_and(|v| v.get("kind").is_some())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::constants::scan::IGNORE_PATTERNS;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_ignore_set() {
        let set = IgnoreSet::new(IGNORE_PATTERNS);
        assert!(set.is_ignored("node_modules"));
        assert!(set.is_ignored("debug.log"));
        assert!(!set.is_ignored("app.py"));
        assert!(!set.is_ignored("builder"));
    }

    #[test]
    fn test_scan_classifies_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "api/Dockerfile", "FROM python:3.12\n");
        write(root, "docker-compose.yml", "services: {}\n");
        write(root, "k8s/deploy.yaml", "kind: Deployment\nmetadata:\n  name: api\n");
        write(root, "config/settings.yaml", "debug: true\n");
        write(root, "infra/main.tf", "resource \"x\" \"y\" {}\n");
        write(root, "api/app.py", "import flask\n");
        write(root, "web/index.ts", "export {}\n");
        write(root, "api/requirements.txt", "flask\n");
        write(root, "node_modules/lib/index.js", "x\n");
        write(root, ".git/config", "x\n");

        let s = scan(root, &IgnoreSet::new(IGNORE_PATTERNS)).unwrap();
        assert_eq!(s.dockerfiles, vec![PathBuf::from("api/Dockerfile")]);
        assert_eq!(s.compose_files, vec![PathBuf::from("docker-compose.yml")]);
        assert_eq!(s.kubernetes_files, vec![PathBuf::from("k8s/deploy.yaml")]);
        assert_eq!(s.terraform_files, vec![PathBuf::from("infra/main.tf")]);
        assert_eq!(s.source_files_for("python"), [PathBuf::from("api/app.py")]);
        assert_eq!(s.source_files_for("javascript"), [PathBuf::from("web/index.ts")]);
        assert_eq!(s.dependency_files, vec![PathBuf::from("api/requirements.txt")]);
        assert_eq!(s.file_count(), 7);
    }

    #[test]
    fn test_multi_document_kubernetes_manifest() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "all.yml",
            "---\n# leading comment doc\n---\napiVersion: v1\nkind: Service\n",
        );
        let s = scan(tmp.path(), &IgnoreSet::default()).unwrap();
        assert_eq!(s.kubernetes_files.len(), 1);
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let err = scan(&tmp.path().join("nope"), &IgnoreSet::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
