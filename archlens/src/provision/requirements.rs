//! Dependency manifest (requirements file) parsing.
//!
//! One requirement per line in the conventional package-manager syntax:
//!
//! ```text
//! # comment
//! requests>=2.31,<3        # inline comment
//! uvicorn[standard]==0.30.1
//! pywin32==306 ; sys_platform == "win32"
//! mylib @ https://example.com/mylib-1.0.tar.gz
//! -r base.txt
//! --index-url https://pypi.org/simple
//! ```
//!
//! The manifest is read once and never mutated: [`DependencyManifest`] only
//! exposes shared references to its entries.

use archlens_shared::errors::{ArchlensError, ArchlensResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>.*)$",
    )
    .expect("requirement regex is valid")
});

static SPECIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<op>===|==|!=|~=|>=|<=|>|<)\s*(?P<version>[A-Za-z0-9.*+!_-]+)$")
        .expect("specifier regex is valid")
});

static EXTRA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("extra regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionOp {
    #[serde(rename = "===")]
    Arbitrary,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "~=")]
    Compatible,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
}

impl VersionOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "===" => Self::Arbitrary,
            "==" => Self::Eq,
            "!=" => Self::NotEq,
            "~=" => Self::Compatible,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            ">" => Self::Gt,
            "<" => Self::Lt,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arbitrary => "===",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Compatible => "~=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpecifier {
    pub op: VersionOp,
    pub version: String,
}

/// A single requirement line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<VersionSpecifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Line in the manifest (1-based).
    pub line: usize,
}

impl Requirement {
    /// Normalized project name: lowercase, runs of `-`, `_`, `.` become `-`.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Pinned to one exact version (`==x` without wildcard, or `===x`).
    pub fn is_pinned(&self) -> bool {
        self.url.is_some()
            || self.specifiers.iter().any(|s| match s.op {
                VersionOp::Arbitrary => true,
                VersionOp::Eq => !s.version.contains('*'),
                _ => false,
            })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if let Some(url) = &self.url {
            write!(f, " @ {}", url)?;
        }
        let specs: Vec<String> = self
            .specifiers
            .iter()
            .map(|s| format!("{}{}", s.op.as_str(), s.version))
            .collect();
        write!(f, "{}", specs.join(","))?;
        if let Some(marker) = &self.marker {
            write!(f, "; {}", marker)?;
        }
        Ok(())
    }
}

/// Non-requirement lines, forwarded to the installer untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ManifestOption {
    /// `-r other.txt`
    Include(String),
    /// `-c constraints.txt`
    Constraint(String),
    /// `-e path-or-url`
    Editable(String),
    /// `--index-url`, `--extra-index-url`, `--find-links`, ...
    Flag(String),
}

#[derive(Debug, Clone)]
pub struct DependencyManifest {
    origin: String,
    requirements: Vec<Requirement>,
    options: Vec<ManifestOption>,
}

impl DependencyManifest {
    pub fn from_path(path: &Path) -> ArchlensResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ArchlensError::Storage(format!(
                "failed to read dependency manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_with_origin(&text, path.display().to_string())
    }

    pub fn parse(text: &str) -> ArchlensResult<Self> {
        Self::parse_with_origin(text, "<inline>")
    }

    pub fn parse_with_origin(text: &str, origin: impl Into<String>) -> ArchlensResult<Self> {
        let origin = origin.into();
        let mut requirements: Vec<Requirement> = Vec::new();
        let mut options = Vec::new();
        let mut seen: HashMap<(String, Option<String>), usize> = HashMap::new();

        for (line_no, line) in logical_lines(text) {
            if line.starts_with('-') {
                options.push(parse_option(&line));
                continue;
            }

            let requirement = parse_requirement(&line, line_no)
                .map_err(|msg| ArchlensError::manifest(&origin, line_no, msg))?;

            let key = (requirement.normalized_name(), requirement.marker.clone());
            if let Some(first) = seen.get(&key) {
                return Err(ArchlensError::manifest(
                    &origin,
                    line_no,
                    format!(
                        "duplicate requirement '{}' (first declared on line {})",
                        requirement.name, first
                    ),
                ));
            }
            seen.insert(key, line_no);
            requirements.push(requirement);
        }

        Ok(Self {
            origin,
            requirements,
            options,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Requirements in declaration order.
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn options(&self) -> &[ManifestOption] {
        &self.options
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty() && self.options.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    /// Requirements not pinned to an exact version.
    pub fn unpinned(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements.iter().filter(|r| !r.is_pinned())
    }

    pub fn find(&self, name: &str) -> Option<&Requirement> {
        let wanted = normalize_name(name);
        self.requirements
            .iter()
            .find(|r| r.normalized_name() == wanted)
    }
}

pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// Strip comments, join `\` continuations, drop blank lines.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let without_comment = strip_comment(raw);
        let trimmed = without_comment.trim();

        let (content, continues) = match trimmed.strip_suffix('\\') {
            Some(rest) => (rest.trim_end(), true),
            None => (trimmed, false),
        };

        if content.is_empty() && !continues && pending.is_none() {
            continue;
        }

        let entry = pending.get_or_insert_with(|| (idx + 1, String::new()));
        if !content.is_empty() {
            if !entry.1.is_empty() {
                entry.1.push(' ');
            }
            entry.1.push_str(content);
        }

        if !continues
            && let Some(done) = pending.take()
            && !done.1.is_empty()
        {
            out.push(done);
        }
    }

    if let Some(done) = pending
        && !done.1.is_empty()
    {
        out.push(done);
    }
    out
}

/// A `#` starts a comment at line start or after whitespace.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

fn parse_option(line: &str) -> ManifestOption {
    let (flag, value) = match line.split_once(|c: char| c.is_whitespace() || c == '=') {
        Some((f, v)) => (f, v.trim().to_string()),
        None => (line, String::new()),
    };
    match flag {
        "-r" | "--requirement" => ManifestOption::Include(value),
        "-c" | "--constraint" => ManifestOption::Constraint(value),
        "-e" | "--editable" => ManifestOption::Editable(value),
        _ => ManifestOption::Flag(line.to_string()),
    }
}

fn parse_requirement(line: &str, line_no: usize) -> Result<Requirement, String> {
    let (spec_part, marker) = match line.split_once(';') {
        Some((spec, marker)) => {
            let marker = marker.trim();
            if marker.is_empty() {
                return Err("empty environment marker".to_string());
            }
            (spec.trim(), Some(marker.to_string()))
        }
        None => (line.trim(), None),
    };

    let caps = REQUIREMENT_RE
        .captures(spec_part)
        .ok_or_else(|| format!("invalid requirement '{}'", line))?;

    let name = caps["name"].to_string();

    let extras = match caps.name("extras") {
        Some(m) => m
            .as_str()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| {
                if EXTRA_RE.is_match(e) {
                    Ok(e.to_string())
                } else {
                    Err(format!("invalid extra '{}' in '{}'", e, name))
                }
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or("");

    if let Some(url) = rest.strip_prefix('@') {
        let url = url.trim();
        if url.is_empty() {
            return Err(format!("missing URL for '{}'", name));
        }
        return Ok(Requirement {
            name,
            extras,
            specifiers: Vec::new(),
            marker,
            url: Some(url.to_string()),
            line: line_no,
        });
    }

    let rest = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .unwrap_or(rest);

    let mut specifiers = Vec::new();
    if !rest.is_empty() {
        for raw in rest.split(',') {
            let raw = raw.trim();
            let caps = SPECIFIER_RE
                .captures(raw)
                .ok_or_else(|| format!("invalid version specifier '{}' for '{}'", raw, name))?;
            let op = VersionOp::parse(&caps["op"])
                .ok_or_else(|| format!("unknown operator in '{}'", raw))?;
            specifiers.push(VersionSpecifier {
                op,
                version: caps["version"].to_string(),
            });
        }
    }

    Ok(Requirement {
        name,
        extras,
        specifiers,
        marker,
        url: None,
        line: line_no,
    })
}
