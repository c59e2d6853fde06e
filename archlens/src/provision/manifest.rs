//! Build manifest (Dockerfile subset) parsing.
//!
//! Supports the instructions a provisioning manifest needs: `FROM`, `RUN`,
//! `COPY`/`ADD`, `WORKDIR`, `ENV`, `EXPOSE`, `CMD`, `ENTRYPOINT`, `LABEL`,
//! `ARG` and `USER`. Anything else is kept as [`Instruction::Other`].
//!
//! Keywords are case-insensitive, `\` joins continuation lines and `#`
//! starts a comment line. `RUN`, `CMD` and `ENTRYPOINT` accept both the JSON
//! exec form and the shell form. Variable substitution is not performed.

use archlens_shared::errors::{ArchlensError, ArchlensResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a command is written in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandForm {
    /// `["python", "src/orchestrator.py"]` - executed directly.
    Exec(Vec<String>),
    /// `python src/orchestrator.py` - executed through `/bin/sh -c`.
    Shell(String),
}

impl CommandForm {
    /// Parse the argument text of RUN/CMD/ENTRYPOINT.
    pub fn parse(args: &str) -> Self {
        let trimmed = args.trim();
        if trimmed.starts_with('[')
            && let Ok(argv) = serde_json::from_str::<Vec<String>>(trimmed)
        {
            return Self::Exec(argv);
        }
        Self::Shell(trimmed.to_string())
    }

    /// Full argv, wrapping shell form in `/bin/sh -c`.
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Exec(argv) => argv.clone(),
            Self::Shell(cmd) => vec!["/bin/sh".to_string(), "-c".to_string(), cmd.clone()],
        }
    }

    /// Command text for matching and logging.
    pub fn text(&self) -> String {
        match self {
            Self::Exec(argv) => argv.join(" "),
            Self::Shell(cmd) => cmd.clone(),
        }
    }

    pub fn is_exec(&self) -> bool {
        matches!(self, Self::Exec(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From {
        image: String,
        alias: Option<String>,
    },
    Run(CommandForm),
    /// COPY and ADD. Flags such as `--chown` are dropped.
    Copy {
        sources: Vec<String>,
        dest: String,
    },
    Workdir(String),
    Env(Vec<(String, String)>),
    Expose(Vec<String>),
    Cmd(CommandForm),
    Entrypoint(CommandForm),
    Label(Vec<(String, String)>),
    Arg {
        name: String,
        default: Option<String>,
    },
    User(String),
    Other {
        keyword: String,
        args: String,
    },
}

impl Instruction {
    pub fn keyword(&self) -> &str {
        match self {
            Self::From { .. } => "FROM",
            Self::Run(_) => "RUN",
            Self::Copy { .. } => "COPY",
            Self::Workdir(_) => "WORKDIR",
            Self::Env(_) => "ENV",
            Self::Expose(_) => "EXPOSE",
            Self::Cmd(_) => "CMD",
            Self::Entrypoint(_) => "ENTRYPOINT",
            Self::Label(_) => "LABEL",
            Self::Arg { .. } => "ARG",
            Self::User(_) => "USER",
            Self::Other { keyword, .. } => keyword,
        }
    }
}

/// An instruction and the line it starts on (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    pub line: usize,
    pub instruction: Instruction,
}

/// Parsed build manifest, in declaration order.
#[derive(Debug, Clone)]
pub struct BuildManifest {
    origin: String,
    lines: Vec<ManifestLine>,
}

impl BuildManifest {
    pub fn from_path(path: &Path) -> ArchlensResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ArchlensError::Storage(format!(
                "failed to read build manifest {}: {}",
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
        let mut lines = Vec::new();

        for (line_no, logical) in logical_lines(text) {
            let (keyword, args) = match logical.split_once(char::is_whitespace) {
                Some((k, a)) => (k, a.trim()),
                None => (logical.as_str(), ""),
            };
            let keyword = keyword.to_ascii_uppercase();

            if args.is_empty() {
                return Err(ArchlensError::manifest(
                    &origin,
                    line_no,
                    format!("{} requires at least one argument", keyword),
                ));
            }

            let instruction = parse_instruction(&keyword, args)
                .map_err(|msg| ArchlensError::manifest(&origin, line_no, msg))?;

            lines.push(ManifestLine {
                line: line_no,
                instruction,
            });
        }

        Ok(Self { origin, lines })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn lines(&self) -> &[ManifestLine] {
        &self.lines
    }

    pub fn instructions(&self) -> impl DoubleEndedIterator<Item = &Instruction> {
        self.lines.iter().map(|l| &l.instruction)
    }

    /// Image of the last `FROM` (the final build stage).
    pub fn base_image(&self) -> Option<&str> {
        self.instructions().rev().find_map(|i| match i {
            Instruction::From { image, .. } => Some(image.as_str()),
            _ => None,
        })
    }

    /// Effective working directory after all `WORKDIR` instructions.
    ///
    /// Relative `WORKDIR` values are joined onto the previous one.
    pub fn workdir(&self) -> Option<String> {
        let mut current: Option<String> = None;
        for instruction in self.instructions() {
            if let Instruction::Workdir(dir) = instruction {
                current = Some(match (&current, dir.starts_with('/')) {
                    (Some(prev), false) => format!("{}/{}", prev.trim_end_matches('/'), dir),
                    _ => dir.clone(),
                });
            }
        }
        current
    }

    /// Environment in declaration order, later keys overriding earlier ones.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = Vec::new();
        for instruction in self.instructions() {
            if let Instruction::Env(pairs) = instruction {
                for (key, value) in pairs {
                    env.retain(|(k, _)| k != key);
                    env.push((key.clone(), value.clone()));
                }
            }
        }
        env
    }

    pub fn exposed_ports(&self) -> Vec<String> {
        self.instructions()
            .filter_map(|i| match i {
                Instruction::Expose(ports) => Some(ports.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Last `ENTRYPOINT` and last `CMD`, as declared.
    pub fn entrypoint_and_cmd(&self) -> (Option<&CommandForm>, Option<&CommandForm>) {
        let entrypoint = self.instructions().rev().find_map(|i| match i {
            Instruction::Entrypoint(c) => Some(c),
            _ => None,
        });
        let cmd = self.instructions().rev().find_map(|i| match i {
            Instruction::Cmd(c) => Some(c),
            _ => None,
        });
        (entrypoint, cmd)
    }
}

/// Join continuation lines and drop comments/blank lines.
///
/// Yields (first line number, logical line).
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        if trimmed.starts_with('#') || (trimmed.is_empty() && pending.is_none()) {
            continue;
        }

        let (content, continues) = match trimmed.strip_suffix('\\') {
            Some(rest) => (rest.trim_end(), true),
            None => (trimmed, false),
        };

        let entry = pending.get_or_insert_with(|| (line_no, String::new()));
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

fn parse_instruction(keyword: &str, args: &str) -> Result<Instruction, String> {
    let instruction = match keyword {
        "FROM" => {
            let tokens: Vec<&str> = args
                .split_whitespace()
                .filter(|t| !t.starts_with("--"))
                .collect();
            let image = tokens
                .first()
                .ok_or_else(|| "FROM requires an image".to_string())?
                .to_string();
            let alias = match tokens.get(1) {
                Some(kw) if kw.eq_ignore_ascii_case("as") => tokens.get(2).map(|s| s.to_string()),
                _ => None,
            };
            Instruction::From { image, alias }
        }
        "RUN" => Instruction::Run(CommandForm::parse(args)),
        "CMD" => Instruction::Cmd(CommandForm::parse(args)),
        "ENTRYPOINT" => Instruction::Entrypoint(CommandForm::parse(args)),
        "COPY" | "ADD" => {
            let mut tokens = match CommandForm::parse(args) {
                CommandForm::Exec(argv) => argv,
                CommandForm::Shell(_) => tokenize(args)?,
            };
            tokens.retain(|t| !t.starts_with("--"));
            if tokens.len() < 2 {
                return Err(format!("{} requires a source and a destination", keyword));
            }
            let dest = tokens.pop().unwrap_or_default();
            Instruction::Copy {
                sources: tokens,
                dest,
            }
        }
        "WORKDIR" => Instruction::Workdir(args.to_string()),
        "ENV" => Instruction::Env(parse_pairs(args, true)?),
        "LABEL" => Instruction::Label(parse_pairs(args, false)?),
        "EXPOSE" => Instruction::Expose(args.split_whitespace().map(String::from).collect()),
        "ARG" => match args.split_once('=') {
            Some((name, default)) => Instruction::Arg {
                name: name.trim().to_string(),
                default: Some(unquote(default.trim())),
            },
            None => Instruction::Arg {
                name: args.to_string(),
                default: None,
            },
        },
        "USER" => Instruction::User(args.to_string()),
        other => Instruction::Other {
            keyword: other.to_string(),
            args: args.to_string(),
        },
    };
    Ok(instruction)
}

/// Parse `KEY=VALUE ...` pairs. With `allow_legacy`, also accept the
/// `ENV KEY value with spaces` form.
fn parse_pairs(args: &str, allow_legacy: bool) -> Result<Vec<(String, String)>, String> {
    let tokens = tokenize(args)?;
    let first_has_eq = tokens.first().is_some_and(|t| t.contains('='));

    if !first_has_eq {
        if allow_legacy {
            let (key, value) = match args.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (args, ""),
            };
            return Ok(vec![(key.to_string(), unquote(value))]);
        }
        return Err(format!("expected KEY=VALUE, got '{}'", args));
    }

    tokens
        .into_iter()
        .map(|token| match token.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(format!("expected KEY=VALUE, got '{}'", token)),
        })
        .collect()
}

/// Split on whitespace, honouring single and double quotes. Quotes are
/// removed from the resulting tokens.
fn tokenize(args: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in args.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        v[1..v.len() - 1].to_string()
    } else {
        v.to_string()
    }
}
