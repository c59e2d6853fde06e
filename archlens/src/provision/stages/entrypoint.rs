//! Stage 4: Entrypoint.
//!
//! Resolves the exec-form argv the runtime starts and makes sure the working
//! directory exists in the image.

use crate::provision::types::{EntrypointInput, EntrypointOutput};
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use std::path::Path;

pub const STAGE: &str = "entrypoint";

const SHELLS: &[&str] = &["sh", "bash", "dash", "ash", "zsh"];

pub fn run(input: EntrypointInput<'_>) -> ArchlensResult<EntrypointOutput> {
    let Some(program) = input.argv.first() else {
        return Err(ArchlensError::stage(STAGE, "entrypoint is empty"));
    };

    let program_name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if SHELLS.contains(&program_name.as_str()) && input.argv.get(1).is_some_and(|a| a == "-c") {
        return Err(ArchlensError::stage(
            STAGE,
            format!(
                "entrypoint runs through a shell ({}); declare the process argv directly",
                input.argv.join(" ")
            ),
        ));
    }

    if !input.workdir.starts_with('/') {
        return Err(ArchlensError::stage(
            STAGE,
            format!("working directory must be absolute: {}", input.workdir),
        ));
    }

    let workdir = input.layout.resolve(input.workdir)?;
    std::fs::create_dir_all(&workdir).map_err(|e| {
        ArchlensError::stage(
            STAGE,
            format!("failed to create working directory {}: {}", workdir.display(), e),
        )
    })?;

    // Script arguments relative to the working directory should have been copied
    for arg in input.argv.iter().skip(1) {
        if looks_like_script(arg) && !arg.starts_with('/') && !workdir.join(arg).exists() {
            tracing::warn!(script = %arg, workdir = %input.workdir, "Entrypoint script not found in image");
        }
    }

    tracing::info!(argv = ?input.argv, workdir = %input.workdir, "Entrypoint declared");

    Ok(EntrypointOutput {
        argv: input.argv.to_vec(),
        working_dir: input.workdir.to_string(),
    })
}

fn looks_like_script(arg: &str) -> bool {
    [".py", ".sh", ".js", ".rb"]
        .iter()
        .any(|ext| arg.ends_with(ext))
}
