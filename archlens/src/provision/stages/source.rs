//! Stage 3: Source.
//!
//! Copies the source tree into the image and verifies the copy by digest.
//! Commands declared after the dependency install run once the sources are
//! in place.

use crate::provision::digest::{CopyStats, copy_tree, tree_digest};
use crate::provision::executor::{ExecEnv, execute_checked};
use crate::provision::types::{SourceInput, SourceOutput};
use crate::runtime::options::ToolchainMode;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

pub const STAGE: &str = "source";

pub async fn run(input: SourceInput<'_>) -> ArchlensResult<SourceOutput> {
    if input.sources.is_empty() {
        return Err(ArchlensError::stage(STAGE, "no source tree to copy"));
    }

    let mut copies: Vec<(String, PathBuf, PathBuf)> = Vec::with_capacity(input.sources.len());
    for step in input.sources {
        let dest = input.layout.resolve(&step.dest)?;
        copies.push((step.dest.clone(), step.source.clone(), dest));
    }

    let (digests, stats) = tokio::task::spawn_blocking(move || copy_and_verify(copies))
        .await
        .map_err(|e| ArchlensError::Internal(format!("copy task failed: {}", e)))?
        .map_err(|e| e.in_stage(STAGE))?;

    let digest = combine_digests(&digests);
    tracing::info!(
        files = stats.files,
        bytes = stats.bytes,
        digest = %digest,
        "Source tree copied"
    );

    match input.mode {
        ToolchainMode::Execute => {
            for command in input.post_commands {
                let cwd = input.layout.resolve(&command.workdir)?;
                std::fs::create_dir_all(&cwd)?;
                let env = ExecEnv {
                    cwd: Some(cwd),
                    env: command.env.clone(),
                };
                tracing::info!(line = command.line, command = %command.command.text(), "Running build command");
                execute_checked(input.executor, &command.command.argv(), &env)
                    .await
                    .map_err(|e| e.in_stage(STAGE))?;
            }
        }
        ToolchainMode::Verify => {
            for command in input.post_commands {
                tracing::warn!(line = command.line, command = %command.command.text(), "Skipping build command (toolchain mode is verify)");
            }
        }
    }

    Ok(SourceOutput { digest, stats })
}

/// Copy each (dest, source, host dest) and compare digests before and after.
fn copy_and_verify(
    copies: Vec<(String, PathBuf, PathBuf)>,
) -> ArchlensResult<(Vec<(String, String)>, CopyStats)> {
    let mut digests = Vec::with_capacity(copies.len());
    let mut total = CopyStats::default();

    for (image_dest, source, dest) in copies {
        let before = tree_digest(&source)?;
        let stats = copy_tree(&source, &dest)?;
        let after = tree_digest(&dest)?;
        if before != after {
            return Err(ArchlensError::Storage(format!(
                "digest mismatch for {}: source {} != image {}",
                image_dest, before, after
            )));
        }
        total.files += stats.files;
        total.dirs += stats.dirs;
        total.symlinks += stats.symlinks;
        total.bytes += stats.bytes;
        digests.push((image_dest, after));
    }

    Ok((digests, total))
}

/// A single tree keeps its own digest; several are hashed as `dest digest` lines.
fn combine_digests(digests: &[(String, String)]) -> String {
    if let [(_, digest)] = digests {
        return digest.clone();
    }
    let mut hasher = Sha256::new();
    for (dest, digest) in digests {
        hasher.update(format!("{} {}\n", dest, digest).as_bytes());
    }
    hex::encode(hasher.finalize())
}
