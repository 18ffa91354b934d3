//! Bundle pipeline: deterministic gzip-tar creation and atomic extraction.
//!
//! A bundle is a gzip-compressed tar of a skill directory with `SKILL.md` at
//! its root. Creation walks the tree in sorted order and writes no archive
//! timestamps beyond the entries' own mtimes, so the byte stream is a pure
//! function of the input tree and compression level. Extraction stages into
//! a hidden `.<name>.part` sibling and renames into place.

use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};

/// Default gzip level; roughly 60% compression on typical text bundles.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Outcome of an extraction attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// The bundle was extracted to the contained path.
    Installed(PathBuf),
    /// The target already existed and `force` was off.
    AlreadyInstalled(PathBuf),
}

/// Build a gzip-tar bundle of `dir` with entry paths relative to `dir`.
pub fn create(dir: &Path) -> Result<Vec<u8>> {
    create_with_level(dir, DEFAULT_COMPRESSION_LEVEL)
}

/// Build a bundle at a specific compression level (0-9).
pub fn create_with_level(dir: &Path, level: u32) -> Result<Vec<u8>> {
    if !dir.join("SKILL.md").is_file() {
        return Err(Error::validation(format!(
            "no SKILL.md found in {}",
            dir.display()
        ))
        .with_solution("bundle a directory containing SKILL.md at its root"));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for path in sorted_tree(dir)? {
        let rel = path
            .strip_prefix(dir)
            .map_err(|e| Error::filesystem("walked outside the bundle root").with_cause(e))?;
        if path.is_dir() {
            builder.append_dir(rel, &path)
        } else {
            builder.append_path_with_name(&path, rel)
        }
        .map_err(|e| {
            Error::filesystem(format!("failed to add {} to the bundle", rel.display()))
                .with_cause(e)
        })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::filesystem("failed to finalize the bundle").with_cause(e))?;
    encoder
        .finish()
        .map_err(|e| Error::filesystem("failed to compress the bundle").with_cause(e))
}

/// All paths under `root` (excluding `root` itself), sorted for determinism.
fn sorted_tree(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut children: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| {
                Error::filesystem(format!("failed to read {}", dir.display())).with_cause(e)
            })?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| {
                Error::filesystem(format!("failed to read {}", dir.display())).with_cause(e)
            })?
            .into_iter()
            .map(|entry| entry.path())
            .collect();
        children.sort();
        for child in children {
            if child.is_dir() {
                pending.push(child.clone());
            }
            paths.push(child);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Extract a bundle under `parent/<name>`, atomically.
///
/// Stages into `parent/.<name>.part`, then renames. When the target exists:
/// a no-op unless `force`, in which case the old tree is replaced.
pub fn extract(archive: &[u8], parent: &Path, name: &str, force: bool) -> Result<ExtractOutcome> {
    let target = parent.join(name);
    if target.exists() {
        if !force {
            tracing::info!(skill = %name, path = %target.display(), "already installed");
            return Ok(ExtractOutcome::AlreadyInstalled(target));
        }
        tracing::debug!(skill = %name, "force: replacing existing install");
    }

    std::fs::create_dir_all(parent).map_err(|e| {
        Error::filesystem(format!("failed to create {}", parent.display())).with_cause(e)
    })?;

    let staging = parent.join(format!(".{name}.part"));
    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(|e| {
            Error::filesystem(format!("failed to clear staging at {}", staging.display()))
                .with_cause(e)
        })?;
    }
    std::fs::create_dir(&staging).map_err(|e| {
        Error::filesystem(format!("failed to create staging at {}", staging.display()))
            .with_cause(e)
    })?;

    match unpack_into(archive, &staging) {
        Ok(()) => {}
        Err(e) => {
            // Abandoned partial files are removed on failure.
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
    }

    if force && target.exists() {
        std::fs::remove_dir_all(&target).map_err(|e| {
            Error::filesystem(format!("failed to remove {}", target.display())).with_cause(e)
        })?;
    }
    std::fs::rename(&staging, &target).map_err(|e| {
        let _ = std::fs::remove_dir_all(&staging);
        Error::filesystem(format!("failed to move bundle into {}", target.display()))
            .with_cause(e)
    })?;

    Ok(ExtractOutcome::Installed(target))
}

fn unpack_into(archive: &[u8], staging: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let entries = tar
        .entries()
        .map_err(|e| Error::validation("bundle is not a gzip tar archive").with_cause(e))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::validation("corrupt bundle entry").with_cause(e))?;
        let path = entry
            .path()
            .map_err(|e| Error::validation("bundle entry has an unreadable path").with_cause(e))?
            .into_owned();
        reject_traversal(&path)?;
        entry.unpack_in(staging).map_err(|e| {
            Error::filesystem(format!("failed to extract {}", path.display())).with_cause(e)
        })?;
    }
    Ok(())
}

/// Reject any entry path that could resolve outside the target directory.
fn reject_traversal(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::filesystem(format!(
                    "bundle entry '{}' escapes the install directory",
                    path.display()
                ))
                .with_solution("refuse this bundle; report it to the publisher"));
            }
        }
    }
    Ok(())
}
