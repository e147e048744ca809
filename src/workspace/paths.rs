//! Workspace-relative path validation.
//!
//! Every path recorded in a manifest or entry file must stay inside the
//! workspace root. Hand-edited manifests are untrusted input: absolute
//! paths, drive prefixes and `..` escapes are all rejected here, before
//! any filesystem access happens.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Path validation error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty relative path")]
    Empty,
    #[error("absolute path not allowed inside a workspace: {0}")]
    Absolute(String),
    #[error("path escapes the workspace root: {0}")]
    EscapesRoot(String),
    #[error("path contains a null byte")]
    ContainsNullByte,
}

/// Normalize a workspace-relative path to forward slashes.
///
/// Resolves `.` and `..` components lexically and rejects anything that
/// would climb above the workspace root. Returns the canonical relative
/// form stored in manifests.
pub fn normalize_rel(rel: &str) -> Result<String, PathError> {
    let raw = rel.trim();
    if raw.is_empty() {
        return Err(PathError::Empty);
    }
    if raw.contains('\0') {
        return Err(PathError::ContainsNullByte);
    }

    let slashed = raw.replace('\\', "/");
    if slashed.starts_with('/') || has_drive_prefix(&slashed) {
        return Err(PathError::Absolute(raw.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in slashed.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if parts.pop().is_none() {
                    return Err(PathError::EscapesRoot(raw.to_string()));
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

/// Normalize `rel` and resolve it against `root`.
///
/// Returns the normalized relative form together with the absolute path.
/// Never touches the filesystem; the result is safe to create.
pub fn resolve(root: &Path, rel: &str) -> Result<(String, PathBuf), PathError> {
    let normalized = normalize_rel(rel)?;
    let abs = root.join(&normalized);
    Ok((normalized, abs))
}

/// Windows-style `C:` prefixes count as absolute even on unix hosts,
/// since manifests travel between machines.
fn has_drive_prefix(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}
