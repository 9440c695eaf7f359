//! Path confinement: every editor operation must stay under its root
//! (spec §4.1 "Path validation", testable property #1).

use crate::error::EngineError;
use std::path::{Component, Path, PathBuf};

/// Resolve `relative` against `root`, rejecting absolute paths, `..`
/// escapes, and symlink targets that land outside `root`.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, EngineError> {
    let relative_path = Path::new(relative);
    if relative_path.is_absolute() {
        return Err(EngineError::AccessDenied(format!(
            "absolute paths are not allowed: {relative}"
        )));
    }

    let mut joined = root.to_path_buf();
    for component in relative_path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::AccessDenied(format!(
                    "path escapes root: {relative}"
                )));
            }
        }
    }

    let root_canonical = root
        .canonicalize()
        .map_err(|e| EngineError::IOError(format!("cannot canonicalize root: {e}")))?;

    // The target itself may not exist yet (e.g. `create`); canonicalize the
    // deepest existing ancestor and re-append the remaining components so
    // symlink targets are still resolved without requiring the leaf to
    // already be on disk.
    let canonical = canonicalize_best_effort(&joined)?;

    if !canonical.starts_with(&root_canonical) {
        return Err(EngineError::AccessDenied(format!(
            "path escapes root: {relative}"
        )));
    }

    Ok(canonical)
}

fn canonicalize_best_effort(path: &Path) -> Result<PathBuf, EngineError> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::AccessDenied("path has no parent".to_string()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| EngineError::AccessDenied("path has no file name".to_string()))?;
    let canonical_parent = canonicalize_best_effort(parent)?;
    Ok(canonical_parent.join(file_name))
}
