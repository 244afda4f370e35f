//! Path checks for entry names taken from archive headers.

use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// Strip `.` components and reject absolute paths and `..` traversal.
///
/// Returns `None` when the path is unsafe or empty.
pub fn sanitize_path(path: &Path) -> Option<PathBuf> {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}
            Component::ParentDir => return None,
            Component::Prefix(_) | Component::RootDir => return None,
        }
    }
    if result.as_os_str().is_empty() {
        None
    } else {
        Some(result)
    }
}

/// File name a target entry installs as, after rejecting unsafe entry paths.
///
/// `entry_path` uses `/` separators. A drive-qualified name such as `C:x.esp`
/// is rejected too, since joining it on Windows would leave the destination.
pub fn safe_file_name(entry_path: &str) -> Result<String> {
    let unsafe_path = || EngineError::UnsafePath(entry_path.to_string());

    if entry_path.split('/').any(|part| part == "..") {
        return Err(unsafe_path());
    }
    let sanitized = sanitize_path(Path::new(entry_path)).ok_or_else(unsafe_path)?;
    let name = sanitized
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(unsafe_path)?;
    if name.contains(':') || name.contains('\\') {
        return Err(unsafe_path());
    }
    Ok(name.to_string())
}

/// Lexical containment check for a destination path built from a plan record
pub fn ensure_inside(base: &Path, candidate: &Path) -> Result<()> {
    let relative = candidate
        .strip_prefix(base)
        .map_err(|_| EngineError::UnsafePath(candidate.display().to_string()))?;
    match sanitize_path(relative) {
        Some(clean) if clean == relative => Ok(()),
        _ => Err(EngineError::UnsafePath(candidate.display().to_string())),
    }
}
