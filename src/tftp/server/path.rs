//! Maps request filenames onto the served directory tree

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty filename")]
    Empty,
    #[error("absolute paths are not allowed")]
    Absolute,
    #[error("path traversal is not allowed")]
    Traversal,
    #[error("path escapes the root directory")]
    OutsideRoot,
}

/// Resolves `filename` below `root`.
///
/// Backslashes are treated as separators, `.` and empty segments are
/// dropped, and absolute names or `..` components are rejected. If any
/// ancestor of the result already exists, it must canonicalise to a path
/// inside `root`, so symlinks cannot lead out of the tree. A dangling
/// symlink counts as existing and fails to canonicalise. The target
/// itself does not have to exist.
///
/// `root` is expected to be canonical already.
pub async fn resolve(root: &Path, filename: &str) -> Result<PathBuf, PathError> {
    let normalized = filename.replace('\\', "/");

    if normalized.starts_with('/') || Path::new(&normalized).has_root() {
        return Err(PathError::Absolute);
    }

    let mut relative = PathBuf::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(PathError::Traversal),
            segment => {
                // Windows drive prefixes such as `C:` show up here
                if Path::new(segment)
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(PathError::Absolute);
                }
                relative.push(segment);
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }

    let candidate = root.join(&relative);

    let mut probe = Some(candidate.as_path());
    while let Some(path) = probe {
        // symlink_metadata does not follow the final link
        if tokio::fs::symlink_metadata(path).await.is_ok() {
            let canonical = tokio::fs::canonicalize(path)
                .await
                .map_err(|_| PathError::OutsideRoot)?;
            if !canonical.starts_with(root) {
                return Err(PathError::OutsideRoot);
            }
            break;
        }
        probe = path.parent();
    }

    Ok(candidate)
}
