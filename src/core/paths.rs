//! Root canonicalisation and request path resolution.
//!
//! Every server is keyed by a [`ServerRoot`]: the canonical absolute form of
//! the folder with a trailing separator, so `/a/b`, `/a/b/` and `/a/./b`
//! all address the same server. Request paths are resolved against that root
//! segment by segment; anything that would climb above the root (including
//! through a symlink) is rejected before the file system is touched.
use std::{
    borrow::Cow,
    fmt,
    path::{Component, MAIN_SEPARATOR, Path, PathBuf},
};

use crate::core::error::{PreviewError, PreviewResult};

/// Canonical absolute folder served by exactly one static server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerRoot {
    path: PathBuf,
    key: String,
}

impl ServerRoot {
    /// Canonicalise `root` into its absolute, symlink-free, trailing-slash form.
    pub fn canonicalize(root: impl AsRef<Path>) -> PreviewResult<Self> {
        let raw = root.as_ref();
        let path = std::fs::canonicalize(raw).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PreviewError::NotFound(raw.display().to_string())
            } else {
                PreviewError::InvalidRoot {
                    root: raw.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !path.is_dir() {
            return Err(PreviewError::InvalidRoot {
                root: raw.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let mut key = path.to_string_lossy().into_owned();
        if !key.ends_with(MAIN_SEPARATOR) {
            key.push(MAIN_SEPARATOR);
        }

        Ok(Self { path, key })
    }

    /// Absolute path of the folder (no trailing separator).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registry key: absolute path with a trailing separator.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether `candidate` lies inside this root (or is the root itself).
    pub fn contains(&self, candidate: &Path) -> bool {
        candidate.starts_with(&self.path)
    }
}

impl fmt::Display for ServerRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Percent-decode a raw request path. Invalid UTF-8 yields `None`.
pub fn decode_request_path(raw: &str) -> Option<Cow<'_, str>> {
    urlencoding::decode(raw).ok()
}

/// Resolve a raw URI path against `root`.
///
/// Returns the absolute file system path the request refers to. The file does
/// not have to exist; a missing file is the file server's concern. Paths that
/// escape the root via `..`, absolute or prefixed segments, NUL bytes or
/// symlinks pointing outside the root yield [`PreviewError::PathTraversal`].
pub async fn resolve_request_path(root: &ServerRoot, raw_path: &str) -> PreviewResult<PathBuf> {
    let decoded = decode_request_path(raw_path)
        .ok_or_else(|| PreviewError::NotFound(raw_path.to_string()))?;

    let escape = || PreviewError::PathTraversal(PathBuf::from(raw_path));

    if decoded.contains('\0') {
        return Err(escape());
    }

    let mut resolved = root.path().to_path_buf();
    let mut depth = 0usize;

    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                if depth == 0 {
                    return Err(escape());
                }
                resolved.pop();
                depth -= 1;
            }
            other => {
                let is_plain = Path::new(other)
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)));
                if !is_plain {
                    return Err(escape());
                }
                resolved.push(other);
                depth += 1;
            }
        }
    }

    // Symlinks inside the tree may still point elsewhere.
    match tokio::fs::canonicalize(&resolved).await {
        Ok(real) if !root.contains(&real) => {
            tracing::warn!(
                "Symlink escape rejected: {} -> {}",
                resolved.display(),
                real.display()
            );
            Err(escape())
        }
        _ => Ok(resolved),
    }
}
