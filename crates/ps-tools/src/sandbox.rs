//! Workspace-relative path resolution and the sensitive-path filter.

use std::path::{Component, Path, PathBuf};

use ps_core::{PsError, PsResult};

/// Resolve `path` against `root`, rejecting absolute paths and any `..`
/// traversal that would land outside the root. The resolution is lexical,
/// so targets that do not exist yet (pending writes) still resolve.
pub fn safe_resolve(root: &Path, path: &str) -> PsResult<PathBuf> {
    if path.is_empty() {
        return Err(PsError::Policy("empty path".into()));
    }

    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(PsError::Policy(format!(
            "path escapes project root: {path}"
        )));
    }

    let mut parts: Vec<String> = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(segment) => parts.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(PsError::Policy(format!(
                        "path escapes project root: {path}"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PsError::Policy(format!(
                    "path escapes project root: {path}"
                )));
            }
        }
    }

    if parts.is_empty() {
        return Err(PsError::Policy(format!(
            "path resolves to the project root itself: {path}"
        )));
    }

    let mut resolved = root.to_path_buf();
    for part in parts {
        resolved.push(part);
    }
    Ok(resolved)
}

/// True when a root-relative path begins with `.git` or `node_modules`.
/// Such paths are never traversed by SEARCH.
pub fn is_sensitive(relative: &str) -> bool {
    let first = relative.split('/').next().unwrap_or(relative);
    first == ".git" || first == "node_modules"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_relative_path_resolves() {
        let root = Path::new("/project");
        let resolved = safe_resolve(root, "src/main.rs").unwrap();
        assert_eq!(resolved, PathBuf::from("/project/src/main.rs"));
    }

    #[test]
    fn test_dot_segments_normalized() {
        let root = Path::new("/project");
        let resolved = safe_resolve(root, "src/./a/../b.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/project/src/b.txt"));
    }

    #[test]
    fn test_absolute_path_rejected() {
        let err = safe_resolve(Path::new("/project"), "/etc/passwd").unwrap_err();
        assert!(err.to_string().starts_with("PolicyViolation:"));
    }

    #[test]
    fn test_parent_escape_rejected() {
        let err = safe_resolve(Path::new("/project"), "../outside.txt").unwrap_err();
        assert!(err.to_string().contains("escapes project root"));

        let err = safe_resolve(Path::new("/project"), "a/../../outside.txt").unwrap_err();
        assert!(err.to_string().contains("escapes project root"));
    }

    #[test]
    fn test_root_itself_rejected() {
        assert!(safe_resolve(Path::new("/project"), ".").is_err());
        assert!(safe_resolve(Path::new("/project"), "a/..").is_err());
    }

    #[test]
    fn test_sensitive_prefixes() {
        assert!(is_sensitive(".git"));
        assert!(is_sensitive(".git/config"));
        assert!(is_sensitive("node_modules/left-pad/index.js"));
        assert!(!is_sensitive("src/.gitignore"));
        assert!(!is_sensitive("gitlab/ci.yml"));
    }
}
