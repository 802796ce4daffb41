//! File-write scope check.
//!
//! The `file_write` tool may write only under (a) the conversation's working
//! directory, (b) the workspace directory, or (c) the abilities subtree.
//! Core source subtrees are always refused, even when nested inside an
//! allowed root.

use std::path::{Component, Path, PathBuf};

/// Directory names that are never writable regardless of the allowed roots.
const FORBIDDEN_SUBTREES: &[&str] = &["src", "crates", ".git", "target"];

/// Check whether `target` may be written given the allowed roots.
///
/// Paths are normalised lexically (no filesystem access) so the check also
/// holds for files that do not exist yet. `..` components that escape an
/// allowed root are rejected.
pub fn check_write_scope(target: &Path, allowed_roots: &[PathBuf]) -> Result<(), String> {
    let normalized = normalize(target);

    let root = allowed_roots
        .iter()
        .map(|r| normalize(r))
        .find(|root| normalized.starts_with(root));

    let Some(root) = root else {
        return Err(format!(
            "path {} is outside every writable root",
            target.display()
        ));
    };

    // Inspect only the part below the allowed root: a root that itself lives
    // under e.g. /home/user/src must stay writable.
    let below = normalized.strip_prefix(&root).unwrap_or(&normalized);
    for comp in below.components() {
        if let Component::Normal(name) = comp {
            if let Some(name) = name.to_str() {
                if FORBIDDEN_SUBTREES.contains(&name) {
                    return Err(format!(
                        "path {} enters the protected '{}' subtree",
                        target.display(),
                        name
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Lexical normalisation: resolve `.` and `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/home/user/.aster/workspace"),
            PathBuf::from("/home/user/.aster/abilities"),
        ]
    }

    #[test]
    fn writes_inside_roots_pass() {
        assert!(check_write_scope(
            Path::new("/home/user/.aster/workspace/notes/todo.md"),
            &roots()
        )
        .is_ok());
        assert!(check_write_scope(
            Path::new("/home/user/.aster/abilities/weather/config.json"),
            &roots()
        )
        .is_ok());
    }

    #[test]
    fn writes_outside_roots_fail() {
        assert!(check_write_scope(Path::new("/etc/passwd"), &roots()).is_err());
        assert!(check_write_scope(Path::new("/home/user/other.txt"), &roots()).is_err());
    }

    #[test]
    fn dotdot_escape_is_caught() {
        assert!(check_write_scope(
            Path::new("/home/user/.aster/workspace/../../.bashrc"),
            &roots()
        )
        .is_err());
    }

    #[test]
    fn core_source_subtrees_are_refused() {
        assert!(check_write_scope(
            Path::new("/home/user/.aster/workspace/src/main.rs"),
            &roots()
        )
        .is_err());
        assert!(check_write_scope(
            Path::new("/home/user/.aster/workspace/project/.git/config"),
            &roots()
        )
        .is_err());
    }
}
