/// Confinement of terminal working directories to the permitted root
use std::path::{Component, Path, PathBuf};

use tracing::debug;

#[derive(Debug, Clone)]
pub struct WorkdirPolicy {
    root: PathBuf,
}

impl WorkdirPolicy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `candidate` to an existing directory inside the root.
    ///
    /// Relative candidates are taken relative to the root. Anything missing,
    /// outside the root (after `..` and symlinks are resolved) or not a
    /// directory yields the root itself.
    pub fn clamp(&self, candidate: Option<&Path>) -> PathBuf {
        let Some(candidate) = candidate.filter(|c| !c.as_os_str().is_empty()) else {
            return self.root.clone();
        };

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize_lexically(&joined);
        if !normalized.starts_with(&self.root) {
            debug!("Working directory {:?} escapes {:?}", candidate, self.root);
            return self.root.clone();
        }

        match normalized.canonicalize() {
            Ok(resolved) if resolved.starts_with(&self.root) && resolved.is_dir() => resolved,
            Ok(resolved) => {
                debug!(
                    "Working directory {:?} resolves to {:?}, using root",
                    candidate, resolved
                );
                self.root.clone()
            }
            Err(e) => {
                debug!("Working directory {:?} is unusable: {}", candidate, e);
                self.root.clone()
            }
        }
    }
}

/// Collapse `.` and `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> (tempfile::TempDir, WorkdirPolicy) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("projects/app")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let policy = WorkdirPolicy::new(dir.path());
        (dir, policy)
    }

    #[test]
    fn nested_directory_is_kept() {
        let (_dir, policy) = policy();
        let wanted = policy.root().join("projects/app");

        assert_eq!(policy.clamp(Some(wanted.as_path())), wanted);
        assert_eq!(policy.clamp(Some(Path::new("projects"))), policy.root().join("projects"));
    }

    #[test]
    fn escapes_fall_back_to_root() {
        let (_dir, policy) = policy();
        let root = policy.root().to_path_buf();

        assert_eq!(policy.clamp(Some(Path::new("/"))), root);
        assert_eq!(policy.clamp(Some(root.join("projects/../../..").as_path())), root);
        assert_eq!(policy.clamp(Some(Path::new("../"))), root);
    }

    #[test]
    fn missing_or_non_directories_fall_back_to_root() {
        let (_dir, policy) = policy();
        let root = policy.root().to_path_buf();

        assert_eq!(policy.clamp(None), root);
        assert_eq!(policy.clamp(Some(Path::new(""))), root);
        assert_eq!(policy.clamp(Some(root.join("nope").as_path())), root);
        assert_eq!(policy.clamp(Some(root.join("notes.txt").as_path())), root);
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        let parent = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(parent.path().join("home")).unwrap();
        std::fs::create_dir_all(parent.path().join("home2")).unwrap();
        let policy = WorkdirPolicy::new(parent.path().join("home"));

        let sibling = parent.path().canonicalize().unwrap().join("home2");
        assert_eq!(policy.clamp(Some(sibling.as_path())), policy.root().to_path_buf());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        let (_dir, policy) = policy();
        let outside = tempfile::tempdir().unwrap();
        let link = policy.root().join("escape");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        assert_eq!(policy.clamp(Some(link.as_path())), policy.root().to_path_buf());
    }
}
