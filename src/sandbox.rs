//! Allowlisted path resolution. Every user-supplied path is resolved here
//! before any IO so escapes fail fast with `SANDBOX_VIOLATION`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::errors::PipelineError;

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    allowlist: Vec<PathBuf>,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, allowlist: Vec<PathBuf>) -> Self {
        Self {
            root: normalize(&root.into()),
            allowlist: allowlist.iter().map(|path| normalize(path)).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a candidate path, rejecting anything outside the root and the
    /// allowlist. Relative paths resolve against the sandbox root.
    pub fn resolve(&self, candidate: &Path) -> Result<PathBuf> {
        let absolute = if candidate.is_absolute() {
            normalize(candidate)
        } else {
            normalize(&self.root.join(candidate))
        };
        if self.is_allowed(&absolute) {
            Ok(absolute)
        } else {
            Err(PipelineError::sandbox(format!(
                "Path {} escapes sandbox root {}",
                absolute.display(),
                self.root.display()
            ))
            .into())
        }
    }

    fn is_allowed(&self, target: &Path) -> bool {
        if target.starts_with(&self.root) {
            return true;
        }
        self.allowlist.iter().any(|allowed| target.starts_with(allowed))
    }
}

/// Lexically normalize `..` and `.` segments without touching the filesystem,
/// so escapes are caught even for paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
