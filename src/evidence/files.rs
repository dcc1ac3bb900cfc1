//! Filesystem policy for file-backed evidence.
//!
//! `add_file_span` never touches the filesystem itself: path legality and
//! line reading are delegated to an [`FsPolicy`]. [`LocalFsPolicy`] is the
//! default, restricting reads to allowed roots and rejecting denylisted paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;

/// Outcome of a path check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDecision {
    pub allowed: bool,
    pub reason: String,
}

impl PathDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Filesystem collaborator consumed by `add_file_span`
pub trait FsPolicy: Send + Sync {
    /// Map a caller-supplied path to the path that will be checked and read
    fn resolve(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    fn is_path_allowed(&self, path: &Path) -> PathDecision;

    /// Lines `start..=end` (1-based), each with its original line terminator.
    ///
    /// Returns fewer lines than requested when the file is shorter.
    fn read_lines(&self, path: &Path, start: usize, end: usize) -> io::Result<Vec<String>>;
}

/// Default denylist: files likely to hold secrets
pub fn default_denylist() -> Vec<String> {
    vec![
        "**/.env*".to_string(),
        "**/secrets*".to_string(),
        "**/*credential*".to_string(),
        "**/*.pem".to_string(),
        "**/*.key".to_string(),
    ]
}

/// Local filesystem policy
#[derive(Debug, Clone)]
pub struct LocalFsPolicy {
    /// Base for relative paths (current directory if unset)
    project_root: Option<PathBuf>,

    /// Reads are restricted to these roots; empty allows any path
    allowed_roots: Vec<PathBuf>,

    /// Glob patterns to reject
    denylist_patterns: Vec<String>,
}

impl Default for LocalFsPolicy {
    fn default() -> Self {
        Self {
            project_root: None,
            allowed_roots: Vec::new(),
            denylist_patterns: default_denylist(),
        }
    }
}

impl LocalFsPolicy {
    pub fn new(
        project_root: Option<PathBuf>,
        allowed_roots: Vec<PathBuf>,
        denylist_patterns: Vec<String>,
    ) -> Self {
        let allowed_roots = allowed_roots
            .into_iter()
            .map(|root| root.canonicalize().unwrap_or(root))
            .collect();
        Self {
            project_root,
            allowed_roots,
            denylist_patterns,
        }
    }

    /// Check if a path matches any denylist pattern
    pub fn is_denylisted(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.denylist_patterns.iter().any(|pattern_str| {
            Pattern::new(pattern_str)
                .map(|pattern| pattern.matches(&path_str) || pattern.matches(&file_name))
                .unwrap_or(false)
        })
    }
}

impl FsPolicy for LocalFsPolicy {
    fn resolve(&self, path: &Path) -> PathBuf {
        let expanded = match path.strip_prefix("~") {
            Ok(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| path.to_path_buf()),
            Err(_) => path.to_path_buf(),
        };

        let joined = match (&self.project_root, expanded.is_absolute()) {
            (Some(root), false) => root.join(&expanded),
            _ => expanded,
        };

        joined.canonicalize().unwrap_or(joined)
    }

    fn is_path_allowed(&self, path: &Path) -> PathDecision {
        if self.is_denylisted(path) {
            return PathDecision::deny("path matches denylist pattern");
        }

        if self.allowed_roots.is_empty() {
            return PathDecision::allow("no root restriction configured");
        }

        match self.allowed_roots.iter().find(|root| path.starts_with(root)) {
            Some(root) => PathDecision::allow(format!("inside allowed root {}", root.display())),
            None => PathDecision::deny("outside allowed roots"),
        }
    }

    fn read_lines(&self, path: &Path, start: usize, end: usize) -> io::Result<Vec<String>> {
        let bytes = fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);

        let skip = start.saturating_sub(1);
        let take = end.saturating_sub(skip);

        Ok(content
            .split_inclusive('\n')
            .skip(skip)
            .take(take)
            .map(str::to_string)
            .collect())
    }
}
