//! Which file changes are worth a rebuild.

use std::collections::BTreeSet;
use std::path::{Component, Path};

/// Source extensions that trigger rebuilds.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "mts", "cts", "css", "scss", "sass", "less", "html",
    "htm", "json", "mdx", "md", "svg",
];

/// Directories never watched for changes (dependencies, VCS, build output).
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", ".kiln", "dist", "build"];

/// Filter applied to every change before it reaches a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    extensions: BTreeSet<String>,
    excluded_dirs: BTreeSet<String>,
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self {
            extensions: SOURCE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChangeFilter {
    /// Exclude a directory. A bare name (`coverage`) is excluded wherever it
    /// appears; a relative path (`out/client`) only at that location under the
    /// watched root.
    pub fn exclude_dir(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        let dir = dir.trim_start_matches("./").trim_end_matches('/').to_string();
        if !dir.is_empty() {
            self.excluded_dirs.insert(dir);
        }
        self
    }

    pub fn exclude_dirs<I, S>(self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        dirs.into_iter().fold(self, |filter, dir| filter.exclude_dir(dir))
    }

    /// Extension and editor-temp-file check only. Used at ingest time, before
    /// the path is known to belong to any particular root.
    pub fn is_source_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.ends_with('~') || name.ends_with(".swp") || name.starts_with(".#") {
            return false;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
    }

    /// Full check for a change under `root`.
    pub fn accepts(&self, path: &Path, root: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        if !self.is_source_file(path) {
            return false;
        }

        let dirs: Vec<&str> = match relative.parent() {
            Some(parent) => parent
                .components()
                .filter_map(|c| match c {
                    Component::Normal(name) => name.to_str(),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        };

        for excluded in &self.excluded_dirs {
            if excluded.contains('/') {
                let prefix: Vec<&str> = excluded.split('/').filter(|s| !s.is_empty()).collect();
                if dirs.starts_with(&prefix) {
                    return false;
                }
            } else if dirs.iter().any(|d| *d == excluded.as_str()) {
                return false;
            }
        }

        true
    }
}
