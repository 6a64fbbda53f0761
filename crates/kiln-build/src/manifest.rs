//! The persisted build manifest.
//!
//! After every published build the service writes `kiln-manifest.json` into
//! the target's output directory. A later process that never starts a bundler
//! (production serving) rebuilds the [`Output`] from it.
//!
//! ```json
//! {
//!   "main-3b1f09ac.js": { "entryPoint": "main", "kind": "script" },
//!   "main-3b1f09ac.css": { "entryPoint": "main", "kind": "style" }
//! }
//! ```
//!
//! Keys are paths relative to the output directory with `/` separators, so
//! the output directory can be moved or deployed elsewhere.
//!
//! The file is replaced with write-to-temp-then-rename so that readers never
//! observe a half-written manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use serde::{Deserialize, Serialize};

use crate::correlate::{Asset, AssetKind, EntryPointSet, Output};
use crate::error::Result;

/// File name of the manifest inside a target's output directory.
pub const MANIFEST_FILE: &str = "kiln-manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub entry_point: String,
    pub kind: AssetKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildManifest {
    files: BTreeMap<String, ManifestEntry>,
}

impl BuildManifest {
    /// Manifest location for an output directory.
    pub fn path_in(out_dir: &Path) -> PathBuf {
        out_dir.join(MANIFEST_FILE)
    }

    pub fn from_output(output: &Output) -> Self {
        let mut files = BTreeMap::new();
        for (name, assets) in output.iter() {
            for kind in [AssetKind::Script, AssetKind::Style] {
                if let Some(asset) = assets.get(kind) {
                    files.insert(
                        asset.relative_path.clone(),
                        ManifestEntry {
                            entry_point: name.to_string(),
                            kind,
                        },
                    );
                }
            }
        }
        Self { files }
    }

    /// Rebuild the output rooted at `out_root`.
    ///
    /// With `entries`, files recorded for entry points that no longer exist
    /// are dropped. Keys that would escape `out_root` are skipped.
    pub fn to_output(&self, out_root: &Path, entries: Option<&EntryPointSet>) -> Output {
        let mut output = Output::default();
        for (relative_path, entry) in &self.files {
            if entries.is_some_and(|set| !set.contains(&entry.entry_point)) {
                continue;
            }
            let Some(absolute_path) = contained_path(out_root, relative_path) else {
                tracing::warn!("Ignoring manifest entry outside the output directory: {}", relative_path);
                continue;
            };
            output.insert(
                entry.entry_point.clone(),
                entry.kind,
                Asset {
                    absolute_path,
                    relative_path: relative_path.clone(),
                },
            );
        }
        output
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, relative_path: &str) -> Option<&ManifestEntry> {
        self.files.get(relative_path)
    }

    /// Write the manifest to `path`, replacing any previous one atomically.
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| MANIFEST_FILE.to_string());
        let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let contents = serde_json::to_vec_pretty(self)?;
        if let Err(e) = tokio::fs::write(&temp_path, &contents).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!("Wrote build manifest {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

fn contained_path(root: &Path, relative: &str) -> Option<PathBuf> {
    if relative.is_empty() || relative.contains('\0') || Path::new(relative).is_absolute() {
        return None;
    }
    let root = root.clean();
    let full = root.join(relative).clean();
    (full.starts_with(&root) && full != root).then_some(full)
}
