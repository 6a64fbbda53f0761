//! Output correlation: from raw bundler output files to named entry points.
//!
//! Correlation is pattern based and never depends on the order in which the
//! bundler reported its files. For every output file:
//!
//! 1. The kind comes from the extension: `js`, `mjs` and `cjs` are scripts,
//!    `css` is a style. Anything else (source maps, images, chunks of other
//!    kinds) is skipped.
//! 2. The logical stem is the file stem with an optional trailing
//!    `-<hash>` removed, where the hash is at least four ASCII alphanumeric
//!    or `_` characters.
//! 3. The full stem and then the logical stem are matched against entry point
//!    names. Failing that, they are matched against the file stems of `File`
//!    sources and the ids of `Virtual` sources, whenever one of those belongs
//!    to exactly one entry.
//! 4. Files are visited in sorted path order and the first file per
//!    (entry, kind) wins. Files outside the output root or with no matching
//!    entry are ignored.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where an entry point's source lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum EntrySource {
    /// A file on disk.
    File { path: PathBuf },
    /// Source synthesized in memory, such as a boot shim.
    Virtual { id: String, contents: String },
}

impl EntrySource {
    fn correlation_stem(&self) -> Option<&str> {
        match self {
            EntrySource::File { path } => path.file_stem().and_then(|s| s.to_str()),
            EntrySource::Virtual { id, .. } => Some(id.as_str()),
        }
    }
}

/// Named entry points of one build target. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointSet {
    entries: BTreeMap<String, EntrySource>,
}

impl EntryPointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning the source it replaced.
    pub fn insert(&mut self, name: impl Into<String>, source: EntrySource) -> Option<EntrySource> {
        self.entries.insert(name.into(), source)
    }

    pub fn insert_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Option<EntrySource> {
        self.insert(name, EntrySource::File { path: path.into() })
    }

    pub fn insert_virtual(
        &mut self,
        name: impl Into<String>,
        id: impl Into<String>,
        contents: impl Into<String>,
    ) -> Option<EntrySource> {
        self.insert(
            name,
            EntrySource::Virtual {
                id: id.into(),
                contents: contents.into(),
            },
        )
    }

    pub fn with_file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert_file(name, path);
        self
    }

    pub fn get(&self, name: &str) -> Option<&EntrySource> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntrySource)> {
        self.entries.iter().map(|(name, source)| (name.as_str(), source))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A file the bundler wrote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawOutputFile {
    /// Absolute path on disk.
    pub path: PathBuf,
}

impl RawOutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Script,
    Style,
}

impl AssetKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "js" | "mjs" | "cjs" => Some(AssetKind::Script),
            "css" => Some(AssetKind::Style),
            _ => None,
        }
    }
}

/// One emitted file for an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub absolute_path: PathBuf,
    /// Relative to the output root, `/`-separated. Used to build serving URLs.
    pub relative_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Asset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<Asset>,
}

impl EntryAssets {
    pub fn get(&self, kind: AssetKind) -> Option<&Asset> {
        match kind {
            AssetKind::Script => self.script.as_ref(),
            AssetKind::Style => self.style.as_ref(),
        }
    }

    fn slot(&mut self, kind: AssetKind) -> &mut Option<Asset> {
        match kind {
            AssetKind::Script => &mut self.script,
            AssetKind::Style => &mut self.style,
        }
    }
}

/// Correlated build output: entry point name to its emitted assets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Output {
    entries: BTreeMap<String, EntryAssets>,
}

impl Output {
    pub fn get(&self, name: &str) -> Option<&EntryAssets> {
        self.entries.get(name)
    }

    pub fn script(&self, name: &str) -> Option<&Asset> {
        self.get(name).and_then(|assets| assets.script.as_ref())
    }

    pub fn style(&self, name: &str) -> Option<&Asset> {
        self.get(name).and_then(|assets| assets.style.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntryAssets)> {
        self.entries.iter().map(|(name, assets)| (name.as_str(), assets))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Content address of this output, derived from the emitted relative paths.
    /// Content-hashed file names make this change whenever any asset changes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (name, assets) in &self.entries {
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
            for kind in [AssetKind::Script, AssetKind::Style] {
                if let Some(asset) = assets.get(kind) {
                    hasher.update(asset.relative_path.as_bytes());
                }
                hasher.update(b"\0");
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    pub(crate) fn insert(&mut self, name: String, kind: AssetKind, asset: Asset) -> bool {
        let slot = self.entries.entry(name).or_default().slot(kind);
        if slot.is_some() {
            return false;
        }
        *slot = Some(asset);
        true
    }
}

/// Map raw output files to entry points. See the module docs for the rules.
pub fn correlate(entries: &EntryPointSet, out_root: &Path, outputs: &[RawOutputFile]) -> Output {
    let matcher = Matcher::new(entries);

    let mut files: Vec<&RawOutputFile> = outputs.iter().collect();
    files.sort();
    files.dedup();

    let mut output = Output::default();
    for file in files {
        let Some(kind) = AssetKind::from_path(&file.path) else {
            continue;
        };
        let Some(relative_path) = relative_url_path(&file.path, out_root) else {
            tracing::trace!("Skipping output outside {}: {}", out_root.display(), file.path.display());
            continue;
        };
        let Some(stem) = file.path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(name) = matcher.find(stem) else {
            continue;
        };

        output.insert(
            name.to_string(),
            kind,
            Asset {
                absolute_path: file.path.clone(),
                relative_path,
            },
        );
    }
    output
}

struct Matcher<'a> {
    entries: &'a EntryPointSet,
    /// Source stems that belong to exactly one entry.
    stems: HashMap<&'a str, Option<&'a str>>,
}

impl<'a> Matcher<'a> {
    fn new(entries: &'a EntryPointSet) -> Self {
        let mut stems: HashMap<&str, Option<&str>> = HashMap::new();
        for (name, source) in entries.iter() {
            if let Some(stem) = source.correlation_stem() {
                stems
                    .entry(stem)
                    .and_modify(|owner| *owner = None)
                    .or_insert(Some(name));
            }
        }
        Self { entries, stems }
    }

    fn find(&self, file_stem: &str) -> Option<&'a str> {
        let logical = logical_stem(file_stem);
        let candidates = [file_stem, logical];

        for candidate in candidates {
            if let Some((name, _)) = self.entries.entries.get_key_value(candidate) {
                return Some(name.as_str());
            }
        }
        candidates
            .into_iter()
            .find_map(|candidate| self.stems.get(candidate).copied().flatten())
    }
}

/// Strip a trailing `-<hash>` from a file stem.
pub fn logical_stem(stem: &str) -> &str {
    match stem.rsplit_once('-') {
        Some((base, hash))
            if !base.is_empty()
                && hash.len() >= 4
                && hash.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            base
        }
        _ => stem,
    }
}

/// `path` relative to `root` with `/` separators, or `None` when it is not
/// under `root`.
pub fn relative_url_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
