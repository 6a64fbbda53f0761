//! The bundler capability consumed by build services.
//!
//! A [`Bundler`] performs the first full compile and hands back a
//! [`BundleHandle`] that owns whatever incremental state the bundler keeps.
//! The handle is exclusively owned by one build service: it is only ever
//! driven by one compile at a time and is disposed exactly once.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::correlate::{EntryPointSet, RawOutputFile};
use crate::diagnostics::Diagnostic;
use crate::error::Result;
use crate::externals::ExternalPolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Browser,
    Server,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn is_production(&self) -> bool {
        matches!(self, Mode::Production)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Development => write!(f, "development"),
            Mode::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMapMode {
    #[default]
    External,
    Inline,
    Hidden,
    None,
}

/// Everything a bundler needs to build one target.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Target name (`client`, `server`, `api`), used in logs and errors.
    pub target: String,
    /// Project root; module resolution and `package.json` lookups start here.
    pub root: PathBuf,
    pub entry_points: EntryPointSet,
    pub out_dir: PathBuf,
    pub platform: Platform,
    pub mode: Mode,
    pub external: ExternalPolicy,
    pub sourcemap: SourceMapMode,
    pub minify: bool,
    pub tree_shake: bool,
}

impl BundleConfig {
    pub fn new(
        target: impl Into<String>,
        root: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        entry_points: EntryPointSet,
    ) -> Self {
        Self {
            target: target.into(),
            root: root.into(),
            entry_points,
            out_dir: out_dir.into(),
            platform: Platform::Browser,
            mode: Mode::Development,
            external: ExternalPolicy::BundleAll,
            sourcemap: SourceMapMode::External,
            minify: false,
            tree_shake: true,
        }
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the mode along with the flags keyed off it: production minifies,
    /// development keeps output readable.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self.minify = mode.is_production();
        self.tree_shake = true;
        self
    }

    pub fn external(mut self, external: ExternalPolicy) -> Self {
        self.external = external;
        self
    }

    pub fn sourcemap(mut self, sourcemap: SourceMapMode) -> Self {
        self.sourcemap = sourcemap;
        self
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    pub fn tree_shake(mut self, tree_shake: bool) -> Self {
        self.tree_shake = tree_shake;
        self
    }
}

/// Files written by one successful compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compilation {
    pub outputs: Vec<RawOutputFile>,
    pub warnings: Vec<Diagnostic>,
}

/// The bundler rejected the sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileFailure {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic::error(message)],
        }
    }
}

#[async_trait]
pub trait Bundler: Send + Sync {
    /// First full compile. On success the returned handle owns the bundler's
    /// incremental state for this target.
    async fn compile(
        &self,
        config: &BundleConfig,
    ) -> std::result::Result<(Box<dyn BundleHandle>, Compilation), CompileFailure>;
}

#[async_trait]
pub trait BundleHandle: Send {
    /// Incremental recompile against the current sources.
    async fn rebuild(&mut self) -> std::result::Result<Compilation, CompileFailure>;

    /// Release the bundler's resources.
    async fn dispose(self: Box<Self>) -> Result<()>;
}
