//! Error types for kiln-build.
//!
//! Three families, matching how far each one is allowed to travel:
//!
//! - [`Error`] is returned from public operations. Compile failures never appear
//!   here; the only variants a build service returns are [`Error::Usage`].
//! - [`BuildFailure`] is the cloneable rejection carried by a build attempt's
//!   deferred. Readers see it as `ready() -> None`.
//! - [`WatchError`] covers the change-watch handshake and registration.

use std::path::PathBuf;
use thiserror::Error;

use crate::diagnostics::Diagnostic;

/// Top-level error type for kiln-build operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Programming error on the caller's side. Never swallowed.
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// I/O error (manifest persistence, virtual entry materialisation).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest JSON could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Change-watch failure.
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// Bundler collaborator failed outside of a compile (e.g. during dispose).
    #[error("Bundler error: {0}")]
    Bundler(String),
}

/// Result type alias for kiln-build operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Caller bugs: double settlement, operating on a stopped service, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// A deferred value was resolved or rejected a second time.
    #[error("deferred value already settled")]
    AlreadySettled,

    /// `start()` was called on a service that already started.
    #[error("build target '{target}' already started")]
    AlreadyStarted { target: String },

    /// An operation other than `stop()` was called after `stop()`.
    #[error("build target '{target}' is stopped")]
    Stopped { target: String },

    /// The orchestrator does not own a target with this name.
    #[error("unknown build target '{0}'")]
    UnknownTarget(String),
}

/// Why a build attempt produced no output.
#[derive(Debug, Clone, Error)]
pub enum BuildFailure {
    /// The bundler rejected the sources.
    #[error("build of '{target}' failed with {} error(s)", .diagnostics.len())]
    Compile {
        target: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// The service was stopped before the attempt could run.
    #[error("build of '{target}' was cancelled because the service stopped")]
    Stopped { target: String },
}

impl BuildFailure {
    /// Diagnostics attached to this failure (empty unless it is a compile error).
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            BuildFailure::Compile { diagnostics, .. } => diagnostics,
            BuildFailure::Stopped { .. } => &[],
        }
    }
}

/// Change-watch errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The underlying watch subsystem could not be brought up.
    #[error("watch subsystem handshake failed: {0}")]
    Handshake(String),

    /// `subscribe` was called for a root that was never registered with `watch`.
    #[error("root is not being watched: {}", .0.display())]
    NotWatched(PathBuf),

    /// The subsystem refused to observe a root.
    #[error("failed to watch {}: {reason}", .root.display())]
    Register { root: PathBuf, reason: String },
}
