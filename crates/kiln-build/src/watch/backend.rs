//! Change-notification backends.
//!
//! A backend registers roots with some notification source and pushes changed
//! paths into the [`ChangeSink`] it was connected with. [`NotifyBackend`] uses
//! the platform watcher; [`ManualBackend`] is fed by hand (tests, or an
//! embedder with its own change source).

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::journal::ChangeSink;
use crate::error::WatchError;

/// A connected notification source.
pub trait WatchBackend: Send + Sync {
    /// Start observing `root` recursively. Called at most once per root.
    fn watch(&self, root: &Path) -> Result<(), WatchError>;
}

/// Backend over `notify`'s recommended platform watcher.
pub struct NotifyBackend {
    watcher: Mutex<RecommendedWatcher>,
}

impl NotifyBackend {
    /// Create the platform watcher. This is the readiness handshake: failure
    /// here means live reload is unavailable.
    pub fn connect(sink: ChangeSink) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    sink.ingest(event.paths);
                }
            }
            Err(e) => tracing::warn!("File watcher error: {}", e),
        })
        .map_err(|e| WatchError::Handshake(e.to_string()))?;

        Ok(Self {
            watcher: Mutex::new(watcher),
        })
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&self, root: &Path) -> Result<(), WatchError> {
        self.watcher
            .lock()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Register {
                root: root.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// Hand-fed backend. Clone it before connecting to keep a handle for
/// [`emit`](ManualBackend::emit).
#[derive(Clone, Default)]
pub struct ManualBackend {
    inner: Arc<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    sink: OnceLock<ChangeSink>,
    roots: Mutex<Vec<PathBuf>>,
    handshake_failure: Option<String>,
    register_delay: Option<Duration>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose handshake fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                handshake_failure: Some(reason.into()),
                ..Default::default()
            }),
        }
    }

    /// A backend whose root registration blocks for `delay`, like a slow
    /// recursive scan.
    pub fn slow_to_register(delay: Duration) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                register_delay: Some(delay),
                ..Default::default()
            }),
        }
    }

    pub fn connect(&self, sink: ChangeSink) -> Result<Box<dyn WatchBackend>, WatchError> {
        if let Some(reason) = &self.inner.handshake_failure {
            return Err(WatchError::Handshake(reason.clone()));
        }
        if self.inner.sink.set(sink).is_err() {
            return Err(WatchError::Handshake(
                "manual backend is already connected".to_string(),
            ));
        }
        Ok(Box::new(self.clone()))
    }

    /// Report changed paths. Returns how many were recorded (zero before the
    /// backend is connected).
    pub fn emit<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        match self.inner.sink.get() {
            Some(sink) => sink.ingest(paths),
            None => 0,
        }
    }

    /// Roots registered so far.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.inner.roots.lock().clone()
    }
}

impl WatchBackend for ManualBackend {
    fn watch(&self, root: &Path) -> Result<(), WatchError> {
        if let Some(delay) = self.inner.register_delay {
            std::thread::sleep(delay);
        }
        self.inner.roots.lock().push(root.to_path_buf());
        Ok(())
    }
}
