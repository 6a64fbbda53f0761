//! Change-watch service.
//!
//! Wraps a change-notification backend behind three operations: read the
//! current [`Clock`], register a root with [`WatchService::watch`], and
//! [`subscribe`](WatchService::subscribe) to debounced batches of changes
//! that happened after a clock.
//!
//! Every operation first awaits the backend handshake. If the handshake
//! failed, they all return [`WatchError::Handshake`].

mod backend;
mod clock;
mod filter;
mod journal;

pub use backend::{ManualBackend, NotifyBackend, WatchBackend};
pub use clock::Clock;
pub use filter::{ChangeFilter, DEFAULT_EXCLUDED_DIRS, SOURCE_EXTENSIONS};
pub use journal::ChangeSink;

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::deferred::Deferred;
use crate::error::WatchError;
use journal::{ChangeRecord, Journal};

/// Default quiet period before a burst of changes is delivered.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub filter: ChangeFilter,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            filter: ChangeFilter::default(),
        }
    }
}

impl WatchOptions {
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn filter(mut self, filter: ChangeFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Arguments to [`WatchService::subscribe`].
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub root: PathBuf,
    /// Deliver changes after this clock. `None` means from now on.
    pub since: Option<Clock>,
}

impl SubscribeRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            since: None,
        }
    }

    pub fn since(mut self, clock: Clock) -> Self {
        self.since = Some(clock);
        self
    }
}

/// One debounced delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub root: PathBuf,
    /// Sorted and deduplicated.
    pub paths: Vec<PathBuf>,
    /// Clock of the newest change in the batch.
    pub clock: Clock,
    /// The subscriber fell behind and some changes were dropped; `paths` is
    /// incomplete.
    pub overflowed: bool,
}

type ChangeCallback = Arc<dyn Fn(ChangeBatch) + Send + Sync>;

/// Handle to the watch subsystem. Cheap to share behind an `Arc`.
pub struct WatchService {
    options: WatchOptions,
    journal: Arc<Journal>,
    backend: Deferred<Arc<dyn WatchBackend>, WatchError>,
    watched: Arc<Mutex<HashSet<PathBuf>>>,
    // held across a registration so each root reaches the backend once
    registering: tokio::sync::Mutex<()>,
}

impl WatchService {
    /// Watch service over the platform file watcher.
    ///
    /// Must be called from within a Tokio runtime; the handshake runs on a
    /// blocking thread.
    pub fn new(options: WatchOptions) -> Self {
        Self::with_backend(options, |sink| {
            NotifyBackend::connect(sink).map(|backend| Box::new(backend) as Box<dyn WatchBackend>)
        })
    }

    /// Watch service over a custom backend. `connect` is the handshake.
    pub fn with_backend<F>(options: WatchOptions, connect: F) -> Self
    where
        F: FnOnce(ChangeSink) -> Result<Box<dyn WatchBackend>, WatchError> + Send + 'static,
    {
        let journal = Arc::new(Journal::new(options.filter.clone()));
        let backend = Deferred::new();

        let sink = ChangeSink::new(Arc::clone(&journal));
        let settle = backend.clone();
        tokio::spawn(async move {
            let outcome = match tokio::task::spawn_blocking(move || connect(sink)).await {
                Ok(outcome) => outcome.map(<Arc<dyn WatchBackend>>::from),
                Err(e) => Err(WatchError::Handshake(e.to_string())),
            };
            let settled = match outcome {
                Ok(backend) => settle.resolve(backend),
                Err(e) => {
                    tracing::warn!("Watch handshake failed: {}", e);
                    settle.reject(e)
                }
            };
            debug_assert!(settled.is_ok());
        });

        Self {
            options,
            journal,
            backend,
            watched: Arc::new(Mutex::new(HashSet::new())),
            registering: tokio::sync::Mutex::new(()),
        }
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    /// Wait for the handshake with the underlying subsystem.
    pub async fn handshake(&self) -> Result<(), WatchError> {
        self.backend.wait().await.map(|_| ())
    }

    /// Current clock for a watched root.
    pub async fn clock(&self, root: &Path) -> Result<Clock, WatchError> {
        self.handshake().await?;
        let root = normalize_root(root).await;
        if !self.watched.lock().contains(&root) {
            return Err(WatchError::NotWatched(root));
        }
        Ok(self.journal.now())
    }

    /// Register a root for recursive observation. Idempotent.
    pub async fn watch(&self, root: &Path) -> Result<(), WatchError> {
        let backend = self.backend.wait().await?;
        let root = normalize_root(root).await;
        let _registering = self.registering.lock().await;
        if self.watched.lock().contains(&root) {
            return Ok(());
        }

        let register = root.clone();
        tokio::task::spawn_blocking(move || backend.watch(&register))
            .await
            .map_err(|e| WatchError::Register {
                root: root.clone(),
                reason: e.to_string(),
            })??;

        tracing::debug!("Watching {}", root.display());
        self.watched.lock().insert(root);
        Ok(())
    }

    /// Install `on_change` for changes under `request.root` after
    /// `request.since`.
    ///
    /// The callback always runs on a spawned task, never inside this call.
    /// Bursts are coalesced: a batch is delivered once no new change has
    /// arrived for the debounce period.
    pub async fn subscribe<F>(
        &self,
        request: SubscribeRequest,
        on_change: F,
    ) -> Result<Subscription, WatchError>
    where
        F: Fn(ChangeBatch) + Send + Sync + 'static,
    {
        self.handshake().await?;
        let root = normalize_root(&request.root).await;
        if !self.watched.lock().contains(&root) {
            return Err(WatchError::NotWatched(root));
        }

        let (rx, backlog) = self.journal.attach(request.since);
        let task = tokio::spawn(deliver(
            Arc::clone(&self.journal),
            root,
            self.options.debounce,
            backlog,
            rx,
            Arc::new(on_change),
        ));

        Ok(Subscription { task: Some(task) })
    }
}

/// An installed change callback. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn normalize_root(root: &Path) -> PathBuf {
    tokio::fs::canonicalize(root)
        .await
        .unwrap_or_else(|_| root.to_path_buf())
}

struct Pending {
    paths: BTreeSet<PathBuf>,
    clock: Option<Clock>,
    overflowed: bool,
}

impl Pending {
    fn new() -> Self {
        Self {
            paths: BTreeSet::new(),
            clock: None,
            overflowed: false,
        }
    }

    fn is_dirty(&self) -> bool {
        !self.paths.is_empty() || self.overflowed
    }

    fn absorb(&mut self, journal: &Journal, root: &Path, record: ChangeRecord) {
        if journal.filter().accepts(&record.path, root) {
            self.clock = Some(record.clock);
            self.paths.insert(record.path);
        }
    }

    fn take(&mut self, journal: &Journal, root: &Path) -> ChangeBatch {
        let batch = ChangeBatch {
            root: root.to_path_buf(),
            paths: std::mem::take(&mut self.paths).into_iter().collect(),
            clock: self.clock.take().unwrap_or_else(|| journal.now()),
            overflowed: self.overflowed,
        };
        self.overflowed = false;
        batch
    }
}

async fn deliver(
    journal: Arc<Journal>,
    root: PathBuf,
    debounce: Duration,
    backlog: Vec<ChangeRecord>,
    mut rx: broadcast::Receiver<ChangeRecord>,
    on_change: ChangeCallback,
) {
    let mut pending = Pending::new();
    for record in backlog {
        pending.absorb(&journal, &root, record);
    }

    loop {
        let received = if pending.is_dirty() {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(received) => Some(received),
                // quiet period elapsed
                Err(_) => None,
            }
        } else {
            Some(rx.recv().await)
        };

        match received {
            Some(Ok(record)) => pending.absorb(&journal, &root, record),
            Some(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "Change subscriber fell behind, rebuilding everything");
                pending.overflowed = true;
            }
            Some(Err(RecvError::Closed)) => break,
            None => {
                let batch = pending.take(&journal, &root);
                tracing::debug!(
                    changed = batch.paths.len(),
                    clock = %batch.clock,
                    "Delivering change batch"
                );
                on_change(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_service(debounce_ms: u64) -> (WatchService, ManualBackend) {
        let backend = ManualBackend::new();
        let connect = backend.clone();
        let service = WatchService::with_backend(
            WatchOptions::default().debounce(Duration::from_millis(debounce_ms)),
            move |sink| connect.connect(sink),
        );
        (service, backend)
    }

    #[tokio::test]
    async fn test_watch_is_idempotent() {
        let (service, backend) = manual_service(10);
        let root = Path::new("/virtual/project");

        service.watch(root).await.unwrap();
        service.watch(root).await.unwrap();
        assert_eq!(backend.roots(), vec![PathBuf::from("/virtual/project")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_watch_registers_once() {
        let backend = ManualBackend::slow_to_register(Duration::from_millis(50));
        let connect = backend.clone();
        let service = Arc::new(WatchService::with_backend(WatchOptions::default(), move |sink| {
            connect.connect(sink)
        }));
        let root = Path::new("/virtual/project");

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.watch(root).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert_eq!(backend.roots(), vec![PathBuf::from("/virtual/project")]);
        assert!(service.clock(root).await.is_ok());
    }

    #[tokio::test]
    async fn test_clock_requires_watched_root() {
        let (service, _backend) = manual_service(10);
        let err = service.clock(Path::new("/virtual/other")).await.unwrap_err();
        assert!(matches!(err, WatchError::NotWatched(_)));
    }

    #[tokio::test]
    async fn test_handshake_failure_rejects_everything() {
        let backend = ManualBackend::failing("no inotify");
        let service =
            WatchService::with_backend(WatchOptions::default(), move |sink| backend.connect(sink));
        let root = Path::new("/virtual/project");

        assert!(matches!(service.watch(root).await, Err(WatchError::Handshake(_))));
        assert!(matches!(service.clock(root).await, Err(WatchError::Handshake(_))));
        let subscribed = service.subscribe(SubscribeRequest::new(root), |_| {}).await;
        assert!(matches!(subscribed, Err(WatchError::Handshake(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_into_one_batch() {
        let (service, backend) = manual_service(50);
        let root = PathBuf::from("/virtual/project");
        service.watch(&root).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = service
            .subscribe(SubscribeRequest::new(&root), move |batch| {
                let _ = tx.send(batch);
            })
            .await
            .unwrap();

        backend.emit([root.join("src/b.ts"), root.join("src/a.ts")]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.emit([root.join("src/a.ts"), root.join("node_modules/x/index.js")]);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.paths, vec![root.join("src/a.ts"), root.join("src/b.ts")]);
        assert!(!batch.overflowed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_since_clock_are_replayed() {
        let (service, backend) = manual_service(10);
        let root = PathBuf::from("/virtual/project");
        service.watch(&root).await.unwrap();

        backend.emit([root.join("before.js")]);
        let since = service.clock(&root).await.unwrap();
        backend.emit([root.join("after.js")]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = service
            .subscribe(SubscribeRequest::new(&root).since(since), move |batch| {
                let _ = tx.send(batch);
            })
            .await
            .unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.paths, vec![root.join("after.js")]);
        assert!(batch.clock > since);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let (service, backend) = manual_service(10);
        let root = PathBuf::from("/virtual/project");
        service.watch(&root).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ChangeBatch>();
        let sub = service
            .subscribe(SubscribeRequest::new(&root), move |batch| {
                let _ = tx.send(batch);
            })
            .await
            .unwrap();
        assert!(sub.is_active());
        sub.unsubscribe();

        backend.emit([root.join("late.js")]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // the callback (and its sender) is gone with the task
        assert!(rx.recv().await.is_none());
    }
}
