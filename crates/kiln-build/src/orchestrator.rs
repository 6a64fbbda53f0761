//! Several named build services driven by one change subscription.
//!
//! Every change batch rebuilds every target. There is no dependency-graph
//! pruning; rebuilds are incremental and cheap enough.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::correlate::Output;
use crate::error::{Error, Result, UsageError, WatchError};
use crate::service::{BuildOutcome, BuildService};
use crate::watch::{SubscribeRequest, Subscription, WatchService};

const EVENT_CAPACITY: usize = 64;

/// Published after each change-triggered rebuild round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BuildEvent {
    /// At least one target published a new build.
    Rebuilt {
        changed: Vec<PathBuf>,
        targets: Vec<String>,
    },
    /// A target failed to compile.
    Failed { target: String },
}

pub struct Orchestrator {
    targets: IndexMap<String, Arc<BuildService>>,
    events: broadcast::Sender<BuildEvent>,
    subscription: Mutex<Option<Subscription>>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            targets: IndexMap::new(),
            events,
            subscription: Mutex::new(None),
        }
    }

    /// Add a target, returning the service it replaced.
    pub fn add(&mut self, name: impl Into<String>, service: Arc<BuildService>) -> Option<Arc<BuildService>> {
        self.targets.insert(name.into(), service)
    }

    pub fn with_target(mut self, name: impl Into<String>, service: Arc<BuildService>) -> Self {
        self.add(name, service);
        self
    }

    pub fn service(&self, name: &str) -> Option<&Arc<BuildService>> {
        self.targets.get(name)
    }

    /// Target names in insertion order.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn subscribe_builds(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    /// Start every target concurrently. Outcomes are in insertion order.
    pub async fn start_all(&self) -> Result<Vec<(String, BuildOutcome)>> {
        self.run_all(|service| async move { service.start().await }).await
    }

    /// Rebuild every target concurrently, then publish a [`BuildEvent`].
    pub async fn rebuild_all(&self, changed: Vec<PathBuf>) -> Result<Vec<(String, BuildOutcome)>> {
        let outcomes = self.run_all(|service| async move { service.rebuild().await }).await?;

        let mut built = Vec::new();
        for (name, outcome) in &outcomes {
            match outcome {
                BuildOutcome::Built { .. } => built.push(name.clone()),
                BuildOutcome::Failed { .. } => {
                    let _ = self.events.send(BuildEvent::Failed {
                        target: name.clone(),
                    });
                }
                BuildOutcome::Superseded { .. } | BuildOutcome::Cancelled { .. } => {}
            }
        }
        if !built.is_empty() {
            let _ = self.events.send(BuildEvent::Rebuilt {
                changed,
                targets: built,
            });
        }

        Ok(outcomes)
    }

    async fn run_all<F, Fut>(&self, run: F) -> Result<Vec<(String, BuildOutcome)>>
    where
        F: Fn(Arc<BuildService>) -> Fut,
        Fut: Future<Output = Result<BuildOutcome>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for (index, service) in self.targets.values().enumerate() {
            let fut = run(Arc::clone(service));
            set.spawn(async move { (index, fut.await) });
        }

        let mut results: Vec<Option<Result<BuildOutcome>>> = Vec::new();
        results.resize_with(self.targets.len(), || None);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => return Err(Error::Bundler(format!("build task failed: {}", e))),
            }
        }

        let mut outcomes = Vec::with_capacity(results.len());
        for (name, result) in self.targets.keys().zip(results) {
            match result {
                Some(result) => outcomes.push((name.clone(), result?)),
                None => return Err(Error::Bundler(format!("build task for '{}' vanished", name))),
            }
        }
        Ok(outcomes)
    }

    /// Current output of a target. See [`BuildService::ready`].
    pub async fn resolve(&self, name: &str) -> Result<Option<Arc<Output>>> {
        match self.targets.get(name) {
            Some(service) => service.ready().await,
            None => Err(UsageError::UnknownTarget(name.to_string()).into()),
        }
    }

    /// Rebuild every target whenever something under `root` changes.
    ///
    /// Replaces any earlier subscription. Fails when the watch handshake
    /// failed, which development mode treats as fatal.
    pub async fn watch(self: &Arc<Self>, watcher: &WatchService, root: &Path) -> Result<(), WatchError> {
        watcher.watch(root).await?;
        let since = watcher.clock(root).await?;

        let this: Weak<Self> = Arc::downgrade(self);
        let subscription = watcher
            .subscribe(SubscribeRequest::new(root).since(since), move |batch| {
                let Some(this) = this.upgrade() else {
                    return;
                };
                tracing::info!(
                    "{} file(s) changed, rebuilding {} target(s)",
                    batch.paths.len(),
                    this.targets.len()
                );
                tokio::spawn(async move {
                    if let Err(e) = this.rebuild_all(batch.paths).await {
                        tracing::error!("Rebuild failed: {}", e);
                    }
                });
            })
            .await?;

        *self.subscription.lock() = Some(subscription);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Drop the change subscription and stop every target.
    pub async fn stop_all(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        for service in self.targets.values() {
            service.stop().await;
        }
    }
}
