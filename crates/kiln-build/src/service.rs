//! Build service: one bundler lifecycle with generation-guarded rebuilds.
//!
//! ```text
//! NotStarted -> Starting -> Ready(N) -> Rebuilding(N+1) -> Ready(N+1) -> ...
//!                  |                        |
//!                  +-> Failed(N, initial)   +-> Failed(N+1)
//!
//! any state -> Stopped
//! ```
//!
//! Every compile attempt gets a generation number and its own [`Deferred`].
//! Attempts run strictly one at a time: each one waits for the attempt before
//! it to settle and then takes the bundler handle lock. When an attempt
//! finishes after a newer one was requested, its result settles its own
//! deferred but is otherwise discarded, so readers only ever see the most
//! recently completed build or wait for the most recently requested one.
//!
//! Compile failures never surface as errors from this module. They go to the
//! [`ErrorReporter`] and make [`BuildService::ready`] return `None`. The only
//! errors returned are [`UsageError`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::bundler::{BundleConfig, BundleHandle, Bundler, Compilation};
use crate::correlate::{Output, correlate};
use crate::deferred::Deferred;
use crate::diagnostics::{self, Diagnostic, ErrorReporter, TerminalReporter};
use crate::error::{BuildFailure, Error, Result, UsageError};
use crate::manifest::BuildManifest;

/// Callback fired after every published build, with the target name.
pub type OnBuild = Arc<dyn Fn(&str, &Build) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Starting { generation: u64 },
    Ready { generation: u64 },
    Rebuilding { generation: u64 },
    /// `initial` is true when the first compile failed; the next rebuild
    /// then retries a full compile.
    Failed { generation: u64, initial: bool },
    Stopped,
}

/// What happened to the attempt a `start` or `rebuild` call ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Compiled and published.
    Built { generation: u64 },
    /// The bundler rejected the sources; diagnostics were reported.
    Failed { generation: u64 },
    /// Finished after a newer attempt was requested; result discarded.
    Superseded { generation: u64 },
    /// The service stopped before the attempt could run.
    Cancelled { generation: u64 },
}

impl BuildOutcome {
    pub fn generation(&self) -> u64 {
        match *self {
            BuildOutcome::Built { generation }
            | BuildOutcome::Failed { generation }
            | BuildOutcome::Superseded { generation }
            | BuildOutcome::Cancelled { generation } => generation,
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, BuildOutcome::Built { .. })
    }
}

/// A successful compile.
#[derive(Debug)]
pub struct Build {
    pub generation: u64,
    pub output: Arc<Output>,
    pub warnings: Vec<Diagnostic>,
}

type BuildDeferred = Deferred<Arc<Build>, BuildFailure>;

#[derive(Clone)]
struct Attempt {
    generation: u64,
    deferred: BuildDeferred,
}

struct State {
    phase: Phase,
    generation: u64,
    /// Most recently requested attempt.
    current: Option<Attempt>,
    last_output: Option<Arc<Output>>,
}

impl State {
    fn begin(&mut self) -> Attempt {
        self.generation += 1;
        let attempt = Attempt {
            generation: self.generation,
            deferred: Deferred::new(),
        };
        self.current = Some(attempt.clone());
        attempt
    }
}

enum Step {
    Start,
    Await(BuildDeferred),
    Incremental {
        attempt: Attempt,
        previous: Option<Attempt>,
    },
}

pub struct BuildService {
    config: BundleConfig,
    bundler: Arc<dyn Bundler>,
    reporter: Arc<dyn ErrorReporter>,
    on_build: Option<OnBuild>,
    state: Mutex<State>,
    handle: tokio::sync::Mutex<Option<Box<dyn BundleHandle>>>,
    persisted: OnceCell<Arc<Output>>,
}

impl BuildService {
    pub fn new(config: BundleConfig, bundler: Arc<dyn Bundler>) -> Self {
        Self {
            config,
            bundler,
            reporter: Arc::new(TerminalReporter::new()),
            on_build: None,
            state: Mutex::new(State {
                phase: Phase::NotStarted,
                generation: 0,
                current: None,
                last_output: None,
            }),
            handle: tokio::sync::Mutex::new(None),
            persisted: OnceCell::new(),
        }
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn on_build<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Build) + Send + Sync + 'static,
    {
        self.on_build = Some(Arc::new(callback));
        self
    }

    pub fn target(&self) -> &str {
        &self.config.target
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    pub fn out_dir(&self) -> &Path {
        &self.config.out_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        BuildManifest::path_in(&self.config.out_dir)
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Generation of the most recently requested attempt (0 before the first).
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Output of the most recently published build, whatever happened since.
    pub fn last_output(&self) -> Option<Arc<Output>> {
        self.state.lock().last_output.clone()
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().phase == Phase::Stopped
    }

    fn stopped_error(&self) -> Error {
        UsageError::Stopped {
            target: self.config.target.clone(),
        }
        .into()
    }

    /// First full compile.
    ///
    /// Allowed once, or again after the first compile failed.
    pub async fn start(&self) -> Result<BuildOutcome> {
        let attempt = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Stopped => return Err(self.stopped_error()),
                Phase::NotStarted | Phase::Failed { initial: true, .. } => {}
                _ => {
                    return Err(UsageError::AlreadyStarted {
                        target: self.config.target.clone(),
                    }
                    .into());
                }
            }
            let attempt = state.begin();
            state.phase = Phase::Starting {
                generation: attempt.generation,
            };
            attempt
        };

        tracing::debug!(target_name = %self.config.target, generation = attempt.generation, "Starting build");
        let started = Instant::now();

        let result = {
            let mut guard = self.handle.lock().await;
            if self.is_stopped() {
                let stale = guard.take();
                drop(guard);
                self.dispose(stale).await;
                Err(self.cancelled())
            } else {
                match self.bundler.compile(&self.config).await {
                    Ok((handle, compilation)) => {
                        // a failed earlier start leaves no handle behind
                        let replaced = guard.replace(handle);
                        drop(guard);
                        self.dispose(replaced).await;
                        Ok(compilation)
                    }
                    Err(failure) => Err(self.compile_failure(failure.diagnostics)),
                }
            }
        };
        self.reap_if_stopped().await;

        Ok(self.publish(attempt, result, true, started).await)
    }

    /// Recompile against the current sources.
    ///
    /// Delegates to [`start`](Self::start) when the service never started or
    /// its first compile failed. Waits out a pending first compile. Otherwise
    /// queues an incremental rebuild behind any attempt still in flight.
    pub async fn rebuild(&self) -> Result<BuildOutcome> {
        loop {
            let step = {
                let mut state = self.state.lock();
                match state.phase {
                    Phase::Stopped => return Err(self.stopped_error()),
                    Phase::NotStarted | Phase::Failed { initial: true, .. } => Step::Start,
                    Phase::Starting { .. } => match &state.current {
                        Some(attempt) => Step::Await(attempt.deferred.clone()),
                        None => Step::Start,
                    },
                    Phase::Ready { .. } | Phase::Rebuilding { .. } | Phase::Failed { .. } => {
                        let previous = state.current.clone();
                        let attempt = state.begin();
                        state.phase = Phase::Rebuilding {
                            generation: attempt.generation,
                        };
                        Step::Incremental { attempt, previous }
                    }
                }
            };

            match step {
                Step::Start => match self.start().await {
                    // another caller got there first; look again
                    Err(Error::Usage(UsageError::AlreadyStarted { .. })) => continue,
                    other => return other,
                },
                Step::Await(deferred) => {
                    let _ = deferred.wait().await;
                }
                Step::Incremental { attempt, previous } => {
                    return Ok(self.run_incremental(attempt, previous).await);
                }
            }
        }
    }

    async fn run_incremental(&self, attempt: Attempt, previous: Option<Attempt>) -> BuildOutcome {
        if let Some(previous) = previous {
            let _ = previous.deferred.wait().await;
        }

        tracing::debug!(target_name = %self.config.target, generation = attempt.generation, "Rebuilding");
        let started = Instant::now();

        let result = {
            let mut guard = self.handle.lock().await;
            if self.is_stopped() {
                let stale = guard.take();
                drop(guard);
                self.dispose(stale).await;
                Err(self.cancelled())
            } else {
                match guard.as_mut() {
                    Some(handle) => handle
                        .rebuild()
                        .await
                        .map_err(|failure| self.compile_failure(failure.diagnostics)),
                    None => Err(self.compile_failure(vec![Diagnostic::error(
                        "bundler handle is not available",
                    )])),
                }
            }
        };
        self.reap_if_stopped().await;

        self.publish(attempt, result, false, started).await
    }

    fn cancelled(&self) -> BuildFailure {
        BuildFailure::Stopped {
            target: self.config.target.clone(),
        }
    }

    fn compile_failure(&self, diagnostics: Vec<Diagnostic>) -> BuildFailure {
        BuildFailure::Compile {
            target: self.config.target.clone(),
            diagnostics,
        }
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.state.lock().generation != generation
    }

    async fn publish(
        &self,
        attempt: Attempt,
        result: std::result::Result<Compilation, BuildFailure>,
        initial: bool,
        started: Instant,
    ) -> BuildOutcome {
        let generation = attempt.generation;
        let target = self.config.target.as_str();

        // a compile that finishes after stop publishes nothing
        let result = if self.is_stopped() { Err(self.cancelled()) } else { result };
        let compilation = match result {
            Ok(compilation) => compilation,
            Err(failure) => return self.publish_failure(attempt, failure, initial),
        };

        for warning in &compilation.warnings {
            tracing::warn!("[{}] {}", target, warning.message);
        }
        let output = Arc::new(correlate(
            &self.config.entry_points,
            &self.config.out_dir,
            &compilation.outputs,
        ));
        let build = Arc::new(Build {
            generation,
            output: Arc::clone(&output),
            warnings: compilation.warnings,
        });

        if self.is_superseded(generation) {
            tracing::debug!(target_name = %target, generation, "Discarding superseded build");
            let settled = attempt.deferred.resolve(build);
            debug_assert!(settled.is_ok(), "generation {} settled twice", generation);
            return BuildOutcome::Superseded { generation };
        }

        let manifest_path = self.manifest_path();
        if let Err(e) = BuildManifest::from_output(&output).persist(&manifest_path).await {
            tracing::warn!(
                "Failed to write build manifest {}: {}",
                manifest_path.display(),
                e
            );
        }

        {
            let mut state = self.state.lock();
            // nothing newer can have completed: newer attempts wait on this one
            state.last_output = Some(Arc::clone(&output));
            if state.generation == generation && state.phase != Phase::Stopped {
                state.phase = Phase::Ready { generation };
            }
        }
        let settled = attempt.deferred.resolve(Arc::clone(&build));
        debug_assert!(settled.is_ok(), "generation {} settled twice", generation);

        tracing::info!(
            "Built {} ({} entr{}) in {}ms",
            target,
            output.len(),
            if output.len() == 1 { "y" } else { "ies" },
            started.elapsed().as_millis()
        );
        if let Some(on_build) = &self.on_build {
            on_build(target, &build);
        }

        BuildOutcome::Built { generation }
    }

    fn publish_failure(&self, attempt: Attempt, failure: BuildFailure, initial: bool) -> BuildOutcome {
        let generation = attempt.generation;
        let superseded = self.is_superseded(generation);

        let outcome = match &failure {
            BuildFailure::Stopped { .. } => BuildOutcome::Cancelled { generation },
            BuildFailure::Compile { .. } if superseded => {
                tracing::debug!(target_name = %self.config.target, generation, "Discarding superseded failure");
                BuildOutcome::Superseded { generation }
            }
            BuildFailure::Compile { diagnostics, .. } => {
                self.reporter.report(
                    &diagnostics::summarize(&self.config.target, diagnostics),
                    &diagnostics::locations(diagnostics),
                );
                let mut state = self.state.lock();
                if state.phase != Phase::Stopped {
                    state.phase = Phase::Failed {
                        generation,
                        initial,
                    };
                }
                BuildOutcome::Failed { generation }
            }
        };

        let settled = attempt.deferred.reject(failure);
        debug_assert!(settled.is_ok(), "generation {} settled twice", generation);
        outcome
    }

    /// Wait for the current build and return its output.
    ///
    /// Never started in this process: the output is loaded from the persisted
    /// manifest (cached once loaded). Otherwise waits for the most recently
    /// requested attempt, never for a later one. `None` means the artifact is
    /// missing or the build failed.
    pub async fn ready(&self) -> Result<Option<Arc<Output>>> {
        let deferred = {
            let state = self.state.lock();
            match state.phase {
                Phase::Stopped => return Err(self.stopped_error()),
                Phase::NotStarted => None,
                _ => state.current.as_ref().map(|attempt| attempt.deferred.clone()),
            }
        };

        match deferred {
            Some(deferred) => Ok(deferred
                .wait()
                .await
                .ok()
                .map(|build| Arc::clone(&build.output))),
            None => Ok(self.load_persisted().await),
        }
    }

    async fn load_persisted(&self) -> Option<Arc<Output>> {
        let path = self.manifest_path();
        let loaded = self
            .persisted
            .get_or_try_init(|| async {
                let manifest = BuildManifest::load(&path).await?;
                let output = manifest.to_output(&self.config.out_dir, Some(&self.config.entry_points));
                Ok::<_, Error>(Arc::new(output))
            })
            .await;

        match loaded {
            Ok(output) => Some(Arc::clone(output)),
            Err(e) => {
                tracing::warn!(
                    "No usable build manifest for {} at {}: {}",
                    self.config.target,
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Release the bundler handle. Idempotent, never fails, never waits for
    /// an in-flight compile: that attempt releases the handle when it ends.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
        }
        tracing::debug!(target_name = %self.config.target, "Stopping build service");
        self.reap_if_stopped().await;
    }

    async fn reap_if_stopped(&self) {
        if !self.is_stopped() {
            return;
        }
        let handle = match self.handle.try_lock() {
            Ok(mut guard) => guard.take(),
            // the holder checks again after releasing
            Err(_) => return,
        };
        self.dispose(handle).await;
    }

    async fn dispose(&self, handle: Option<Box<dyn BundleHandle>>) {
        let Some(handle) = handle else {
            return;
        };
        if let Err(e) = handle.dispose().await {
            tracing::debug!(target_name = %self.config.target, "Ignoring dispose error: {}", e);
        }
    }
}

impl std::fmt::Debug for BuildService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildService")
            .field("target", &self.config.target)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
