//! Scripted bundler for driving build services deterministically.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kiln_build::{
    BundleConfig, BundleHandle, Bundler, Compilation, CompileFailure, Diagnostic, EntryPointSet,
    Location, RawOutputFile,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// One scripted compile.
pub struct Step {
    result: Result<Vec<String>, String>,
    gate: Option<Arc<Notify>>,
}

impl Step {
    /// Succeed, writing these files (relative to the output directory).
    pub fn ok(files: &[&str]) -> Self {
        Self {
            result: Ok(files.iter().map(|f| f.to_string()).collect()),
            gate: None,
        }
    }

    /// Fail with one located diagnostic.
    pub fn fail(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            gate: None,
        }
    }

    /// Hold the compile until the returned gate is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }
}

#[derive(Default)]
pub struct Counters {
    pub compiles: AtomicUsize,
    pub rebuilds: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub disposed: AtomicUsize,
}

impl Counters {
    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

struct Inner {
    steps: Mutex<VecDeque<Step>>,
    counters: Arc<Counters>,
}

impl Inner {
    async fn run(&self, out_dir: &Path, source: &Path) -> Result<Compilation, CompileFailure> {
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| Step::ok(&["main-0000aaaa.js"]));

        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        match &step.gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step.result {
            Ok(files) => {
                std::fs::create_dir_all(out_dir).expect("create out dir");
                let mut outputs = Vec::new();
                for file in files {
                    let path = out_dir.join(&file);
                    std::fs::write(&path, format!("// {}\n", file)).expect("write output");
                    outputs.push(RawOutputFile::new(path));
                }
                Ok(Compilation {
                    outputs,
                    warnings: Vec::new(),
                })
            }
            Err(message) => Err(CompileFailure::new(vec![
                Diagnostic::error(message).at(Location::new(source, 1, 1)),
            ])),
        }
    }
}

#[derive(Clone)]
pub struct FakeBundler {
    inner: Arc<Inner>,
}

impl FakeBundler {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            inner: Arc::new(Inner {
                steps: Mutex::new(steps.into()),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn push(&self, step: Step) {
        self.inner.steps.lock().push_back(step);
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.inner.counters)
    }
}

fn entry_source(config: &BundleConfig) -> PathBuf {
    config
        .entry_points
        .iter()
        .next()
        .map(|(_, source)| match source {
            kiln_build::EntrySource::File { path } => path.clone(),
            kiln_build::EntrySource::Virtual { id, .. } => PathBuf::from(id),
        })
        .unwrap_or_default()
}

#[async_trait]
impl Bundler for FakeBundler {
    async fn compile(
        &self,
        config: &BundleConfig,
    ) -> Result<(Box<dyn BundleHandle>, Compilation), CompileFailure> {
        self.inner.counters.compiles.fetch_add(1, Ordering::SeqCst);
        let source = entry_source(config);
        let compilation = self.inner.run(&config.out_dir, &source).await?;
        let handle = FakeHandle {
            inner: Arc::clone(&self.inner),
            out_dir: config.out_dir.clone(),
            source,
        };
        Ok((Box::new(handle), compilation))
    }
}

struct FakeHandle {
    inner: Arc<Inner>,
    out_dir: PathBuf,
    source: PathBuf,
}

#[async_trait]
impl BundleHandle for FakeHandle {
    async fn rebuild(&mut self) -> Result<Compilation, CompileFailure> {
        self.inner.counters.rebuilds.fetch_add(1, Ordering::SeqCst);
        self.inner.run(&self.out_dir, &self.source).await
    }

    async fn dispose(self: Box<Self>) -> kiln_build::Result<()> {
        self.inner.counters.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A bundler that must never be asked to compile.
pub struct UnusableBundler;

#[async_trait]
impl Bundler for UnusableBundler {
    async fn compile(
        &self,
        config: &BundleConfig,
    ) -> Result<(Box<dyn BundleHandle>, Compilation), CompileFailure> {
        panic!("bundler invoked for '{}' in no-bundler mode", config.target);
    }
}

/// Config for target `name` with entry `main` -> `<root>/src/main.ts`,
/// output in `<root>/out/<name>`.
pub fn config(root: &Path, name: &str) -> BundleConfig {
    let entries = EntryPointSet::new().with_file("main", root.join("src/main.ts"));
    BundleConfig::new(name, root, root.join("out").join(name), entries)
}

/// Poll `condition` between scheduler yields until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// Await `future`, failing the test if it does not complete promptly.
pub async fn promptly<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation hung")
}
