#![cfg_attr(docsrs, feature(doc_cfg))]

//! # kiln-build
//!
//! Build orchestration for kiln: keeps one or more bundler targets (client,
//! server-rendering, API) compiled and consistent with a watched source tree.
//!
//! The crate is organised bottom-up:
//!
//! - [`deferred`] - single-assignment values with synchronous introspection
//! - [`watch`] - debounced change subscriptions over a logical clock
//! - [`correlate`] - maps raw bundler output files back to named entry points
//! - [`manifest`] - the persisted build manifest used by production processes
//! - [`service`] - one bundler lifecycle with generation-guarded rebuilds
//! - [`orchestrator`] - several named services driven by one watch subscription
//!
//! The bundler itself is a collaborator behind the [`Bundler`] trait; see the
//! `kiln-rolldown` crate for the Rolldown-backed implementation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_build::{BuildService, BundleConfig, EntryPointSet, Platform};
//! # use kiln_build::Bundler;
//!
//! # async fn run(bundler: Arc<dyn Bundler>) -> kiln_build::Result<()> {
//! let mut entries = EntryPointSet::new();
//! entries.insert_file("main", "/srv/app/src/main.tsx");
//!
//! let config = BundleConfig::new("client", "/srv/app", "/srv/app/.kiln/client", entries)
//!     .platform(Platform::Browser);
//! let service = BuildService::new(config, bundler);
//!
//! service.start().await?;
//! if let Some(output) = service.ready().await? {
//!     let main = output.script("main").expect("main script");
//!     println!("serving /{}", main.relative_path);
//! }
//! service.stop().await;
//! # Ok(()) }
//! ```

pub mod bundler;
pub mod cache;
pub mod correlate;
pub mod deferred;
pub mod diagnostics;
pub mod error;
pub mod externals;
pub mod manifest;
pub mod orchestrator;
pub mod service;
pub mod watch;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

pub use bundler::{
    BundleConfig, BundleHandle, Bundler, Compilation, CompileFailure, Mode, Platform,
    SourceMapMode,
};
pub use cache::ArtifactCache;
pub use correlate::{
    Asset, AssetKind, EntryAssets, EntryPointSet, EntrySource, Output, RawOutputFile, correlate,
};
pub use deferred::{Deferred, DeferredError, Readiness, Settled};
pub use diagnostics::{
    Diagnostic, ErrorReporter, Location, MemoryReporter, ReportedError, Severity, TeeReporter,
    TerminalReporter,
};
pub use error::{BuildFailure, Error, Result, UsageError, WatchError};
pub use externals::{ExternalPolicy, detect_workspace, third_party_dependencies};
pub use manifest::{BuildManifest, MANIFEST_FILE, ManifestEntry};
pub use orchestrator::{BuildEvent, Orchestrator};
pub use service::{Build, BuildOutcome, BuildService, OnBuild, Phase};
pub use watch::{
    ChangeBatch, ChangeFilter, ChangeSink, Clock, ManualBackend, NotifyBackend, SubscribeRequest,
    Subscription, WatchBackend, WatchOptions, WatchService,
};
