//! # kiln-rolldown
//!
//! A [`kiln_build::Bundler`] backed by [Rolldown](https://rolldown.rs).
//!
//! Each compile materialises virtual entry sources under
//! `<outDir>/.virtual/`, runs Rolldown with options derived from the
//! [`kiln_build::BundleConfig`], and writes the result to the output
//! directory with content-hashed entry file names.
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_build::{BuildService, BundleConfig, EntryPointSet};
//! use kiln_rolldown::RolldownBundler;
//!
//! # async fn run() -> kiln_build::Result<()> {
//! let entries = EntryPointSet::new().with_file("main", "/srv/app/src/main.tsx");
//! let config = BundleConfig::new("client", "/srv/app", "/srv/app/.kiln/client", entries);
//! let service = BuildService::new(config, Arc::new(RolldownBundler::new()));
//! service.start().await?;
//! # Ok(()) }
//! ```

mod bundler;
pub mod diagnostics;
mod error;
pub mod options;
pub mod writer;

pub use bundler::{RolldownBundler, RolldownHandle};
pub use error::{Error, Result};
pub use options::{VIRTUAL_DIR, external_predicate, virtual_entry_path};
