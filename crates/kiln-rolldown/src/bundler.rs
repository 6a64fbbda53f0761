use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use kiln_build::{BundleConfig, BundleHandle, Bundler, Compilation, CompileFailure, Diagnostic, RawOutputFile};
use rolldown::BundlerBuilder as RolldownBundlerBuilder;
use rolldown_common::Output;

use crate::diagnostics;
use crate::options::{bundler_options, materialize_inputs};
use crate::writer::{self, Emitted};

/// [`Bundler`] backed by Rolldown.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolldownBundler;

impl RolldownBundler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Bundler for RolldownBundler {
    async fn compile(
        &self,
        config: &BundleConfig,
    ) -> Result<(Box<dyn BundleHandle>, Compilation), CompileFailure> {
        let mut handle = RolldownHandle {
            config: config.clone(),
            written: Vec::new(),
        };
        let compilation = handle.run().await?;
        Ok((Box::new(handle), compilation))
    }
}

/// Incremental state for one target: the configuration plus the files the
/// last successful compile wrote.
///
/// Every rebuild runs a fresh Rolldown bundler over the same options, so the
/// module graph is always re-scanned from disk.
pub struct RolldownHandle {
    config: BundleConfig,
    written: Vec<PathBuf>,
}

impl RolldownHandle {
    async fn run(&mut self) -> Result<Compilation, CompileFailure> {
        let config = &self.config;
        let started = Instant::now();

        let input = materialize_inputs(config).map_err(|e| CompileFailure::new(vec![e.into()]))?;
        let options = bundler_options(config, input);

        let mut bundler = RolldownBundlerBuilder::default()
            .with_options(options)
            .build()
            .map_err(|e| CompileFailure::new(diagnostics::extract(&e, &config.root)))?;
        let bundle = bundler
            .generate()
            .await
            .map_err(|e| CompileFailure::new(diagnostics::extract(&e, &config.root)))?;

        let emitted: Vec<Emitted> = bundle
            .assets
            .iter()
            .map(|output| match output {
                Output::Chunk(chunk) => Emitted::new(chunk.filename.as_str(), chunk.code.as_bytes()),
                Output::Asset(asset) => Emitted::new(asset.filename.as_str(), asset.source.as_bytes()),
            })
            .collect();

        let entry_names: Vec<&str> = config.entry_points.names().collect();
        let planned = writer::plan(&emitted, &entry_names);
        let written = writer::write_bundle(&config.out_dir, &planned)
            .map_err(|e| CompileFailure::new(vec![Diagnostic::from(e)]))?;

        writer::remove_stale(&self.written, &written);
        tracing::debug!(
            target_name = %config.target,
            files = written.len(),
            "Rolldown compile finished in {}ms",
            started.elapsed().as_millis()
        );

        let outputs = written.iter().cloned().map(RawOutputFile::new).collect();
        self.written = written;
        Ok(Compilation {
            outputs,
            warnings: Vec::new(),
        })
    }
}

#[async_trait]
impl BundleHandle for RolldownHandle {
    async fn rebuild(&mut self) -> Result<Compilation, CompileFailure> {
        self.run().await
    }

    async fn dispose(self: Box<Self>) -> kiln_build::Result<()> {
        tracing::debug!(target_name = %self.config.target, "Releasing Rolldown handle");
        Ok(())
    }
}
