//! `kiln serve`: serve the output of an earlier `kiln build`.
//!
//! No bundler runs. Every target's persisted manifest is read once at
//! startup; a missing client manifest is fatal, other targets only warn.

use std::sync::Arc;

use kiln_build::{Mode, TerminalReporter};
use kiln_rolldown::RolldownBundler;
use tokio::signal;

use crate::cli::ServeArgs;
use crate::config::{CliOverrides, KilnConfig};
use crate::error::{CliError, Result};
use crate::project::{self, CLIENT, Wiring};
use crate::server::{self, AppState};
use crate::ui;

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = KilnConfig::load(&args.project, &CliOverrides { port: args.port })?;
    let wiring = Wiring {
        bundler: Arc::new(RolldownBundler::new()),
        reporter: Arc::new(TerminalReporter::new()),
        live_reload: false,
    };
    let orchestrator = Arc::new(project::orchestrator(&config, Mode::Production, &wiring)?);
    check_ready(&orchestrator).await?;

    let listener = server::bind(config.port).await?;
    let state = AppState::new(Arc::clone(&orchestrator), &config.root);
    ui::success(&format!("Serving {} at http://localhost:{}", config.out_dir.display(), config.port));

    tokio::select! {
        result = server::serve(listener, server::router(state)) => result,
        result = signal::ctrl_c() => {
            ui::info("Shutting down...");
            result.map_err(CliError::from)
        }
    }
}

/// Resolve every target from its persisted manifest.
pub async fn check_ready(orchestrator: &kiln_build::Orchestrator) -> Result<()> {
    for target in orchestrator.targets() {
        if orchestrator.resolve(target).await?.is_some() {
            continue;
        }
        let manifest = orchestrator
            .service(target)
            .map(|service| service.manifest_path())
            .unwrap_or_default();
        if target == CLIENT {
            return Err(CliError::NotBuilt {
                target: target.to_string(),
                manifest,
            });
        }
        ui::warning(&format!(
            "No build output for '{}' at {}; run `kiln build` to create it",
            target,
            manifest.display()
        ));
    }
    Ok(())
}
