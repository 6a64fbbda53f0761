//! `kiln build`: one production compile of every target.

use std::sync::Arc;
use std::time::Instant;

use kiln_build::{Mode, TerminalReporter};
use kiln_rolldown::RolldownBundler;

use crate::cli::BuildArgs;
use crate::commands::report_outcomes;
use crate::config::{CliOverrides, KilnConfig};
use crate::error::{CliError, Result};
use crate::project::{self, Wiring};
use crate::ui;

pub async fn execute(args: BuildArgs) -> Result<()> {
    let started = Instant::now();
    let config = KilnConfig::load(&args.project, &CliOverrides::default())?;
    let wiring = Wiring {
        bundler: Arc::new(RolldownBundler::new()),
        reporter: Arc::new(TerminalReporter::new()),
        live_reload: false,
    };
    let orchestrator = project::orchestrator(&config, Mode::Production, &wiring)?;

    let targets: Vec<&str> = orchestrator.targets().collect();
    ui::info(&format!("Building {} for production", targets.join(", ")));

    let outcomes = orchestrator.start_all().await;
    let failed = match &outcomes {
        Ok(outcomes) => report_outcomes(&orchestrator, outcomes),
        Err(_) => Vec::new(),
    };
    orchestrator.stop_all().await;
    outcomes?;

    if !failed.is_empty() {
        return Err(CliError::BuildFailed { targets: failed });
    }
    ui::success(&format!(
        "Build complete in {} ({})",
        ui::format_duration(started.elapsed()),
        config.out_dir.display()
    ));
    Ok(())
}
