//! `kiln dev`: development build, watch, live reload.

use std::sync::Arc;

use kiln_build::{ErrorReporter, MemoryReporter, Mode, TeeReporter, TerminalReporter, WatchService};
use kiln_rolldown::RolldownBundler;
use tokio::signal;

use crate::cli::DevArgs;
use crate::commands::report_outcomes;
use crate::config::{CliOverrides, KilnConfig};
use crate::error::{CliError, Result};
use crate::project::{self, Wiring};
use crate::server::{self, AppState};
use crate::ui;

pub async fn execute(args: DevArgs) -> Result<()> {
    let config = KilnConfig::load(&args.project, &CliOverrides { port: args.port })?;

    // the overlay shows the latest report; the terminal shows all of them
    let errors = Arc::new(MemoryReporter::new());
    let terminal: Arc<dyn ErrorReporter> = Arc::new(TerminalReporter::new());
    let overlay: Arc<dyn ErrorReporter> = Arc::clone(&errors) as Arc<dyn ErrorReporter>;
    let reporter: Arc<dyn ErrorReporter> = Arc::new(TeeReporter::new(vec![terminal, overlay]));
    let wiring = Wiring {
        bundler: Arc::new(RolldownBundler::new()),
        reporter,
        live_reload: true,
    };
    let orchestrator = Arc::new(project::orchestrator(&config, Mode::Development, &wiring)?);

    let listener = server::bind(config.port).await?;

    let outcomes = orchestrator.start_all().await?;
    let failed = report_outcomes(&orchestrator, &outcomes);
    if !failed.is_empty() {
        ui::warning("Fix the errors above; the next save rebuilds every target");
    }

    let watcher = WatchService::new(project::watch_options(&config));
    if let Err(e) = orchestrator.watch(&watcher, &config.root).await {
        orchestrator.stop_all().await;
        return Err(e.into());
    }
    ui::info(&format!("Watching {} for changes", config.root.display()));

    let state = AppState::new(Arc::clone(&orchestrator), &config.root)
        .errors(errors)
        .live_reload(true);
    let url = format!("http://localhost:{}", config.port);
    let mut server_handle = tokio::spawn(server::serve(listener, server::router(state)));
    ui::success(&format!("Development server running at {}", url));

    if args.open {
        open_browser(&url);
    }

    let result = tokio::select! {
        received = signal::ctrl_c() => {
            ui::info("Shutting down development server...");
            received.map_err(CliError::from)
        }
        joined = &mut server_handle => match joined {
            Ok(result) => {
                ui::warning("Server task completed unexpectedly");
                result
            }
            Err(e) => Err(CliError::Server(format!("Server task failed: {}", e))),
        },
    };

    server_handle.abort();
    orchestrator.stop_all().await;
    drop(watcher);
    ui::success("Development server stopped");
    result
}

fn open_browser(url: &str) {
    use std::process::Command;

    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };

    match result {
        Ok(_) => ui::info(&format!("Opened browser at {}", url)),
        Err(e) => ui::warning(&format!("Failed to open browser: {}", e)),
    }
}
