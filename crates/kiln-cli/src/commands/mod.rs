//! Command implementations, one module per subcommand.

mod build;
mod dev;
mod serve;

pub use build::execute as build_execute;
pub use dev::execute as dev_execute;
pub use serve::{check_ready, execute as serve_execute};

use kiln_build::{BuildOutcome, Orchestrator};

use crate::ui;

/// Print one line per target and return the names of the targets that failed.
pub(crate) fn report_outcomes(orchestrator: &Orchestrator, outcomes: &[(String, BuildOutcome)]) -> Vec<String> {
    let mut failed = Vec::new();
    for (target, outcome) in outcomes {
        match outcome {
            BuildOutcome::Built { .. } => {
                let files = orchestrator
                    .service(target)
                    .and_then(|service| service.last_output())
                    .map(|output| {
                        output
                            .iter()
                            .flat_map(|(_, assets)| [assets.script.as_ref(), assets.style.as_ref()])
                            .flatten()
                            .map(|asset| asset.relative_path.clone())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                ui::success(&format!("Built '{}': {}", target, files));
            }
            BuildOutcome::Failed { .. } => {
                ui::error(&format!("Build '{}' failed", target));
                failed.push(target.clone());
            }
            BuildOutcome::Superseded { .. } | BuildOutcome::Cancelled { .. } => {
                tracing::debug!("Build '{}' finished as {:?}", target, outcome);
            }
        }
    }
    failed
}
