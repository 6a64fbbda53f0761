//! Build targets for a loaded [`KilnConfig`].
//!
//! Every project has a `client` target (browser). `server` and `api` are
//! added when configured; both run on the server and leave third-party
//! packages external. Each target has one entry point named [`ENTRY`].

use std::path::Path;
use std::sync::Arc;

use kiln_build::{
    BuildService, BundleConfig, Bundler, ChangeFilter, EntryPointSet, ErrorReporter, ExternalPolicy, Mode,
    Orchestrator, Platform, WatchOptions,
};

use crate::config::KilnConfig;
use crate::error::{ConfigError, Result};

pub const CLIENT: &str = "client";
pub const SERVER: &str = "server";
pub const API: &str = "api";

/// Entry point name inside every target.
pub const ENTRY: &str = "main";

/// Server-sent events stream the boot shim listens on.
pub const EVENTS_PATH: &str = "/__kiln/events";

const BOOT_ID: &str = "kiln:client-boot";

/// Collaborators shared by every target.
#[derive(Clone)]
pub struct Wiring {
    pub bundler: Arc<dyn Bundler>,
    pub reporter: Arc<dyn ErrorReporter>,
    /// Wrap the client entry in the live-reload boot shim.
    pub live_reload: bool,
}

/// One build service per configured target, in `client`, `server`, `api` order.
pub fn orchestrator(config: &KilnConfig, mode: Mode, wiring: &Wiring) -> Result<Orchestrator> {
    let Some(client) = &config.client else {
        return Err(ConfigError::MissingField {
            field: CLIENT.to_string(),
            hint: "Every project needs a client entry point".to_string(),
        }
        .into());
    };

    let mut client_entries = EntryPointSet::new();
    if wiring.live_reload {
        client_entries.insert_virtual(ENTRY, BOOT_ID, boot_shim(client)?);
    } else {
        client_entries.insert_file(ENTRY, client);
    }

    let mut orchestrator = Orchestrator::new();
    orchestrator.add(CLIENT, service(config, mode, wiring, CLIENT, Platform::Browser, client_entries));
    for (name, entry) in [(SERVER, &config.server), (API, &config.api)] {
        if let Some(entry) = entry {
            let entries = EntryPointSet::new().with_file(ENTRY, entry);
            orchestrator.add(name, service(config, mode, wiring, name, Platform::Server, entries));
        }
    }
    Ok(orchestrator)
}

fn service(
    config: &KilnConfig,
    mode: Mode,
    wiring: &Wiring,
    target: &str,
    platform: Platform,
    entries: EntryPointSet,
) -> Arc<BuildService> {
    let external = match platform {
        Platform::Browser => ExternalPolicy::BundleAll,
        Platform::Server => ExternalPolicy::third_party(&config.root),
    };
    let bundle = BundleConfig::new(target, &config.root, config.target_out_dir(target), entries)
        .platform(platform)
        .mode(mode)
        .external(external)
        .sourcemap(config.sourcemap_for(mode));

    let service = BuildService::new(bundle, Arc::clone(&wiring.bundler)).reporter(Arc::clone(&wiring.reporter));
    let service = if wiring.live_reload {
        service.on_build(|target, build| {
            if build.generation > 1 {
                crate::ui::success(&format!("Rebuilt '{}' (build #{})", target, build.generation));
            }
        })
    } else {
        service
    };
    Arc::new(service)
}

/// Client entry used by `kiln dev`: imports the user's entry, then reloads
/// the page whenever the server reports a new build or a failure.
pub fn boot_shim(entry: &Path) -> Result<String> {
    let specifier = serde_json::to_string(&entry.to_string_lossy())?;
    let events = serde_json::to_string(EVENTS_PATH)?;
    Ok(format!(
        "import {specifier};\n\
         \n\
         if (typeof EventSource !== \"undefined\") {{\n\
         \x20 const events = new EventSource({events});\n\
         \x20 for (const type of [\"rebuilt\", \"failed\"]) {{\n\
         \x20   events.addEventListener(type, () => window.location.reload());\n\
         \x20 }}\n\
         }}\n"
    ))
}

/// Watch options for the project: configured debounce, the built-in
/// exclusions plus `watch.ignore` and the output directory.
pub fn watch_options(config: &KilnConfig) -> WatchOptions {
    let mut filter = ChangeFilter::default().exclude_dirs(config.watch.ignore.iter().cloned());
    if let Ok(relative) = config.out_dir.strip_prefix(&config.root) {
        filter = filter.exclude_dir(relative.to_string_lossy().replace('\\', "/"));
    }
    WatchOptions::default().debounce(config.debounce()).filter(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_build::{EntrySource, MemoryReporter};
    use kiln_rolldown::RolldownBundler;
    use std::path::PathBuf;

    fn config(root: &Path) -> KilnConfig {
        KilnConfig {
            client: Some(PathBuf::from("src/main.tsx")),
            api: Some(PathBuf::from("src/api.ts")),
            ..KilnConfig::default()
        }
        .resolve(root)
    }

    fn wiring(live_reload: bool) -> Wiring {
        Wiring {
            bundler: Arc::new(RolldownBundler::new()),
            reporter: Arc::new(MemoryReporter::new()),
            live_reload,
        }
    }

    #[test]
    fn test_targets_follow_config() {
        let root = Path::new("/app");
        let orchestrator = orchestrator(&config(root), Mode::Production, &wiring(false)).unwrap();
        assert_eq!(orchestrator.targets().collect::<Vec<_>>(), vec![CLIENT, API]);

        let client = orchestrator.service(CLIENT).unwrap().config();
        assert_eq!(client.platform, Platform::Browser);
        assert_eq!(client.external, ExternalPolicy::BundleAll);
        assert!(client.minify);
        assert_eq!(client.out_dir, Path::new("/app/.kiln/client"));
        assert_eq!(
            client.entry_points.get(ENTRY),
            Some(&EntrySource::File {
                path: PathBuf::from("/app/src/main.tsx")
            })
        );

        let api = orchestrator.service(API).unwrap().config();
        assert_eq!(api.platform, Platform::Server);
        assert!(matches!(api.external, ExternalPolicy::ThirdParty { .. }));
    }

    #[test]
    fn test_dev_client_is_boot_shim() {
        let orchestrator = orchestrator(&config(Path::new("/app")), Mode::Development, &wiring(true)).unwrap();
        let client = orchestrator.service(CLIENT).unwrap().config();
        assert!(!client.minify);

        let Some(EntrySource::Virtual { id, contents }) = client.entry_points.get(ENTRY) else {
            panic!("expected a virtual client entry");
        };
        assert_eq!(id, BOOT_ID);
        assert!(contents.starts_with("import \"/app/src/main.tsx\";"));
        assert!(contents.contains("new EventSource(\"/__kiln/events\")"));
    }

    #[test]
    fn test_watch_options_exclude_output_and_ignores() {
        let mut config = config(Path::new("/app"));
        config.out_dir = PathBuf::from("/app/out/web");
        config.watch.ignore = vec!["coverage".to_string()];
        config.watch.debounce_ms = 250;

        let options = watch_options(&config);
        let root = Path::new("/app");
        assert_eq!(options.debounce, std::time::Duration::from_millis(250));
        assert!(options.filter.accepts(Path::new("/app/src/page.tsx"), root));
        assert!(!options.filter.accepts(Path::new("/app/out/web/client/main.js"), root));
        assert!(!options.filter.accepts(Path::new("/app/coverage/report.js"), root));
    }
}
