//! Orchestrator driven by a hand-fed watch backend.

mod support;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kiln_build::{
    BuildEvent, BuildOutcome, BuildService, Error, ManualBackend, MemoryReporter, Orchestrator,
    Phase, UsageError, WatchError, WatchOptions, WatchService,
};
use support::{FakeBundler, Step, config, promptly};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    client: FakeBundler,
    server: FakeBundler,
    orchestrator: Arc<Orchestrator>,
}

fn fixture(client_steps: Vec<Step>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();

    let client = FakeBundler::new(client_steps);
    let server = FakeBundler::new(vec![]);
    let service = |bundler: &FakeBundler, name: &str| {
        Arc::new(
            BuildService::new(config(&root, name), Arc::new(bundler.clone()))
                .reporter(Arc::new(MemoryReporter::new())),
        )
    };
    let orchestrator = Orchestrator::new()
        .with_target("client", service(&client, "client"))
        .with_target("server", service(&server, "server"));

    Fixture {
        _dir: dir,
        root,
        client,
        server,
        orchestrator: Arc::new(orchestrator),
    }
}

fn manual_watcher(backend: &ManualBackend) -> WatchService {
    let backend = backend.clone();
    WatchService::with_backend(
        WatchOptions::default().debounce(Duration::from_millis(20)),
        move |sink| backend.connect(sink),
    )
}

#[tokio::test]
async fn test_start_all_keeps_insertion_order() {
    let fx = fixture(vec![]);
    let outcomes = fx.orchestrator.start_all().await.unwrap();
    let names: Vec<_> = outcomes.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["client", "server"]);
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_built()));
    assert_eq!(fx.orchestrator.targets().collect::<Vec<_>>(), ["client", "server"]);
}

#[tokio::test]
async fn test_resolve_unknown_target() {
    let fx = fixture(vec![]);
    fx.orchestrator.start_all().await.unwrap();

    assert!(fx.orchestrator.resolve("client").await.unwrap().is_some());
    let err = fx.orchestrator.resolve("admin").await.unwrap_err();
    assert!(matches!(err, Error::Usage(UsageError::UnknownTarget(name)) if name == "admin"));
}

#[tokio::test]
async fn test_change_rebuilds_every_target() {
    let fx = fixture(vec![]);
    fx.orchestrator.start_all().await.unwrap();

    let backend = ManualBackend::new();
    let watcher = manual_watcher(&backend);
    fx.orchestrator.watch(&watcher, &fx.root).await.unwrap();
    assert!(fx.orchestrator.is_watching());
    assert_eq!(backend.roots(), vec![fx.root.clone()]);

    let mut events = fx.orchestrator.subscribe_builds();
    let changed = fx.root.join("src/main.ts");
    assert_eq!(backend.emit([changed.clone()]), 1);

    let event = promptly(events.recv()).await.unwrap();
    assert_eq!(
        event,
        BuildEvent::Rebuilt {
            changed: vec![changed],
            targets: vec!["client".to_string(), "server".to_string()],
        }
    );
    assert_eq!(fx.client.counters().rebuilds(), 1);
    assert_eq!(fx.server.counters().rebuilds(), 1);
}

#[tokio::test]
async fn test_failed_target_is_reported_separately() {
    let fx = fixture(vec![Step::ok(&["main-aaaa1111.js"]), Step::fail("Unexpected token")]);
    fx.orchestrator.start_all().await.unwrap();

    let outcomes = fx
        .orchestrator
        .rebuild_all(vec![fx.root.join("src/main.ts")])
        .await
        .unwrap();
    assert_eq!(outcomes[0].1, BuildOutcome::Failed { generation: 2 });
    assert_eq!(outcomes[1].1, BuildOutcome::Built { generation: 2 });

    // events were sent before anyone subscribed; check a second round instead
    let mut events = fx.orchestrator.subscribe_builds();
    fx.client.push(Step::fail("still broken"));
    fx.orchestrator.rebuild_all(Vec::new()).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        BuildEvent::Failed {
            target: "client".to_string()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        BuildEvent::Rebuilt {
            changed: Vec::new(),
            targets: vec!["server".to_string()],
        }
    );
}

#[tokio::test]
async fn test_watch_fails_when_handshake_fails() {
    let fx = fixture(vec![]);
    let backend = ManualBackend::failing("inotify limit reached");
    let watcher = manual_watcher(&backend);

    let err = fx.orchestrator.watch(&watcher, &fx.root).await.unwrap_err();
    assert_eq!(err, WatchError::Handshake("inotify limit reached".to_string()));
    assert!(!fx.orchestrator.is_watching());
}

#[tokio::test]
async fn test_stop_all_unsubscribes_and_stops_targets() {
    let fx = fixture(vec![]);
    fx.orchestrator.start_all().await.unwrap();
    let backend = ManualBackend::new();
    let watcher = manual_watcher(&backend);
    fx.orchestrator.watch(&watcher, &fx.root).await.unwrap();

    fx.orchestrator.stop_all().await;
    assert!(!fx.orchestrator.is_watching());
    for name in ["client", "server"] {
        assert_eq!(fx.orchestrator.service(name).unwrap().phase(), Phase::Stopped);
    }
    assert_eq!(fx.client.counters().disposed(), 1);
    assert_eq!(fx.server.counters().disposed(), 1);

    // later changes go nowhere
    backend.emit([fx.root.join("src/main.ts")]);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fx.client.counters().rebuilds(), 0);
}
