//! Watch service over the platform file watcher.

mod support;

use std::path::PathBuf;
use std::time::Duration;

use kiln_build::{SubscribeRequest, WatchError, WatchOptions, WatchService};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn project() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::create_dir_all(root.join("node_modules/react")).unwrap();
    (dir, root)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_source_edit_is_delivered() {
    let (_dir, root) = project();
    let watcher = WatchService::new(WatchOptions::default().debounce(Duration::from_millis(50)));
    watcher.handshake().await.unwrap();
    watcher.watch(&root).await.unwrap();
    let since = watcher.clock(&root).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = watcher
        .subscribe(SubscribeRequest::new(&root).since(since), move |batch| {
            let _ = tx.send(batch);
        })
        .await
        .unwrap();

    // ignored: not a source file, and inside an excluded directory
    std::fs::write(root.join("notes.txt"), "hello").unwrap();
    std::fs::write(root.join("node_modules/react/index.js"), "x").unwrap();
    let page = root.join("src/page.tsx");
    std::fs::write(&page, "export default () => null;\n").unwrap();

    let batch = support::promptly(rx.recv()).await.unwrap();
    assert_eq!(batch.root, root);
    assert!(batch.paths.contains(&page), "{:?}", batch.paths);
    assert!(batch.paths.iter().all(|p| p.starts_with(root.join("src"))));
    assert!(batch.clock > since);
}

#[tokio::test]
async fn test_operations_require_watched_root() {
    let (_dir, root) = project();
    let watcher = WatchService::new(WatchOptions::default());

    let err = watcher.clock(&root).await.unwrap_err();
    assert_eq!(err, WatchError::NotWatched(root.clone()));

    watcher.watch(&root).await.unwrap();
    watcher.watch(&root).await.unwrap();
    assert!(watcher.clock(&root).await.is_ok());
}
