//! End-to-end lifecycle tests against the real subsystems.

use std::time::Duration;

use plugin_daemon::error::{Error, Stage};
use plugin_daemon::observability::logging::{Level, Logger, MemorySink};
use plugin_daemon::storage::StorageError;
use plugin_daemon::{App, DaemonSubsystems, LifecycleState, Signal};
use tokio::sync::mpsc;

mod common;

#[tokio::test]
async fn test_start_serve_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(&dir);
    common::preinstall(&config, &[("langgenius", "openai", "0.1.0"), ("acme", "search", "1.2.0")]).await;

    let mut app = App::new(DaemonSubsystems::new());
    app.start(&config).await.unwrap();
    assert_eq!(app.state(), LifecycleState::Running);

    let addr = app.subsystems().local_addr().unwrap();
    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health/check"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["state"], "running");
    assert_eq!(health["plugins"], 2);

    let plugins: serde_json::Value = reqwest::get(format!("http://{addr}/plugins"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(plugins[0]["author"], "acme");
    assert_eq!(plugins[1]["name"], "openai");

    let (tx, mut rx) = mpsc::channel(1);
    tx.send(Signal::Terminate).await.unwrap();
    let signal = tokio::time::timeout(
        Duration::from_secs(5),
        app.wait_for_signal(&mut rx, &config.shutdown),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(signal, Signal::Terminate);
    assert_eq!(app.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_persistence_available_after_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(&dir);

    let mut app = App::new(DaemonSubsystems::new());
    app.start(&config).await.unwrap();

    let persistence = app.subsystems().persistence().unwrap();
    persistence.save("tenant", "plugin", "state", b"42").await.unwrap();
    assert_eq!(
        persistence.load("tenant", "plugin", "state").await.unwrap(),
        Some(b"42".to_vec())
    );
    assert!(dir
        .path()
        .join("storage/persistence/tenant/plugin/state")
        .exists());
}

#[tokio::test]
async fn test_unknown_storage_kind_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(&dir);
    config.storage.kind = "ftp".into();

    let mut app = App::new(DaemonSubsystems::new());
    let fatal = app.start(&config).await.unwrap_err();

    assert_eq!(fatal.stage, Stage::Storage);
    assert!(matches!(
        fatal.source,
        Error::Storage(StorageError::UnknownKind(ref kind)) if kind == "ftp"
    ));
    assert_eq!(
        fatal.to_string(),
        "failed to create storage: Invalid plugin storage type: ftp"
    );
    // steps after storage never ran
    assert!(app.subsystems().persistence().is_none());
    assert!(app.subsystems().local_addr().is_none());
}

#[tokio::test]
async fn test_zero_pool_size_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(&dir);
    config.pool.size = 0;

    let mut app = App::new(DaemonSubsystems::new());
    let fatal = app.start(&config).await.unwrap_err();
    assert_eq!(fatal.stage, Stage::Pool);
    assert!(app.subsystems().database().is_none());
}

#[tokio::test]
async fn test_fatal_startup_written_to_both_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(&dir);
    config.storage.kind = "ftp".into();

    let mut app = App::new(DaemonSubsystems::new());
    let fatal = app.start(&config).await.unwrap_err();

    let console = MemorySink::new();
    let file = MemorySink::new();
    let logger = Logger::with_sinks(Box::new(console.clone()), Box::new(file.clone()), Level::Debug);
    logger.fatal(&fatal);

    let record = file.lines().pop().unwrap();
    assert!(record.contains("daemon.rs:"), "{record}");
    assert!(
        record.ends_with("[PANIC] failed to create storage: Invalid plugin storage type: ftp"),
        "{record}"
    );
    assert!(!file.contents().contains('\x1b'));
    assert!(console.contents().contains(
        "\x1b[31m[PANIC] failed to create storage: Invalid plugin storage type: ftp\x1b[0m\n"
    ));
}
