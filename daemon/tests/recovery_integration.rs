//! End-to-end daemon tests against a real SQLite catalog
//!
//! Exercises the supervisor over the production storage layer: lifecycle
//! writes land in SQLite, and a fresh daemon instance over the same
//! database recovers stale rows left by a previous one.

#![cfg(unix)]

use daemon::{Daemon, SqliteCatalog};
use rigel_core::CatalogRepository;
use schema::{ServiceDefinition, ServiceStatus};
use std::sync::Arc;

fn sleeper(id: &str) -> ServiceDefinition {
    ServiceDefinition {
        id: id.to_string(),
        name: id.to_string(),
        path: "/tmp".to_string(),
        command: "sleep 30".to_string(),
        ..ServiceDefinition::default()
    }
}

#[tokio::test]
async fn lifecycle_writes_land_in_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalog = Arc::new(SqliteCatalog::open_at(dir.path().join("rigel.db")).expect("open"));
    catalog.upsert(&sleeper("svc")).await.expect("seed");

    let daemon = Daemon::new(catalog.clone());

    daemon.supervisor().start("svc").await.expect("start");
    let def = catalog.load("svc").await.expect("load");
    assert_eq!(def.status, ServiceStatus::Running);
    assert!(def.pid > 0);
    assert!(def.start_time.is_some());

    daemon.supervisor().stop("svc").await.expect("stop");
    let def = catalog.load("svc").await.expect("load");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
    assert!(def.stop_time.is_some());
}

#[tokio::test]
async fn fresh_daemon_recovers_stale_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("rigel.db");

    // A previous daemon died while this service was recorded running.
    {
        let catalog = Arc::new(SqliteCatalog::open_at(&db_path).expect("open"));
        let mut def = sleeper("leftover");
        def.status = ServiceStatus::Running;
        def.pid = 999_999;
        catalog.upsert(&def).await.expect("seed");
    }

    let catalog = Arc::new(SqliteCatalog::open_at(&db_path).expect("reopen"));
    let daemon = Daemon::new(catalog.clone());
    daemon.reconcile().await.expect("reconcile");

    let def = catalog.load("leftover").await.expect("load");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
}

#[tokio::test]
async fn shutdown_stops_tracked_services() {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalog = Arc::new(SqliteCatalog::open_at(dir.path().join("rigel.db")).expect("open"));
    catalog.upsert(&sleeper("a")).await.expect("seed a");
    catalog.upsert(&sleeper("b")).await.expect("seed b");

    let daemon = Daemon::new(catalog.clone());
    daemon.supervisor().start("a").await.expect("start a");
    daemon.supervisor().start("b").await.expect("start b");

    daemon.shutdown().await;

    assert!(daemon.supervisor().running().await.is_empty());
    for id in ["a", "b"] {
        let def = catalog.load(id).await.expect("load");
        assert_eq!(def.status, ServiceStatus::Stopped);
        assert_eq!(def.pid, 0);
    }
}
