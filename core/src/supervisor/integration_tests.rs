//! Supervisor integration tests
//!
//! These tests drive the supervisor against real child processes (plain
//! `sh` one-liners) and an in-memory catalog, covering the full lifecycle:
//! start/stop, spawn failures, force kill, stop-timeout escalation, log
//! capture, and catalog reconciliation.

use super::*;
use crate::repository::CatalogRepository;
use async_trait::async_trait;
use schema::{ServiceDefinition, ServiceStatus, StatusUpdate};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::time::{sleep, Duration};

/// In-memory catalog recording every status transition for assertions
#[derive(Default)]
pub struct MockCatalog {
    rows: Mutex<HashMap<String, ServiceDefinition>>,
    transitions: Mutex<Vec<(String, ServiceStatus)>>,
}

impl MockCatalog {
    /// Insert or replace a row directly, bypassing the repository contract
    pub fn seed(&self, def: ServiceDefinition) {
        self.rows
            .lock()
            .expect("rows lock poisoned")
            .insert(def.id.clone(), def);
    }

    /// Current row for an id, if any
    pub fn get(&self, id: &str) -> Option<ServiceDefinition> {
        self.rows.lock().expect("rows lock poisoned").get(id).cloned()
    }

    /// Persisted log snapshot for an id
    pub fn logs(&self, id: &str) -> Vec<String> {
        self.get(id).map(|def| def.logs).unwrap_or_default()
    }

    /// Status transitions recorded for an id, in write order
    pub fn transitions(&self, id: &str) -> Vec<ServiceStatus> {
        self.transitions
            .lock()
            .expect("transitions lock poisoned")
            .iter()
            .filter(|(row_id, _)| row_id == id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl CatalogRepository for MockCatalog {
    async fn load(&self, id: &str) -> crate::Result<ServiceDefinition> {
        self.get(id).ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> crate::Result<Vec<ServiceDefinition>> {
        Ok(self
            .rows
            .lock()
            .expect("rows lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn upsert(&self, def: &ServiceDefinition) -> crate::Result<()> {
        self.seed(def.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> crate::Result<()> {
        self.rows.lock().expect("rows lock poisoned").remove(id);
        Ok(())
    }

    async fn update_status(&self, id: &str, update: StatusUpdate) -> crate::Result<()> {
        let mut rows = self.rows.lock().expect("rows lock poisoned");
        // Updating an absent row is a no-op, like a SQL UPDATE
        let Some(row) = rows.get_mut(id) else {
            return Ok(());
        };

        row.status = update.status;
        if let Some(pid) = update.pid {
            row.pid = pid;
        }
        if let Some(ts) = update.start_time {
            row.start_time = Some(ts);
        }
        if let Some(ts) = update.stop_time {
            row.stop_time = Some(ts);
        }
        if let Some(err) = update.last_error {
            row.last_error = err;
        }
        drop(rows);

        self.transitions
            .lock()
            .expect("transitions lock poisoned")
            .push((id.to_string(), update.status));
        Ok(())
    }

    async fn update_logs(&self, id: &str, logs: Vec<String>) -> crate::Result<()> {
        let mut rows = self.rows.lock().expect("rows lock poisoned");
        if let Some(row) = rows.get_mut(id) {
            row.logs = logs;
        }
        Ok(())
    }
}

/// Build a definition around a shell script. `command` splits on
/// whitespace, so scripts go through a wrapper file instead of `sh -c`.
fn script_service(id: &str, dir: &tempfile::TempDir, script: &str) -> ServiceDefinition {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join(format!("{id}.sh"));
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");

    ServiceDefinition {
        id: id.to_string(),
        name: id.to_string(),
        path: dir.path().to_string_lossy().into_owned(),
        command: path.to_string_lossy().into_owned(),
        ..ServiceDefinition::default()
    }
}

fn setup() -> (Supervisor, Arc<MockCatalog>) {
    let catalog = Arc::new(MockCatalog::default());
    let supervisor = Supervisor::new(catalog.clone());
    (supervisor, catalog)
}

async fn wait_for_status(
    catalog: &MockCatalog,
    id: &str,
    expected: ServiceStatus,
    deadline: Duration,
) -> ServiceDefinition {
    let start = Instant::now();
    loop {
        let def = catalog.get(id).expect("row exists");
        if def.status == expected {
            return def;
        }
        assert!(
            start.elapsed() < deadline,
            "service '{id}' never reached {expected} (still {})",
            def.status
        );
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn happy_start_stop_cycle() {
    let (supervisor, catalog) = setup();
    let dir = tempfile::tempdir().unwrap();
    catalog.seed(script_service(
        "echoer",
        &dir,
        "while true; do echo hi; sleep 1; done",
    ));

    supervisor.start("echoer").await.expect("start");

    let def = catalog.get("echoer").expect("row");
    assert_eq!(def.status, ServiceStatus::Running);
    assert!(def.pid > 0);
    assert!(def.start_time.is_some());

    let mut live = supervisor.live_logs("echoer").await.expect("live channel");

    sleep(Duration::from_millis(2500)).await;

    let buffered = supervisor.buffered_logs("echoer").await;
    let hi_count = buffered.iter().filter(|l| l.as_str() == "hi").count();
    assert!(hi_count >= 2, "expected at least two 'hi' lines, got {buffered:?}");
    assert!(buffered.iter().all(|l| !l.starts_with(capture::STDERR_PREFIX)));

    supervisor.stop("echoer").await.expect("stop");

    let def = catalog.get("echoer").expect("row");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
    assert!(def.stop_time.is_some());
    assert!(supervisor.running().await.is_empty());

    // Drain whatever was buffered; the channel must then report closed.
    loop {
        match live.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::test]
async fn stderr_lines_are_tagged_and_ansi_stripped() {
    let (supervisor, catalog) = setup();
    let dir = tempfile::tempdir().unwrap();
    catalog.seed(script_service(
        "noisy",
        &dir,
        r"printf '\033[31mBAD\033[0m\n' 1>&2",
    ));

    supervisor.start("noisy").await.expect("start");

    // The watcher finalizes the row once the process exits; the capture
    // task's EOF flush persists the ring.
    wait_for_status(&catalog, "noisy", ServiceStatus::Stopped, Duration::from_secs(5)).await;

    let start = Instant::now();
    let logs = loop {
        let logs = catalog.logs("noisy");
        if !logs.is_empty() {
            break logs;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "log snapshot never persisted");
        sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(logs, vec!["[ERROR] BAD"]);
}

#[tokio::test]
async fn spawn_failure_records_error_and_leaks_nothing() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "broken".into(),
        name: "broken".into(),
        path: "/tmp".into(),
        command: "/no/such/binary".into(),
        ..ServiceDefinition::default()
    });

    let err = supervisor.start("broken").await.unwrap_err();
    assert!(matches!(err, CoreError::Spawn(_)));

    let def = catalog.get("broken").expect("row");
    assert_eq!(def.status, ServiceStatus::Error);
    assert!(!def.last_error.is_empty());
    assert!(supervisor.running().await.is_empty());

    // Starting again fails identically; nothing accumulates.
    let err = supervisor.start("broken").await.unwrap_err();
    assert!(matches!(err, CoreError::Spawn(_)));
    assert!(supervisor.running().await.is_empty());
}

#[tokio::test]
async fn start_rejects_missing_project_path() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "pathless".into(),
        name: "pathless".into(),
        path: "/definitely/not/a/real/directory".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });

    let err = supervisor.start("pathless").await.unwrap_err();
    assert!(matches!(err, CoreError::Spawn(_)));
    assert_eq!(
        catalog.get("pathless").expect("row").status,
        ServiceStatus::Error
    );
}

#[tokio::test]
async fn start_unknown_service_is_not_found() {
    let (supervisor, _catalog) = setup();
    let err = supervisor.start("ghost").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn double_start_is_already_running() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "looper".into(),
        name: "looper".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });

    supervisor.start("looper").await.expect("start");
    let err = supervisor.start("looper").await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyRunning(_)));

    supervisor.stop("looper").await.expect("stop");
}

#[tokio::test]
async fn stop_is_idempotent_on_stopped_service() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "idle".into(),
        name: "idle".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });

    supervisor.stop("idle").await.expect("first stop");
    supervisor.stop("idle").await.expect("second stop");

    let def = catalog.get("idle").expect("row");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
}

#[tokio::test]
async fn start_stop_cycles_produce_clean_transitions() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "cycler".into(),
        name: "cycler".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });

    supervisor.start("cycler").await.expect("first start");
    supervisor.stop("cycler").await.expect("first stop");
    supervisor.start("cycler").await.expect("second start");
    supervisor.stop("cycler").await.expect("second stop");

    use ServiceStatus::{Running, Starting, Stopped, Stopping};
    assert_eq!(
        catalog.transitions("cycler"),
        vec![Starting, Running, Stopping, Stopped, Starting, Running, Stopping, Stopped]
    );
}

#[tokio::test]
async fn force_kill_on_unknown_pid_succeeds() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "ghost".into(),
        name: "ghost".into(),
        path: "/tmp".into(),
        status: ServiceStatus::Running,
        pid: 999_999,
        ..ServiceDefinition::default()
    });

    supervisor.force_kill("ghost").await.expect("force kill");

    let def = catalog.get("ghost").expect("row");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
    assert_eq!(def.last_error, "Force killed");
}

#[tokio::test]
async fn force_kill_tracked_service() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "victim".into(),
        name: "victim".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });

    supervisor.start("victim").await.expect("start");
    let pid = catalog.get("victim").expect("row").pid;
    assert!(pid > 0);

    supervisor.force_kill("victim").await.expect("force kill");

    let def = catalog.get("victim").expect("row");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
    assert_eq!(def.last_error, "Force killed");
    assert!(supervisor.running().await.is_empty());
}

#[tokio::test]
async fn force_kill_finalizes_row_even_when_pid_survives_the_probe() {
    let (supervisor, catalog) = setup();

    // An unreaped child stays a zombie: signal-0 keeps reporting it alive
    // and SIGKILL cannot remove it. Force kill must still finalize the row.
    let mut zombie = std::process::Command::new("true")
        .spawn()
        .expect("spawn zombie");
    sleep(Duration::from_millis(200)).await;

    catalog.seed(ServiceDefinition {
        id: "undead".into(),
        name: "undead".into(),
        path: "/tmp".into(),
        status: ServiceStatus::Running,
        pid: zombie.id(),
        ..ServiceDefinition::default()
    });

    supervisor.force_kill("undead").await.expect("force kill");

    let def = catalog.get("undead").expect("row");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
    assert_eq!(def.last_error, "Force killed");

    // Idempotent: a second force kill over the finalized row also succeeds.
    supervisor.force_kill("undead").await.expect("second force kill");
    assert_eq!(catalog.get("undead").expect("row").status, ServiceStatus::Stopped);

    let _ = zombie.wait();
}

#[tokio::test]
async fn stop_escalates_to_kill_for_term_ignoring_process() {
    let (supervisor, catalog) = setup();
    let dir = tempfile::tempdir().unwrap();
    catalog.seed(script_service(
        "stubborn",
        &dir,
        "trap '' TERM; while true; do sleep 1; done",
    ));

    supervisor.start("stubborn").await.expect("start");
    let pid = catalog.get("stubborn").expect("row").pid;

    let start = Instant::now();
    supervisor.stop("stubborn").await.expect("stop");
    assert!(start.elapsed() < Duration::from_secs(13));

    let def = catalog.get("stubborn").expect("row");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);

    // The process group must actually be gone (reaped by the watcher).
    sleep(Duration::from_millis(200)).await;
    assert!(!probe::is_pid_live(pid));
}

#[tokio::test]
async fn natural_exit_finalizes_row() {
    let (supervisor, catalog) = setup();
    let dir = tempfile::tempdir().unwrap();
    catalog.seed(script_service("oneshot", &dir, "true"));

    supervisor.start("oneshot").await.expect("start");
    let def = wait_for_status(&catalog, "oneshot", ServiceStatus::Stopped, Duration::from_secs(5)).await;

    assert_eq!(def.pid, 0);
    assert!(def.last_error.is_empty());
    assert!(supervisor.running().await.is_empty());
}

#[tokio::test]
async fn abnormal_exit_records_error() {
    let (supervisor, catalog) = setup();
    let dir = tempfile::tempdir().unwrap();
    catalog.seed(script_service("failing", &dir, "exit 3"));

    supervisor.start("failing").await.expect("start");
    let def = wait_for_status(&catalog, "failing", ServiceStatus::Error, Duration::from_secs(5)).await;

    assert_eq!(def.pid, 0);
    assert!(def.last_error.contains('3'), "last_error was {:?}", def.last_error);
    assert!(supervisor.running().await.is_empty());
}

#[tokio::test]
async fn is_live_sees_persisted_pid() {
    let (supervisor, catalog) = setup();
    // Our own PID is certainly alive and has no handle.
    catalog.seed(ServiceDefinition {
        id: "adopted".into(),
        name: "adopted".into(),
        path: "/tmp".into(),
        pid: std::process::id(),
        status: ServiceStatus::Running,
        ..ServiceDefinition::default()
    });

    assert!(supervisor.is_live("adopted").await.expect("is_live"));
}

#[tokio::test]
async fn is_live_false_when_nothing_holds() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "dead".into(),
        name: "dead".into(),
        path: "/tmp".into(),
        pid: 999_999,
        status: ServiceStatus::Running,
        ..ServiceDefinition::default()
    });

    assert!(!supervisor.is_live("dead").await.expect("is_live"));
}

#[tokio::test]
async fn status_corrects_stale_running_row() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "stale".into(),
        name: "stale".into(),
        path: "/tmp".into(),
        pid: 999_999,
        status: ServiceStatus::Running,
        ..ServiceDefinition::default()
    });

    let def = supervisor.status("stale").await.expect("status");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);

    let row = catalog.get("stale").expect("row");
    assert_eq!(row.status, ServiceStatus::Stopped);
    assert_eq!(row.pid, 0);
}

#[tokio::test]
async fn status_upgrades_live_service_recorded_stopped() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "undersold".into(),
        name: "undersold".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });

    supervisor.start("undersold").await.expect("start");
    let pid = catalog.get("undersold").expect("row").pid;

    // Simulate an external writer clobbering the row.
    let mut clobbered = catalog.get("undersold").expect("row");
    clobbered.status = ServiceStatus::Stopped;
    catalog.seed(clobbered);

    let def = supervisor.status("undersold").await.expect("status");
    assert_eq!(def.status, ServiceStatus::Running);
    assert_eq!(def.pid, pid);

    supervisor.stop("undersold").await.expect("stop");
}

#[tokio::test]
async fn live_logs_absent_for_unknown_or_stopped() {
    let (supervisor, catalog) = setup();
    assert!(supervisor.live_logs("nobody").await.is_none());
    assert!(supervisor.buffered_logs("nobody").await.is_empty());

    catalog.seed(ServiceDefinition {
        id: "brief".into(),
        name: "brief".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });
    supervisor.start("brief").await.expect("start");
    supervisor.stop("brief").await.expect("stop");
    assert!(supervisor.live_logs("brief").await.is_none());
}

#[tokio::test]
async fn running_set_reflects_tracked_handles() {
    let (supervisor, catalog) = setup();
    catalog.seed(ServiceDefinition {
        id: "one".into(),
        name: "one".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });
    catalog.seed(ServiceDefinition {
        id: "two".into(),
        name: "two".into(),
        path: "/tmp".into(),
        command: "sleep 30".into(),
        ..ServiceDefinition::default()
    });

    supervisor.start("one").await.expect("start one");
    supervisor.start("two").await.expect("start two");

    let mut ids: Vec<String> = supervisor.running().await.into_iter().map(|d| d.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["one", "two"]);

    supervisor.stop("one").await.expect("stop one");
    let ids: Vec<String> = supervisor.running().await.into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["two"]);

    supervisor.stop("two").await.expect("stop two");
}

#[tokio::test]
async fn stop_kills_orphan_pid_without_handle() {
    let (supervisor, catalog) = setup();

    // A process the supervisor never spawned, as after a supervisor restart.
    let mut orphan = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn orphan");
    catalog.seed(ServiceDefinition {
        id: "orphaned".into(),
        name: "orphaned".into(),
        path: "/tmp".into(),
        pid: orphan.id(),
        status: ServiceStatus::Running,
        ..ServiceDefinition::default()
    });

    supervisor.stop("orphaned").await.expect("stop");

    let status = orphan.wait().expect("reap orphan");
    assert!(!status.success());

    let def = catalog.get("orphaned").expect("row");
    assert_eq!(def.status, ServiceStatus::Stopped);
    assert_eq!(def.pid, 0);
}
