//! Service supervisor
//!
//! The supervisor is the authoritative in-memory view of running services.
//! It maps each service id to at most one [`ProcessHandle`], spawns and
//! terminates child processes, captures their output, and reconciles the
//! persisted catalog with what the OS actually reports.
//!
//! ## Lifecycle
//!
//! ```text
//! stopped ──start──▶ starting ──spawn ok──▶ running ──exit ok──▶ stopped
//!            │                    │                      │
//!            │                    └──spawn fail──▶ error └──exit err──▶ error
//!            └──force kill──▶ stopped
//! running ──stop──▶ stopping ──wait/kill──▶ stopped
//! ```
//!
//! `error` is a terminal form of `stopped` with `last_error` set; the next
//! start transitions back through `starting`.
//!
//! ## Concurrency
//!
//! Each running service involves four actors: two log capture tasks, one
//! exit watcher, and any subscribers on the live log channel. The handle
//! map sits behind one `RwLock`; catalog status transitions for a given
//! service are ordered by that lock. The catalog itself is a best-effort
//! cache of supervisor plus OS reality — [`Supervisor::status`] is the
//! reconciliation point, never the lock.

use crate::process::unix::{self, ChildProcess};
use crate::repository::CatalogRepository;
use crate::{env, ports, probe, CoreError, Result};
use schema::{PortRecord, ServiceDefinition, ServiceStatus, ServiceType, StatusUpdate};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

pub mod capture;
pub mod handle;

#[cfg(test)]
pub mod integration_tests;

pub use handle::ProcessHandle;

/// Graceful window between cancellation and SIGKILL on stop
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);
/// Additional wait after the first SIGKILL before re-killing
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);
/// Delay between kill attempts on force kill
const FORCE_KILL_RECHECK: Duration = Duration::from_millis(500);
/// Pause between stop and start on restart
const RESTART_DELAY: Duration = Duration::from_secs(2);
/// Wait after killing an orphan PID the supervisor does not track
const ORPHAN_KILL_WAIT: Duration = Duration::from_secs(1);
/// Recheck delay after re-killing an orphan PID
const ORPHAN_RECHECK: Duration = Duration::from_millis(500);

struct SupervisorInner {
    catalog: Arc<dyn CatalogRepository>,
    handles: RwLock<HashMap<String, Arc<ProcessHandle>>>,
}

/// Manages the lifecycle of declared services on this host
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish()
    }
}

impl Supervisor {
    /// Create a supervisor backed by the given catalog
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                catalog,
                handles: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Start a declared service.
    ///
    /// Fails with `AlreadyRunning` when a handle is installed for the id,
    /// `NotFound` when the catalog has no such definition, and `Spawn` when
    /// the child cannot be created — in which case the catalog records
    /// `error` with the failure text and no handle is installed.
    pub async fn start(&self, id: &str) -> Result<()> {
        let mut handles = self.inner.handles.write().await;
        if handles.contains_key(id) {
            return Err(CoreError::AlreadyRunning(id.to_string()));
        }

        self.inner
            .catalog
            .update_status(id, StatusUpdate::status(ServiceStatus::Starting))
            .await?;
        let def = self.inner.catalog.load(id).await?;

        let project_path = Path::new(&def.path);
        if !project_path.is_absolute() || !project_path.is_dir() {
            return Err(self
                .fail_start(
                    id,
                    format!("project path '{}' is not an existing absolute directory", def.path),
                )
                .await);
        }

        let argv = build_command_line(&def);
        let workdir = if def.working_dir.is_empty() {
            def.path.clone()
        } else {
            def.working_dir.clone()
        };
        let environment = env::assemble(&def);

        let mut child = match unix::spawn_service(&argv, &environment, Path::new(&workdir)) {
            Ok(child) => child,
            Err(e) => {
                let message = match e {
                    CoreError::Spawn(msg) => msg,
                    other => other.to_string(),
                };
                return Err(self.fail_start(id, message).await);
            }
        };

        let pid = child.pid();
        if pid == 0 {
            return Err(self
                .fail_start(id, "process started but PID is invalid".to_string())
                .await);
        }

        info!("Started service '{}' with pid {}", id, pid);
        let handle = Arc::new(ProcessHandle::new(id, pid));

        if let Some(stdout) = child.take_stdout() {
            tokio::spawn(capture::capture_stream(
                stdout,
                handle.clone(),
                self.inner.catalog.clone(),
                false,
            ));
        }
        if let Some(stderr) = child.take_stderr() {
            tokio::spawn(capture::capture_stream(
                stderr,
                handle.clone(),
                self.inner.catalog.clone(),
                true,
            ));
        }

        handles.insert(id.to_string(), handle.clone());
        tokio::spawn(watch_exit(self.inner.clone(), handle, child));

        self.inner
            .catalog
            .update_status(
                id,
                StatusUpdate::status(ServiceStatus::Running)
                    .with_pid(pid)
                    .with_start_time(unix_now())
                    .with_last_error(""),
            )
            .await?;

        Ok(())
    }

    /// Stop a service gracefully. Idempotent: stopping an already-stopped
    /// service only refreshes the catalog and succeeds.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let mut handles = self.inner.handles.write().await;
        let def = self.inner.catalog.load(id).await?;

        let pid_live = def.pid > 0 && probe::is_pid_live(def.pid);
        let handle = handles.get(id).cloned();

        if !pid_live && handle.is_none() {
            self.inner
                .catalog
                .update_status(
                    id,
                    StatusUpdate::status(ServiceStatus::Stopped)
                        .with_pid(0)
                        .with_stop_time(unix_now()),
                )
                .await?;
            return Ok(());
        }

        self.inner
            .catalog
            .update_status(id, StatusUpdate::status(ServiceStatus::Stopping))
            .await?;

        if let Some(handle) = handle {
            handle.cancel();

            let mut exited = handle.exited();
            if timeout(STOP_GRACE_PERIOD, exited.wait_for(|done| *done))
                .await
                .is_err()
            {
                warn!(
                    "Service '{}' did not stop within {:?}, killing process group",
                    id, STOP_GRACE_PERIOD
                );
                unix::signal_kill_group(handle.pid())?;
                if timeout(KILL_GRACE_PERIOD, exited.wait_for(|done| *done))
                    .await
                    .is_err()
                {
                    unix::signal_kill_group(handle.pid())?;
                }
            }

            handle.close_channel();
            handles.remove(id);
        } else if def.pid > 0 {
            // A live PID with no handle: the supervisor restarted underneath
            // this service. Kill by PID directly.
            unix::kill_pid(def.pid)?;
            sleep(ORPHAN_KILL_WAIT).await;
            if probe::is_pid_live(def.pid) {
                unix::kill_pid(def.pid)?;
                sleep(ORPHAN_RECHECK).await;
            }
        }

        self.inner
            .catalog
            .update_status(
                id,
                StatusUpdate::status(ServiceStatus::Stopped)
                    .with_pid(0)
                    .with_stop_time(unix_now()),
            )
            .await?;

        info!("Service '{}' stopped", id);
        Ok(())
    }

    /// Restart a service: stop (when tracked), wait, start.
    pub async fn restart(&self, id: &str) -> Result<()> {
        let tracked = self.inner.handles.read().await.contains_key(id);
        if tracked {
            self.stop(id).await?;
            sleep(RESTART_DELAY).await;
        }
        self.start(id).await
    }

    /// Kill a service unconditionally, bypassing graceful termination.
    ///
    /// Always finalizes the catalog row, whether or not a handle was
    /// tracked and whatever the final liveness probe reports.
    pub async fn force_kill(&self, id: &str) -> Result<()> {
        let mut handles = self.inner.handles.write().await;
        let def = self.inner.catalog.load(id).await?;

        if def.pid > 0 {
            unix::kill_pid(def.pid)?;
            sleep(FORCE_KILL_RECHECK).await;
            if probe::is_pid_live(def.pid) {
                unix::kill_pid(def.pid)?;
                sleep(FORCE_KILL_RECHECK).await;
            }
        }

        if let Some(handle) = handles.remove(id) {
            handle.cancel();
            handle.close_channel();
        }

        if def.pid > 0 && probe::is_pid_live(def.pid) {
            warn!(
                "Pid {} of service '{}' still probes alive after SIGKILL",
                def.pid, id
            );
        }

        self.inner
            .catalog
            .update_status(
                id,
                StatusUpdate::status(ServiceStatus::Stopped)
                    .with_pid(0)
                    .with_stop_time(unix_now())
                    .with_last_error("Force killed"),
            )
            .await?;

        info!("Service '{}' force killed", id);
        Ok(())
    }

    /// Reconciling status read.
    ///
    /// Returns the catalog record corrected against the in-memory map and
    /// the OS: a live service recorded as stopped is upgraded (resolving
    /// its PID through the port inventory when necessary), a dead one
    /// recorded as running is downgraded and its stale handle removed.
    pub async fn status(&self, id: &str) -> Result<ServiceDefinition> {
        let mut def = self.inner.catalog.load(id).await?;
        let live = self.is_live_for(&def).await;
        let handle = self.inner.handles.read().await.get(id).cloned();

        if live {
            if matches!(def.status, ServiceStatus::Stopped | ServiceStatus::Starting) {
                let mut pid = def.pid;
                if pid == 0 && def.port > 0 {
                    if let Some(resolved) = ports::find_pid_by_port(def.port).await {
                        debug!("Resolved pid {} for '{}' from port {}", resolved, id, def.port);
                        pid = resolved;
                    }
                }
                let now = unix_now();
                self.inner
                    .catalog
                    .update_status(
                        id,
                        StatusUpdate::status(ServiceStatus::Running)
                            .with_pid(pid)
                            .with_start_time(now),
                    )
                    .await?;
                def.status = ServiceStatus::Running;
                def.pid = pid;
                def.start_time = Some(now);
            }
        } else if let Some(handle) = handle {
            if handle.has_exited() || !probe::is_pid_live(handle.pid()) {
                let now = unix_now();
                self.inner
                    .catalog
                    .update_status(
                        id,
                        StatusUpdate::status(ServiceStatus::Stopped)
                            .with_pid(0)
                            .with_stop_time(now),
                    )
                    .await?;
                let mut handles = self.inner.handles.write().await;
                if handles.get(id).is_some_and(|h| Arc::ptr_eq(h, &handle)) {
                    handles.remove(id);
                }
                handle.close_channel();
                def.status = ServiceStatus::Stopped;
                def.pid = 0;
                def.stop_time = Some(now);
            }
        } else if matches!(def.status, ServiceStatus::Running | ServiceStatus::Starting) {
            let now = unix_now();
            self.inner
                .catalog
                .update_status(
                    id,
                    StatusUpdate::status(ServiceStatus::Stopped)
                        .with_pid(0)
                        .with_stop_time(now),
                )
                .await?;
            def.status = ServiceStatus::Stopped;
            def.pid = 0;
            def.stop_time = Some(now);
        }

        Ok(def)
    }

    /// Whether the service is actually alive, by the ordered liveness rules
    pub async fn is_live(&self, id: &str) -> Result<bool> {
        let def = self.inner.catalog.load(id).await?;
        Ok(self.is_live_for(&def).await)
    }

    /// Ordered liveness check; the first hit wins:
    ///
    /// 1. a tracked handle whose PID answers a signal-0 probe
    /// 2. the declared port bound in LISTEN state (wrappers like `npm start`
    ///    exit while the real server stays bound)
    /// 3. the persisted PID answering a signal-0 probe
    /// 4. children of the persisted PID still running
    async fn is_live_for(&self, def: &ServiceDefinition) -> bool {
        if let Some(handle) = self.inner.handles.read().await.get(&def.id) {
            if probe::is_pid_live(handle.pid()) {
                return true;
            }
        }

        if def.port > 0 && probe::is_port_listening(def.port).await {
            return true;
        }

        if def.pid > 0 {
            if probe::is_pid_live(def.pid) {
                return true;
            }
            if probe::has_child_processes(def.pid).await {
                return true;
            }
        }

        false
    }

    /// Definitions of every currently tracked service
    pub async fn running(&self) -> Vec<ServiceDefinition> {
        let ids: Vec<String> = self.inner.handles.read().await.keys().cloned().collect();

        let mut defs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.inner.catalog.load(&id).await {
                Ok(def) => defs.push(def),
                Err(e) => warn!("Tracked service '{}' missing from catalog: {}", id, e),
            }
        }
        defs
    }

    /// Subscribe to newly captured log lines for a service.
    ///
    /// Returns `None` when no handle exists or the tracked process no
    /// longer answers a signal-0 probe.
    pub async fn live_logs(&self, id: &str) -> Option<broadcast::Receiver<String>> {
        let handles = self.inner.handles.read().await;
        let handle = handles.get(id)?;
        if !probe::is_pid_live(handle.pid()) {
            return None;
        }
        handle.subscribe()
    }

    /// Snapshot of the buffered log ring; empty when no handle exists
    pub async fn buffered_logs(&self, id: &str) -> Vec<String> {
        match self.inner.handles.read().await.get(id) {
            Some(handle) => handle.snapshot(),
            None => Vec::new(),
        }
    }

    /// Enumerate listening TCP sockets on the host
    pub async fn ports(&self) -> Result<Vec<PortRecord>> {
        ports::enumerate().await
    }

    /// Kill the process holding the given port
    pub async fn kill_port(&self, port: u16) -> Result<()> {
        ports::kill_port(port).await
    }

    /// Persist a spawn failure and produce the error to return
    async fn fail_start(&self, id: &str, message: String) -> CoreError {
        if let Err(e) = self
            .inner
            .catalog
            .update_status(
                id,
                StatusUpdate::status(ServiceStatus::Error)
                    .with_pid(0)
                    .with_last_error(message.clone()),
            )
            .await
        {
            warn!("Failed to record start failure for '{}': {}", id, e);
        }
        CoreError::Spawn(message)
    }
}

/// Build the argv for a definition: explicit command split on whitespace
/// with extra arg tokens appended, or a type-derived default.
fn build_command_line(def: &ServiceDefinition) -> Vec<String> {
    if !def.command.trim().is_empty() {
        let mut argv: Vec<String> = def.command.split_whitespace().map(str::to_string).collect();
        argv.extend(def.args.split_whitespace().map(str::to_string));
        return argv;
    }

    let default: &[&str] = match def.service_type {
        ServiceType::Backend => &["go", "run", "main.go"],
        ServiceType::Frontend => &["npm", "start"],
        _ => &["sh", "-c", "echo 'No command specified'"],
    };
    default.iter().map(|s| (*s).to_string()).collect()
}

/// Exit watcher: waits for the child, relays graceful-termination requests,
/// and finalizes state when the process exits on its own.
///
/// When stop or force-kill already removed the handle, the watcher skips
/// the status write — whoever tore the handle down owns the final word.
async fn watch_exit(
    inner: Arc<SupervisorInner>,
    handle: Arc<ProcessHandle>,
    mut child: ChildProcess,
) {
    let cancel = handle.cancel_token();
    let mut term_sent = false;

    let wait_result = loop {
        tokio::select! {
            status = child.wait() => break status,
            () = cancel.cancelled(), if !term_sent => {
                term_sent = true;
                if let Err(e) = unix::signal_term_group(handle.pid()) {
                    warn!(
                        "Failed to request termination of '{}' (pid {}): {}",
                        handle.service_id(),
                        handle.pid(),
                        e
                    );
                }
            }
        }
    };

    handle.mark_exited();

    let still_tracked = {
        let mut handles = inner.handles.write().await;
        let tracked = handles
            .get(handle.service_id())
            .is_some_and(|h| Arc::ptr_eq(h, &handle));
        if tracked {
            handles.remove(handle.service_id());
        }
        handle.close_channel();
        tracked
    };

    if !still_tracked {
        return;
    }

    let update = match &wait_result {
        Ok(status) if status.success() => {
            info!("Service '{}' exited cleanly", handle.service_id());
            StatusUpdate::status(ServiceStatus::Stopped).with_last_error("")
        }
        Ok(status) => {
            warn!(
                "Service '{}' exited abnormally: {}",
                handle.service_id(),
                status
            );
            StatusUpdate::status(ServiceStatus::Error).with_last_error(status.to_string())
        }
        Err(e) => {
            error!("Failed waiting on service '{}': {}", handle.service_id(), e);
            StatusUpdate::status(ServiceStatus::Error).with_last_error(e.to_string())
        }
    };

    if let Err(e) = inner
        .catalog
        .update_status(
            handle.service_id(),
            update.with_pid(0).with_stop_time(unix_now()),
        )
        .await
    {
        warn!(
            "Failed to persist exit of '{}': {}",
            handle.service_id(),
            e
        );
    }
}

fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
