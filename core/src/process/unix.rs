//! Unix process spawning and signalling using process groups
//!
//! Managed services are spawned in their own process group via `setsid()`,
//! so the whole tree a service forks (build-tool wrappers, dev servers) can
//! be signalled through the group leader. Signals directed at PIDs the
//! supervisor no longer owns (orphans recorded in the catalog) go through
//! the plain `kill` path instead.
//!
//! `ESRCH` (no such process) is treated as success everywhere: the target
//! being gone is exactly the state a signal was meant to reach.

// Process management requires libc::setsid() in pre_exec.
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// A service child process running in its own process group
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    child: Child,
}

impl ChildProcess {
    /// Process ID of the group leader
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::Spawn(format!("failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        self.child.try_wait().map_err(|e| {
            CoreError::Spawn(format!("failed to poll process {}: {}", self.pid, e))
        })
    }

    /// Take the piped stdout handle, if not already taken
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the piped stderr handle, if not already taken
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

/// Spawn a service process in its own process group.
///
/// `argv[0]` is the program; the remaining elements are its arguments. The
/// child gets exactly the provided environment (the inherited environment is
/// cleared first), the given working directory, piped stdout/stderr, and a
/// null stdin. `setsid()` runs in the child before `exec`, making it the
/// leader of a fresh session and process group.
pub fn spawn_service(
    argv: &[String],
    env: &HashMap<String, String>,
    cwd: &Path,
) -> Result<ChildProcess> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CoreError::Spawn("empty command line".to_string()))?;

    debug!("Spawning '{}' with {} args in {}", program, args.len(), cwd.display());

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Safety: setsid() is async-signal-safe and valid between fork and exec.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn '{}': {}", program, e);
        CoreError::Spawn(format!("failed to spawn '{}': {}", program, e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::Spawn("spawned child did not report a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

/// Send SIGTERM to a service's process group for graceful termination
pub fn signal_term_group(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGTERM)
}

/// Send SIGKILL to a service's process group
pub fn signal_kill_group(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGKILL)
}

fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    let pgid = Pid::from_raw(pid as i32);
    debug!("Sending {} to process group {}", signal, pgid);

    match killpg(pgid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {} already exited", pgid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            // Ownership changed underneath us; the original group is gone.
            debug!("Permission denied signalling process group {}", pgid);
            Ok(())
        }
        Err(e) => Err(CoreError::Kill(format!(
            "failed to send {} to process group {}: {}",
            signal, pgid, e
        ))),
    }
}

/// Send SIGKILL to a single PID the supervisor does not own.
///
/// Used against orphan PIDs recorded in the catalog after a supervisor
/// restart, and against port owners on explicit kill-port requests.
pub fn kill_pid(pid: u32) -> Result<()> {
    let target = Pid::from_raw(pid as i32);
    debug!("Sending SIGKILL to pid {}", target);

    match kill(target, Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(CoreError::Kill(format!(
            "failed to kill pid {}: {}",
            target, e
        ))),
    }
}
