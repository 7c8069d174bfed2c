//! OS-level liveness probing
//!
//! Three primitives back the supervisor's liveness rules:
//!
//! - [`is_pid_live`]: a signal-0 probe by PID
//! - [`has_child_processes`]: parent-PID lookup in the process table, for
//!   wrappers that fork a long-lived child and exit
//! - [`is_port_listening`]: LISTEN-state detection for a TCP port
//!
//! Port probing works through a mandatory fallback chain (`lsof` with and
//! without the LISTEN filter, then the `netstat` socket table, then `ss`);
//! hosts that lack one tool still probe correctly with the next. When no
//! tool can run at all the failure is logged and the port is reported as
//! not listening.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Check whether a PID refers to a live process via a signal-0 probe.
///
/// `EPERM` counts as alive: the process exists even though we may not
/// signal it.
pub fn is_pid_live(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Check whether any process lists `pid` as its parent.
///
/// Covers the wrapper pattern where the spawned process (npm, yarn, a build
/// tool) exits after forking the real server.
pub async fn has_child_processes(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match Command::new("pgrep")
        .arg("-P")
        .arg(pid.to_string())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(output) => {
            output.status.success() && output.stdout.iter().any(|b| !b.is_ascii_whitespace())
        }
        Err(e) => {
            debug!("pgrep unavailable while probing children of {}: {}", pid, e);
            false
        }
    }
}

/// Check whether a TCP port is bound in LISTEN state on this host.
///
/// Ordered attempts: `lsof` with the LISTEN filter, `lsof` unfiltered,
/// `netstat -an`, `ss -an`. The first hit wins; a port is reported free
/// only after every available tool agrees.
pub async fn is_port_listening(port: u16) -> bool {
    let mut any_probe_ran = false;

    for filter in [true, false] {
        let mut cmd = Command::new("lsof");
        cmd.arg("-i").arg(format!(":{port}"));
        if filter {
            cmd.arg("-sTCP:LISTEN");
        }
        match cmd.stdout(Stdio::null()).stderr(Stdio::null()).status().await {
            Ok(status) => {
                any_probe_ran = true;
                // lsof exits zero exactly when it matched something
                if status.success() {
                    return true;
                }
            }
            Err(e) => debug!("lsof probe for port {} failed to run: {}", port, e),
        }
    }

    for tool in ["netstat", "ss"] {
        match Command::new(tool)
            .arg("-an")
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(output) => {
                any_probe_ran = true;
                if table_has_listener(&String::from_utf8_lossy(&output.stdout), port) {
                    return true;
                }
            }
            Err(e) => debug!("{} probe for port {} failed to run: {}", tool, port, e),
        }
    }

    if !any_probe_ran {
        warn!(
            "no port probe available on this host (lsof, netstat, ss all failed); \
             treating port {} as not listening",
            port
        );
    }
    false
}

/// Scan a socket table for a local address ending in `:port` in LISTEN state
fn table_has_listener(table: &str, port: u16) -> bool {
    let suffix = format!(":{port}");
    table
        .lines()
        .filter(|line| line.contains("LISTEN"))
        .any(|line| line.split_whitespace().any(|field| field.ends_with(&suffix)))
}
