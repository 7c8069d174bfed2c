//! Host listening-port inventory
//!
//! Enumerates listening TCP sockets with process attribution and kills the
//! owner of a given port. The primary source is `lsof`; hosts without it
//! fall back to `netstat -tlnp`, then `ss -tlnp`. Each record's full command
//! line is resolved from the process table by PID.

use crate::process::unix;
use crate::{probe, CoreError, Result};
use schema::PortRecord;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Delay between kill attempts when clearing a port
const KILL_RECHECK_DELAY: Duration = Duration::from_millis(500);

/// Enumerate all listening TCP sockets on the host
pub async fn enumerate() -> Result<Vec<PortRecord>> {
    match enumerate_lsof().await {
        Ok(records) => Ok(records),
        Err(e) => {
            debug!("lsof enumeration unavailable ({}), trying netstat", e);
            match enumerate_netstat().await {
                Ok(records) => Ok(records),
                Err(e) => {
                    debug!("netstat enumeration unavailable ({}), trying ss", e);
                    enumerate_ss().await
                }
            }
        }
    }
}

/// Find the PID listening on a port, if any
pub async fn find_pid_by_port(port: u16) -> Option<u32> {
    // Terse mode prints bare PIDs, one per line
    if let Ok(output) = Command::new("lsof")
        .arg("-ti")
        .arg(format!(":{port}"))
        .stderr(Stdio::null())
        .output()
        .await
    {
        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            if let Some(pid) = text.lines().next().and_then(|l| l.trim().parse().ok()) {
                return Some(pid);
            }
        }
    }

    // Socket table fallback
    if let Ok(output) = Command::new("netstat")
        .arg("-tlnp")
        .stderr(Stdio::null())
        .output()
        .await
    {
        let suffix = format!(":{port}");
        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines().filter(|l| l.contains("LISTEN")) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local_matches = fields.get(3).is_some_and(|addr| addr.ends_with(&suffix));
            if !local_matches {
                continue;
            }
            if let Some(pid) = fields.get(6).and_then(|f| pid_from_netstat_field(f)) {
                return Some(pid);
            }
        }
    }

    None
}

/// Kill the process holding a port: SIGKILL, 500 ms grace, one re-kill.
///
/// Fails when no process is listening on the port or the kill call itself
/// is rejected.
pub async fn kill_port(port: u16) -> Result<()> {
    let pid = find_pid_by_port(port)
        .await
        .ok_or_else(|| CoreError::Kill(format!("no process found on port {port}")))?;

    warn!("Killing pid {} holding port {}", pid, port);
    unix::kill_pid(pid)?;
    tokio::time::sleep(KILL_RECHECK_DELAY).await;
    if probe::is_pid_live(pid) {
        unix::kill_pid(pid)?;
    }

    Ok(())
}

async fn enumerate_lsof() -> Result<Vec<PortRecord>> {
    let output = Command::new("lsof")
        .args(["-iTCP", "-sTCP:LISTEN", "-P", "-n"])
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| CoreError::PortProbe(format!("lsof failed to run: {e}")))?;
    if !output.status.success() {
        return Err(CoreError::PortProbe("lsof returned no listeners".to_string()));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut records = Vec::new();

    // Header: COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME
    for line in text.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }

        let process_name = fields[0];
        let Ok(pid) = fields[1].parse::<u32>() else {
            continue;
        };
        let user = fields[2];

        // The NAME column is the rightmost field containing a colon; it may
        // have been split if the address itself contained spaces.
        let Some(name_start) = fields.iter().rposition(|f| f.contains(':')) else {
            continue;
        };
        let name = fields[name_start..].join(" ");
        let Some(port) = port_from_lsof_name(&name) else {
            continue;
        };

        records.push(PortRecord {
            port,
            pid,
            process_name: process_name.to_string(),
            user: user.to_string(),
            command: process_command(pid).await,
            state: PortRecord::LISTEN.to_string(),
        });
    }

    Ok(records)
}

async fn enumerate_netstat() -> Result<Vec<PortRecord>> {
    let output = Command::new("netstat")
        .arg("-tlnp")
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| CoreError::PortProbe(format!("netstat failed to run: {e}")))?;

    let text = String::from_utf8_lossy(&output.stdout);
    let mut records = Vec::new();

    for line in text.lines().filter(|l| l.contains("LISTEN")) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let Some(port) = port_from_addr(fields[3]) else {
            continue;
        };

        // PID/Program column is only present when netstat can attribute
        let Some(pid_field) = fields.get(6) else {
            continue;
        };
        let Some(pid) = pid_from_netstat_field(pid_field) else {
            continue;
        };
        let process_name = pid_field.split('/').nth(1).unwrap_or("unknown");

        records.push(PortRecord {
            port,
            pid,
            process_name: process_name.to_string(),
            user: "unknown".to_string(),
            command: process_command(pid).await,
            state: PortRecord::LISTEN.to_string(),
        });
    }

    Ok(records)
}

async fn enumerate_ss() -> Result<Vec<PortRecord>> {
    let output = Command::new("ss")
        .arg("-tlnp")
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| CoreError::PortProbe(format!("ss failed to run: {e}")))?;

    let text = String::from_utf8_lossy(&output.stdout);
    let mut records = Vec::new();

    for line in text.lines().filter(|l| l.contains("LISTEN")) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }
        let Some(port) = port_from_addr(fields[3]) else {
            continue;
        };
        let Some(process_field) = fields.get(5) else {
            continue;
        };
        let Some(pid) = pid_from_ss_field(process_field) else {
            continue;
        };

        records.push(PortRecord {
            port,
            pid,
            process_name: name_from_ss_field(process_field),
            user: "unknown".to_string(),
            command: process_command(pid).await,
            state: PortRecord::LISTEN.to_string(),
        });
    }

    Ok(records)
}

/// Resolve the full command line for a PID from the process table
async fn process_command(pid: u32) -> String {
    for column in ["command=", "args="] {
        if let Ok(output) = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", column])
            .stderr(Stdio::null())
            .output()
            .await
        {
            if output.status.success() {
                let command = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !command.is_empty() {
                    return command;
                }
            }
        }
    }
    "unknown".to_string()
}

/// Extract the port from an lsof NAME field.
///
/// Accepted forms: `*:5173`, `localhost:5173`, `127.0.0.1:5173`,
/// `[::1]:5173`, with an optional trailing `(LISTEN)` annotation. The port
/// is the substring after the last colon; values outside 1..=65535 are
/// rejected.
pub(crate) fn port_from_lsof_name(name: &str) -> Option<u16> {
    let name = name.trim_matches(|c| c == '[' || c == ']');
    let (_, port_part) = name.rsplit_once(':')?;
    let port_part = match port_part.find('(') {
        Some(idx) => &port_part[..idx],
        None => port_part,
    };
    parse_port(port_part.trim())
}

/// Extract the port from a socket-table local address (`0.0.0.0:5173`,
/// `:::5173`, `*:5173`)
pub(crate) fn port_from_addr(addr: &str) -> Option<u16> {
    let (_, port_part) = addr.rsplit_once(':')?;
    parse_port(port_part)
}

fn parse_port(s: &str) -> Option<u16> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Extract the PID from an ss process field of the form `pid=1234,cmd=node`
pub(crate) fn pid_from_ss_field(field: &str) -> Option<u32> {
    if !field.starts_with("pid=") {
        return None;
    }
    let first = field.split(',').next()?;
    first.strip_prefix("pid=")?.parse().ok()
}

/// Extract the process name from an ss process field; `"unknown"` when absent
pub(crate) fn name_from_ss_field(field: &str) -> String {
    match field.find("cmd=") {
        Some(idx) => {
            let rest = &field[idx + 4..];
            match rest.find(',') {
                Some(comma) => rest[..comma].to_string(),
                None => rest.to_string(),
            }
        }
        None => "unknown".to_string(),
    }
}

/// Extract the PID from a netstat `PID/Program` field
fn pid_from_netstat_field(field: &str) -> Option<u32> {
    field.split('/').next()?.parse().ok()
}
