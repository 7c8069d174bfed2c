//! Log capture tasks
//!
//! One task per pipe reads the child's stdout or stderr line by line,
//! strips terminal control sequences, tags stderr, feeds the handle's ring
//! and live channel, and persists the ring snapshot through the catalog at
//! a throttled cadence with a final flush at EOF.

use crate::logging::strip_control_sequences;
use crate::repository::CatalogRepository;
use crate::supervisor::handle::ProcessHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

/// Prefix attached to stderr lines and capture errors
pub const STDERR_PREFIX: &str = "[ERROR] ";

/// Minimum interval between persisted log snapshots
const PERSIST_INTERVAL: Duration = Duration::from_secs(2);

/// Read one output pipe to EOF, retaining and publishing each line.
///
/// `is_stderr` selects the `[ERROR] ` prefix. The snapshot persist runs as
/// a detached task so a slow catalog never stalls capture; write failures
/// are logged and dropped.
pub(crate) async fn capture_stream<R>(
    pipe: R,
    handle: Arc<ProcessHandle>,
    catalog: Arc<dyn CatalogRepository>,
    is_stderr: bool,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    capture_lines(BufReader::new(pipe), handle, catalog, is_stderr).await;
}

async fn capture_lines<R>(
    reader: R,
    handle: Arc<ProcessHandle>,
    catalog: Arc<dyn CatalogRepository>,
    is_stderr: bool,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut last_persist = Instant::now();

    loop {
        match lines.next_line().await {
            Ok(Some(raw)) => {
                let clean = strip_control_sequences(&raw);
                if clean.is_empty() {
                    continue;
                }
                let line = if is_stderr {
                    format!("{STDERR_PREFIX}{clean}")
                } else {
                    clean
                };

                handle.append_log(&line);
                handle.publish(line);

                if last_persist.elapsed() > PERSIST_INTERVAL {
                    persist_snapshot(&handle, &catalog);
                    last_persist = Instant::now();
                }
            }
            Ok(None) => break,
            Err(e) => {
                let line = format!("{STDERR_PREFIX}Error reading output: {e}");
                handle.append_log(&line);
                handle.publish(line);
                break;
            }
        }
    }

    persist_snapshot(&handle, &catalog);
}

/// Persist the current ring snapshot without blocking the capture loop
fn persist_snapshot(handle: &Arc<ProcessHandle>, catalog: &Arc<dyn CatalogRepository>) {
    let snapshot = handle.snapshot();
    if snapshot.is_empty() {
        return;
    }

    let catalog = catalog.clone();
    let service_id = handle.service_id().to_string();
    tokio::spawn(async move {
        if let Err(e) = catalog.update_logs(&service_id, snapshot).await {
            debug!("Failed to persist log snapshot for '{}': {}", service_id, e);
        }
    });
}
