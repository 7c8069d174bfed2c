//! In-memory record of a running service process
//!
//! A [`ProcessHandle`] is installed by a successful spawn and removed when
//! the exit watcher observes process exit (or an explicit stop/force-kill
//! tears it down). The handle owns the bounded log ring, the live log
//! fan-out channel, the child's cancellation token, and the exit flag the
//! stop path awaits.

use crate::logging::LogRing;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of the live log fan-out channel
pub const LIVE_CHANNEL_CAPACITY: usize = 1000;

/// Live channel state guarded by its own lock so closing is one-shot
#[derive(Debug)]
struct LiveChannel {
    sender: Option<broadcast::Sender<String>>,
    closed: bool,
}

/// Per-running-service record tracked by the supervisor
#[derive(Debug)]
pub struct ProcessHandle {
    service_id: String,
    pid: u32,
    started_at: Instant,
    cancel: CancellationToken,
    ring: Mutex<LogRing>,
    live: Mutex<LiveChannel>,
    exited_tx: watch::Sender<bool>,
    exited_rx: watch::Receiver<bool>,
}

impl ProcessHandle {
    /// Create a handle for a freshly spawned process
    pub fn new(service_id: impl Into<String>, pid: u32) -> Self {
        let (sender, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        let (exited_tx, exited_rx) = watch::channel(false);
        Self {
            service_id: service_id.into(),
            pid,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
            ring: Mutex::new(LogRing::default()),
            live: Mutex::new(LiveChannel {
                sender: Some(sender),
                closed: false,
            }),
            exited_tx,
            exited_rx,
        }
    }

    /// Service id this handle belongs to
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// PID of the spawned process (the process group leader)
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Seconds since the process was spawned
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Cancellation token requesting graceful termination
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request graceful termination of the child
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Append a line to the log ring; never blocks, evicts the oldest line
    /// when the ring is full
    pub fn append_log(&self, line: &str) {
        self.ring
            .lock()
            .expect("log ring lock poisoned")
            .push(line.to_string());
    }

    /// Copy of the retained log lines, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.ring
            .lock()
            .expect("log ring lock poisoned")
            .snapshot()
    }

    /// Publish a line on the live channel without blocking.
    ///
    /// Lines published with no subscriber, after close, or past a lagging
    /// subscriber's buffer are dropped from the live stream; the ring
    /// retains them regardless.
    pub fn publish(&self, line: String) {
        let live = self.live.lock().expect("live channel lock poisoned");
        if let Some(sender) = &live.sender {
            let _ = sender.send(line);
        }
    }

    /// Subscribe to the live channel; `None` once the channel is closed
    pub fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        let live = self.live.lock().expect("live channel lock poisoned");
        live.sender.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Close the live channel. Safe to call any number of times; only the
    /// first call has an effect.
    pub fn close_channel(&self) {
        let mut live = self.live.lock().expect("live channel lock poisoned");
        if live.closed {
            return;
        }
        live.closed = true;
        live.sender.take();
        debug!("Closed live log channel for service '{}'", self.service_id);
    }

    /// Record that the child process has exited
    pub fn mark_exited(&self) {
        let _ = self.exited_tx.send(true);
    }

    /// Whether the exit watcher has observed process exit
    pub fn has_exited(&self) -> bool {
        *self.exited_rx.borrow()
    }

    /// Watch receiver that flips to `true` when the process exits
    pub fn exited(&self) -> watch::Receiver<bool> {
        self.exited_rx.clone()
    }
}
