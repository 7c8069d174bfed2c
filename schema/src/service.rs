//! Service definition and status types for the Rigel supervisor
//!
//! This module contains the catalog-facing data structures: the declared
//! shape of a managed service, its observed runtime status, and the partial
//! status update applied by the supervisor as processes come and go.
//!
//! ## Service Lifecycle
//!
//! Services progress through the following statuses:
//! - `Stopped`: no process is running
//! - `Starting`: a start request has been accepted, process not yet confirmed
//! - `Running`: a process (or its surviving children) is alive
//! - `Stopping`: a stop request is in flight
//! - `Error`: the last process exited abnormally or failed to spawn
//! - `Unknown`: the catalog holds no reliable information

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Observed runtime status of a managed service
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// No process is running
    #[default]
    Stopped,
    /// Start accepted, process not yet confirmed running
    Starting,
    /// A process (or its surviving children) is alive
    Running,
    /// Stop request in flight
    Stopping,
    /// Last process exited abnormally or failed to spawn
    Error,
    /// No reliable information available
    Unknown,
}

impl ServiceStatus {
    /// Check whether the catalog claims a live or in-flight process
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Check whether this status allows a new start request
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error | Self::Unknown)
    }

    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Parse the persisted string form; unrecognized values map to `Unknown`
    pub fn parse(s: &str) -> Self {
        match s {
            "stopped" => Self::Stopped,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of workload a service represents
///
/// The type selects a default command when the definition declares none.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Compiled or scripted backend server
    Backend,
    /// Frontend dev-server workload
    Frontend,
    /// Background worker process
    Worker,
    /// Database engine
    Database,
    /// Message queue / broker
    Queue,
    /// Anything else
    #[default]
    Other,
}

impl ServiceType {
    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Worker => "worker",
            Self::Database => "database",
            Self::Queue => "queue",
            Self::Other => "other",
        }
    }

    /// Parse the persisted string form; unrecognized values map to `Other`
    pub fn parse(s: &str) -> Self {
        match s {
            "backend" => Self::Backend,
            "frontend" => Self::Frontend,
            "worker" => Self::Worker,
            "database" => Self::Database,
            "queue" => Self::Queue,
            _ => Self::Other,
        }
    }
}

/// Deployment environment tag propagated to child processes as `ENVIRONMENT`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentTag {
    /// Local development
    #[default]
    Development,
    /// Staging / pre-production
    Staging,
    /// Production
    Production,
}

impl EnvironmentTag {
    /// Stable string form used for persistence and env injection
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Parse the persisted string form; unrecognized values map to `Development`
    pub fn parse(s: &str) -> Self {
        match s {
            "staging" => Self::Staging,
            "production" => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Complete catalog record for a managed service
///
/// The declared fields describe how to launch the service; the observed
/// fields are a best-effort cache of supervisor and OS reality, reconciled
/// on every status read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    /// Unique, stable identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Workload kind; selects the default command when `command` is empty
    #[serde(default)]
    pub service_type: ServiceType,

    /// Absolute project directory; must exist when the service is started
    pub path: String,

    /// Command line, split on whitespace into program and arguments.
    /// Empty selects a type-derived default.
    #[serde(default)]
    pub command: String,

    /// Extra whitespace-separated argument tokens appended to `command`
    #[serde(default)]
    pub args: String,

    /// Working directory override; empty falls back to `path`
    #[serde(default)]
    pub working_dir: String,

    /// Primary TCP port; 0 means unset. A bound port in LISTEN state counts
    /// as proof of liveness even when the spawned process has exited.
    #[serde(default)]
    pub port: u16,

    /// Path to an env file; empty falls back to `<path>/.env` when present
    #[serde(default)]
    pub env_file: String,

    /// Inline environment overrides as a JSON object string
    #[serde(default)]
    pub env_vars: String,

    /// Deployment environment tag
    #[serde(default)]
    pub environment: EnvironmentTag,

    /// Last observed status
    #[serde(default)]
    pub status: ServiceStatus,

    /// Last observed PID; 0 when not running
    #[serde(default)]
    pub pid: u32,

    /// Unix timestamp of the last successful start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,

    /// Unix timestamp of the last stop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<i64>,

    /// Text of the last failure; empty when the last run was clean
    #[serde(default)]
    pub last_error: String,

    /// Restart policy flag, stored for external policy engines.
    /// The supervisor core never respawns on its own.
    #[serde(default)]
    pub auto_restart: bool,

    /// Restart budget, stored alongside `auto_restart`
    #[serde(default)]
    pub max_restarts: u32,

    /// Persisted snapshot of recent log lines (at most 1000)
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Partial status update applied by the supervisor
///
/// `None` fields are left unchanged by the repository; the status itself is
/// always written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    /// New status value
    pub status: ServiceStatus,
    /// New PID; `Some(0)` clears the recorded PID
    pub pid: Option<u32>,
    /// Start timestamp (unix seconds)
    pub start_time: Option<i64>,
    /// Stop timestamp (unix seconds)
    pub stop_time: Option<i64>,
    /// Failure text; `Some(String::new())` clears the recorded error
    pub last_error: Option<String>,
}

impl StatusUpdate {
    /// Update only the status field
    pub fn status(status: ServiceStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Set the PID alongside the status
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Set the start timestamp alongside the status
    #[must_use]
    pub fn with_start_time(mut self, ts: i64) -> Self {
        self.start_time = Some(ts);
        self
    }

    /// Set the stop timestamp alongside the status
    #[must_use]
    pub fn with_stop_time(mut self, ts: i64) -> Self {
        self.stop_time = Some(ts);
        self
    }

    /// Set (or clear, with an empty string) the failure text
    #[must_use]
    pub fn with_last_error(mut self, err: impl Into<String>) -> Self {
        self.last_error = Some(err.into());
        self
    }
}
