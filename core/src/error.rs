//! Core error types and utilities

use thiserror::Error;

/// Errors surfaced by supervisor operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// No catalog entry for the given service id
    #[error("service '{0}' not found")]
    NotFound(String),

    /// Start was called while a handle is already installed for the id
    #[error("service '{0}' is already running")]
    AlreadyRunning(String),

    /// Child-process creation failed or returned an invalid PID
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// A process survived the full kill sequence
    #[error("process {pid} did not exit after SIGKILL")]
    StopTimeout {
        /// PID that refused to die
        pid: u32,
    },

    /// The OS kill call failed against an existing PID
    #[error("failed to kill process: {0}")]
    Kill(String),

    /// Every port-probe mechanism failed to execute on this host
    #[error("no usable port probe: {0}")]
    PortProbe(String),

    /// Propagated from the catalog repository
    #[error("catalog error: {0}")]
    Repository(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Short stable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "RGL001",
            CoreError::AlreadyRunning(_) => "RGL002",
            CoreError::Spawn(_) => "RGL003",
            CoreError::StopTimeout { .. } => "RGL004",
            CoreError::Kill(_) => "RGL005",
            CoreError::PortProbe(_) => "RGL006",
            CoreError::Repository(_) => "RGL007",
            CoreError::Io(_) => "RGL008",
            CoreError::Serialization(_) => "RGL009",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;
