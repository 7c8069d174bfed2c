//! Listening-port records produced by the host port inventory

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One listening TCP socket with process attribution
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    /// Listening TCP port
    pub port: u16,
    /// PID of the owning process
    pub pid: u32,
    /// Short process name as reported by the enumeration tool
    pub process_name: String,
    /// Owning user, or `"unknown"` when the tool does not report one
    pub user: String,
    /// Full command line resolved from the process table
    pub command: String,
    /// Socket state; always `"LISTEN"` for inventory records
    pub state: String,
}

impl PortRecord {
    /// Socket state string attached to every inventory record
    pub const LISTEN: &'static str = "LISTEN";
}
