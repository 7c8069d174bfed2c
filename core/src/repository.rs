//! Catalog repository contract
//!
//! The supervisor core persists service state through this narrow contract;
//! the concrete store (SQLite in the daemon crate) lives behind it. All
//! mutations are atomic at the single-row level and the repository may be
//! used concurrently from any number of tasks.

use crate::Result;
use async_trait::async_trait;
use schema::{ServiceDefinition, StatusUpdate};

/// Read/write access to the persistent service catalog
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Load a definition by id; `CoreError::NotFound` when absent
    async fn load(&self, id: &str) -> Result<ServiceDefinition>;

    /// List every definition in the catalog
    async fn list(&self) -> Result<Vec<ServiceDefinition>>;

    /// Insert or replace a definition
    async fn upsert(&self, def: &ServiceDefinition) -> Result<()>;

    /// Delete a definition; deleting an absent row is not an error
    async fn delete(&self, id: &str) -> Result<()>;

    /// Apply a partial status update to one row.
    ///
    /// The status field is always written; `None` fields are left unchanged.
    async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<()>;

    /// Replace the persisted log snapshot (a JSON array of strings) for one row
    async fn update_logs(&self, id: &str, logs: Vec<String>) -> Result<()>;
}
