//! Daemon bootstrap: wire the catalog, supervisor, and recovery pass
//!
//! On boot the daemon walks every catalog row through a reconciling status
//! read. Rows left `running` by a previous daemon process either really are
//! running (their port is still bound, so the PID gets re-resolved) or get
//! corrected to `stopped`.

use crate::storage::SqliteCatalog;
use rigel_core::Supervisor;
use std::sync::Arc;
use tracing::{info, warn};

/// The assembled daemon: catalog plus supervisor
#[derive(Debug, Clone)]
pub struct Daemon {
    catalog: Arc<SqliteCatalog>,
    supervisor: Supervisor,
}

impl Daemon {
    /// Wire a supervisor over the given catalog
    pub fn new(catalog: Arc<SqliteCatalog>) -> Self {
        let supervisor = Supervisor::new(catalog.clone());
        Self {
            catalog,
            supervisor,
        }
    }

    /// Access the supervisor control surface
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Access the catalog for definition maintenance
    pub fn catalog(&self) -> &Arc<SqliteCatalog> {
        &self.catalog
    }

    /// Reconcile every catalog row against the OS; returns the number of
    /// rows visited.
    ///
    /// # Errors
    /// Fails only when the catalog itself cannot be listed; per-row
    /// reconciliation problems are logged and skipped.
    pub async fn reconcile(&self) -> anyhow::Result<usize> {
        use rigel_core::CatalogRepository;

        let defs = self.catalog.list().await?;
        let total = defs.len();
        for def in defs {
            match self.supervisor.status(&def.id).await {
                Ok(reconciled) => {
                    if reconciled.status != def.status {
                        info!(
                            "Reconciled service '{}': {} -> {}",
                            def.id, def.status, reconciled.status
                        );
                    }
                }
                Err(e) => warn!("Failed to reconcile service '{}': {}", def.id, e),
            }
        }
        Ok(total)
    }

    /// Stop every tracked service; used on daemon shutdown
    pub async fn shutdown(&self) {
        for def in self.supervisor.running().await {
            info!("Stopping service '{}' for shutdown", def.id);
            if let Err(e) = self.supervisor.stop(&def.id).await {
                warn!("Failed to stop service '{}': {}", def.id, e);
            }
        }
        info!("Daemon shutdown complete");
    }
}
