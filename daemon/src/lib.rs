//! Rigel daemon library
//!
//! Hosts the SQLite catalog implementation and the bootstrap wiring that
//! assembles a supervisor over it.

pub mod bootstrap;
pub mod storage;

pub use bootstrap::Daemon;
pub use storage::SqliteCatalog;

/// Daemon-level result type
pub type Result<T> = anyhow::Result<T>;
