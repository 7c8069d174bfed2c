//! Core functionality for the Rigel supervisor
//!
//! This crate contains the service supervisor: authoritative in-memory
//! tracking of running child processes, spawning and termination with
//! correct environment, OS-level liveness probing, buffered and streaming
//! log capture, and reconciliation against the persistent catalog.

pub mod env;
pub mod error;
pub mod logging;
#[cfg(unix)]
pub mod ports;
#[cfg(unix)]
pub mod probe;
#[cfg(unix)]
pub mod process;
pub mod repository;
#[cfg(unix)]
pub mod supervisor;

pub use error::{CoreError, Result};
pub use repository::CatalogRepository;
#[cfg(unix)]
pub use supervisor::Supervisor;
