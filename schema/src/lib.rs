//! Shared domain types for the Rigel service supervisor
//!
//! This crate defines the serializable types exchanged between the
//! supervisor core, the catalog repository, and external control surfaces.

pub mod ports;
pub mod service;

pub use ports::PortRecord;
pub use service::{
    EnvironmentTag, ServiceDefinition, ServiceStatus, ServiceType, StatusUpdate,
};
