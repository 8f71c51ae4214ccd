//! Shared configuration types and constants for anonrelay.
//!
//! The persisted configuration schema lives here so that both the core
//! library and the daemon agree on the on-disk format.

pub mod config;
pub mod error;

pub use config::{protocol, LocalTarget, RelayConfig, RoutingConfig};
pub use error::{ConfigError, Result};
