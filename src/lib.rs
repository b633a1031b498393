//! PortUP - forward local ports through a UPnP gateway
//!
//! This library provides the core of PortUP: parsing mapping specifications,
//! discovering an Internet Gateway Device, applying port mappings against it
//! and removing them again when the process is told to shut down.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod display;
pub mod gateway;
pub mod lifecycle;
pub mod mapping;
pub mod network;
pub mod shutdown;
pub mod update;

#[cfg(test)]
mod tests;

pub use gateway::GatewayError;
pub use mapping::ParseError;

use tracing_subscriber::EnvFilter;

/// Tag embedded in every mapping description created by PortUP.
///
/// Cleanup scans recognise tool-owned mappings by this substring alone.
pub const TOOL_TAG: &str = "PortUP";

/// Version reported in logs and compared against the release feed
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for PortUP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PortUP operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A mapping token could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Gateway discovery or control error
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(String),

    /// Release feed returned something unusable
    #[error("Update check error: {0}")]
    Update(String),

    /// Operation not valid in the manager's current state
    #[error("Invalid state: {0}")]
    State(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Initialize logging to stderr
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects `debug` over `info`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("portup={default_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
