//! Startup guard error types

use thiserror::Error;

/// Result type for guard steps
pub type Result<T> = std::result::Result<T, GuardError>;

/// Failure of a single guard step. Never fatal to startup.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Process could not be exempted from OOM decisions
    #[error("memory protection failed: {0}")]
    Memory(#[source] std::io::Error),

    /// Name resolution could not be initialised
    #[error("resolver initialisation failed: {0}")]
    Resolver(String),

    /// Security mechanism configuration could not be loaded
    #[error("security mechanism enumeration failed: {0}")]
    Mechanisms(String),

    /// Step has no implementation for this target
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}
