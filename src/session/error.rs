//! Session error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Session setup and launch failures. Fatal to the worker only.
#[derive(Error, Debug)]
pub enum SessionError {
    /// User database lookup failed
    #[error("User lookup failed for {name}: {reason}")]
    UserLookup { name: String, reason: String },

    /// Identity is unusable (empty name, relative home or shell)
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Login class database could not be read or parsed
    #[error("Login class database {path:?}: {reason}")]
    LoginClassDatabase { path: PathBuf, reason: String },

    /// Login class policy evaluation failed
    #[error("Login class {class}: {reason}")]
    LoginClass { class: String, reason: String },

    /// Group memberships could not be resolved for the uid switch
    #[error("Credentials for {name}: {reason}")]
    Credentials { name: String, reason: String },

    /// The shell could not be executed
    #[error("Failed to execute {shell:?}: {source}")]
    Exec {
        shell: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the session process failed
    #[error("Failed to wait for session process: {0}")]
    Wait(#[source] std::io::Error),
}
