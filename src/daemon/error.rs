//! Daemon error types

use std::net::SocketAddr;
use thiserror::Error;

use crate::session::SessionError;

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Accept loop and worker failures
#[derive(Error, Debug)]
pub enum DaemonError {
    /// A listen address could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A listening socket failed in a way accept() cannot recover from
    #[error("Listener on {addr} failed: {source}")]
    Listener {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The loop was started without any listening socket
    #[error("No listening sockets")]
    NoListeners,

    /// Bad `start:rate:full` value
    #[error("Invalid MaxStartups value {value:?}: {reason}")]
    InvalidStartups { value: String, reason: String },

    /// The transport/authentication collaborator gave up on a connection
    #[error("Connection handler failed: {0}")]
    Handler(String),

    /// Session setup failed after authentication
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
