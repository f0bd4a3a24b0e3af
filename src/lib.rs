//! # lamco-login-frontend
//!
//! Privileged front end of a remote-login daemon: accepts connections,
//! applies host-based access control, sheds load while too many peers are
//! unauthenticated, hands admitted connections to isolated workers and,
//! once a user is authenticated, builds the session environment and
//! starts the user's shell.
//!
//! # Architecture
//!
//! ```text
//! ResourceGuard (once, at startup)
//!         │
//!         v
//! AcceptLoop ──> AccessControlFilter ──> worker task
//!                                          │ ConnectionHandler (transport + auth)
//!                                          v
//!                              EnvironmentBuilder ──> SessionLauncher
//! ```
//!
//! Transport cryptography, authentication methods and channel
//! multiplexing live behind [`daemon::ConnectionHandler`].

#![warn(clippy::all)]

/// Daemon configuration
pub mod config;

/// Capability table and the ambient TZ passthrough
pub mod platform;

/// One-shot startup protections
pub mod guard;

/// Host-based access control
pub mod access;

/// Accept loop, throttling and workers
pub mod daemon;

/// Session environment and launch
pub mod session;

/// Utility functions
pub mod utils;
