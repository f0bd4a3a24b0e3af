//! Listening daemon
//!
//! # State machine
//!
//! ```text
//!            ┌──────── tick: expire stale ────────┐
//!            v                                    │
//!       Listening ── connection ──> Dispatching ──┤
//!            │                        │  MaxStartups drop / access deny
//!            │                        └──────────> closed
//!            │ no worker slots / MaxStartups delay
//!            v
//!    ThrottledDraining ── pause ──> Listening
//! ```
//!
//! Admitted connections become workers tracked by a `TaskTracker`. On
//! shutdown the listeners are dropped first, then every worker is waited
//! for; the login grace tick keeps running meanwhile so unauthenticated
//! stragglers cannot hold shutdown forever.

mod accept;
mod error;
mod handler;
pub mod inetd;
mod registry;
mod stats;
mod throttle;
mod worker;

pub use accept::{is_transient, AcceptLoop, AcceptSettings, LoopState};
pub use error::{DaemonError, Result};
pub use handler::{AuthProgress, Connection, ConnectionHandler, UnwiredTransport};
pub use registry::UnauthRegistry;
pub use stats::{DaemonStats, StatsSnapshot, WorkerSlot};
pub use throttle::{Admission, StartupsLimit, Throttle};
pub use worker::{peer_display, SessionContext};
