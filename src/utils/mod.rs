//! Utility Functions and Diagnostics
//!
//! - [`diagnostics`]: host facts, capabilities and guard results at startup
//! - [`errors`]: operator-facing error messages with troubleshooting hints

pub mod diagnostics;
pub mod errors;

pub use diagnostics::{format_uptime, log_startup_diagnostics, SystemInfo};
pub use errors::format_user_error;
