//! Session environment and launch
//!
//! Once a connection is authenticated the worker turns the
//! [`AuthenticatedSession`] into a running shell:
//!
//! ```text
//! UserIdentity + Session ──> EnvironmentBuilder ──> EnvironmentSet
//!                                  │                      │
//!                          LoginClassPolicy               v
//!                      (inline classes, login.conf)  SessionLauncher ──> shell
//! ```
//!
//! The builder never reads the process environment; the only daemon-side
//! value it accepts is the TZ captured in [`crate::platform::AmbientEnv`].

pub mod builder;
pub mod env;
mod error;
pub mod identity;
pub mod launcher;
pub mod login_class;
pub mod login_conf;

pub use builder::{glob_match, EnvironmentBuilder, RESERVED_NAMES};
pub use env::{is_valid_name, EnvironmentSet};
pub use error::{Result, SessionError};
pub use identity::{AuthenticatedSession, Session, UserIdentity, DEFAULT_SHELL};
pub use launcher::{Credentials, SessionLauncher};
pub use login_class::{ClassTable, LoginClass, LoginClassPolicy};
pub use login_conf::LoginConf;
