//! Platform capability table
//!
//! Which optional subsystems this host supports is decided once at
//! startup and then consulted at run time by the guard, the access
//! filter and the environment builder. Configuration may force any flag
//! on or off, which is also how tests exercise every combination.

use std::ffi::OsString;
use tracing::{debug, info};

use crate::config::CapabilitiesConfig;

/// Optional subsystems available to this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Process can be excluded from out-of-memory kills
    pub memory_protection: bool,

    /// Name resolution can be initialised eagerly
    pub resolver_init: bool,

    /// Security mechanism plugins should be enumerated at startup
    pub security_mechanisms: bool,

    /// Host-based access control is enforced in the accept path
    pub access_control: bool,

    /// Login-class policy is applied when building session environments
    pub login_class: bool,
}

impl Capabilities {
    /// Capabilities of the compile target
    pub fn detect() -> Self {
        Self {
            memory_protection: cfg!(any(target_os = "linux", target_os = "freebsd")),
            resolver_init: cfg!(unix),
            security_mechanisms: cfg!(unix),
            access_control: true,
            login_class: cfg!(any(
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly",
                target_os = "linux"
            )),
        }
    }

    /// Detected capabilities with configuration overrides applied
    pub fn resolve(overrides: &CapabilitiesConfig) -> Self {
        let detected = Self::detect();
        let resolved = Self {
            memory_protection: overrides
                .memory_protection
                .unwrap_or(detected.memory_protection),
            resolver_init: overrides.resolver_init.unwrap_or(detected.resolver_init),
            security_mechanisms: overrides
                .security_mechanisms
                .unwrap_or(detected.security_mechanisms),
            access_control: overrides.access_control.unwrap_or(detected.access_control),
            login_class: overrides.login_class.unwrap_or(detected.login_class),
        };

        if resolved != detected {
            debug!("Capabilities overridden by configuration: {:?}", resolved);
        }

        resolved
    }

    /// Every capability disabled
    pub fn none() -> Self {
        Self {
            memory_protection: false,
            resolver_init: false,
            security_mechanisms: false,
            access_control: false,
            login_class: false,
        }
    }

    /// Every capability enabled
    pub fn all() -> Self {
        Self {
            memory_protection: true,
            resolver_init: true,
            security_mechanisms: true,
            access_control: true,
            login_class: true,
        }
    }

    /// Log the resolved table
    pub fn log(&self) {
        info!("=== Capabilities ===");
        info!("  Memory protection:   {}", self.memory_protection);
        info!("  Resolver init:       {}", self.resolver_init);
        info!("  Security mechanisms: {}", self.security_mechanisms);
        info!("  Access control:      {}", self.access_control);
        info!("  Login class:         {}", self.login_class);
    }
}

/// The part of the daemon's own environment that sessions may inherit.
///
/// Captured once; nothing else in the crate reads the process environment
/// on behalf of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientEnv {
    tz: Option<String>,
}

impl AmbientEnv {
    /// Read TZ from the current process environment
    pub fn capture() -> Self {
        Self::from_tz(std::env::var_os("TZ"))
    }

    /// Build from an explicit TZ value
    pub fn from_tz(tz: Option<OsString>) -> Self {
        // Non UTF-8 values are dropped rather than mangled
        let tz = tz.and_then(|v| v.into_string().ok()).filter(|v| !v.is_empty());
        Self { tz }
    }

    /// The daemon's TZ, if set
    pub fn tz(&self) -> Option<&str> {
        self.tz.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win() {
        let overrides = CapabilitiesConfig {
            memory_protection: Some(false),
            login_class: Some(true),
            access_control: Some(false),
            ..Default::default()
        };

        let caps = Capabilities::resolve(&overrides);
        assert!(!caps.memory_protection);
        assert!(caps.login_class);
        assert!(!caps.access_control);
        assert_eq!(caps.resolver_init, Capabilities::detect().resolver_init);
    }

    #[test]
    fn test_no_overrides_is_detect() {
        assert_eq!(
            Capabilities::resolve(&CapabilitiesConfig::default()),
            Capabilities::detect()
        );
    }

    #[test]
    fn test_ambient_env_tz() {
        let env = AmbientEnv::from_tz(Some(OsString::from("UTC")));
        assert_eq!(env.tz(), Some("UTC"));

        let env = AmbientEnv::from_tz(Some(OsString::new()));
        assert_eq!(env.tz(), None);

        assert_eq!(AmbientEnv::from_tz(None).tz(), None);
    }
}
