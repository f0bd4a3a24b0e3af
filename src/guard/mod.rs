//! One-shot startup protections
//!
//! Runs once, before the accept loop and before anything restricts the
//! process view of the filesystem:
//!
//! 1. Exempt the standalone listener from out-of-memory kills. Children
//!    launched per connection by an inetd-style supervisor are not
//!    protected; only the long-lived listener is worth it.
//! 2. Initialise name resolution while its configuration files are
//!    reachable.
//! 3. Enumerate security mechanism plugins and map their libraries for
//!    the same reason.
//!
//! Every step is best effort. Failures are logged at debug level and
//! recorded in the [`GuardReport`]; none stops startup.

mod error;
pub mod mechanisms;
pub mod memory;
pub mod resolver;

pub use error::{GuardError, Result};
pub use mechanisms::{Mechanism, MechanismSet};

use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::platform::Capabilities;

/// Platform operations performed by the guard
#[cfg_attr(test, mockall::automock)]
pub trait PlatformHooks: Send + Sync {
    /// Exclude this process from out-of-memory reclaim decisions
    fn protect_memory(&self) -> Result<()>;

    /// Force the resolver to read its configuration now
    fn init_resolver(&self) -> Result<()>;

    /// Enumerate security mechanism plugins and map their libraries
    fn load_security_mechanisms(&self) -> Result<MechanismSet>;
}

/// Hooks backed by the running system
#[derive(Debug, Clone)]
pub struct SystemHooks {
    mech_file: PathBuf,
}

impl SystemHooks {
    pub fn new(mech_file: PathBuf) -> Self {
        Self { mech_file }
    }
}

impl PlatformHooks for SystemHooks {
    fn protect_memory(&self) -> Result<()> {
        memory::protect_current_process()
    }

    fn init_resolver(&self) -> Result<()> {
        resolver::init_resolver()
    }

    fn load_security_mechanisms(&self) -> Result<MechanismSet> {
        mechanisms::load_mechanisms(&self.mech_file)
    }
}

/// Guard steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStep {
    MemoryProtection,
    ResolverInit,
    SecurityMechanisms,
}

impl fmt::Display for GuardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryProtection => write!(f, "memory protection"),
            Self::ResolverInit => write!(f, "resolver init"),
            Self::SecurityMechanisms => write!(f, "security mechanisms"),
        }
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Skipped(&'static str),
    Failed(String),
}

/// Outcome of [`ResourceGuard::initialize`]
#[derive(Debug, Clone, Default)]
pub struct GuardReport {
    pub steps: Vec<(GuardStep, StepStatus)>,
    pub mechanisms: MechanismSet,
}

impl GuardReport {
    /// Status of a given step, if it was considered
    pub fn status(&self, step: GuardStep) -> Option<&StepStatus> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, st)| st)
    }

    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, st)| matches!(st, StepStatus::Failed(_)))
            .count()
    }
}

/// Startup resource guard
pub struct ResourceGuard {
    capabilities: Capabilities,
    hooks: Box<dyn PlatformHooks>,
}

impl ResourceGuard {
    pub fn new(capabilities: Capabilities, hooks: Box<dyn PlatformHooks>) -> Self {
        Self {
            capabilities,
            hooks,
        }
    }

    /// Guard backed by the real system
    pub fn system(capabilities: Capabilities, mech_file: PathBuf) -> Self {
        Self::new(capabilities, Box::new(SystemHooks::new(mech_file)))
    }

    /// Run every applicable step; never fails
    pub fn initialize(&self, standalone: bool) -> GuardReport {
        let mut report = GuardReport::default();

        let memory = if !standalone {
            StepStatus::Skipped("not a standalone daemon")
        } else if !self.capabilities.memory_protection {
            StepStatus::Skipped("capability disabled")
        } else {
            Self::record(GuardStep::MemoryProtection, self.hooks.protect_memory())
        };
        report.steps.push((GuardStep::MemoryProtection, memory));

        let resolver = if self.capabilities.resolver_init {
            Self::record(GuardStep::ResolverInit, self.hooks.init_resolver())
        } else {
            StepStatus::Skipped("capability disabled")
        };
        report.steps.push((GuardStep::ResolverInit, resolver));

        let mechs = if self.capabilities.security_mechanisms {
            match self.hooks.load_security_mechanisms() {
                Ok(found) => {
                    debug!(
                        "{} security mechanisms enumerated, {} plugins mapped",
                        found.len(),
                        found.loaded()
                    );
                    report.mechanisms = found;
                    StepStatus::Done
                }
                Err(e) => Self::record(GuardStep::SecurityMechanisms, Err(e)),
            }
        } else {
            StepStatus::Skipped("capability disabled")
        };
        report.steps.push((GuardStep::SecurityMechanisms, mechs));

        report
    }

    fn record(step: GuardStep, result: Result<()>) -> StepStatus {
        match result {
            Ok(()) => {
                debug!("{}: ok", step);
                StepStatus::Done
            }
            Err(e) => {
                debug!("{}: {}", step, e);
                StepStatus::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_resolver() -> MockPlatformHooks {
        let mut hooks = MockPlatformHooks::new();
        hooks.expect_protect_memory().returning(|| Ok(()));
        hooks
            .expect_init_resolver()
            .returning(|| Err(GuardError::Resolver("simulated".to_string())));
        hooks.expect_load_security_mechanisms().returning(|| Ok(MechanismSet::default()));
        hooks
    }

    #[test]
    fn test_resolver_failure_is_not_fatal() {
        let guard = ResourceGuard::new(Capabilities::all(), Box::new(failing_resolver()));
        let report = guard.initialize(true);

        assert_eq!(report.failures(), 1);
        assert_eq!(report.status(GuardStep::MemoryProtection), Some(&StepStatus::Done));
        assert!(matches!(
            report.status(GuardStep::ResolverInit),
            Some(StepStatus::Failed(msg)) if msg.contains("simulated")
        ));
        assert_eq!(report.status(GuardStep::SecurityMechanisms), Some(&StepStatus::Done));
    }

    #[test]
    fn test_inetd_mode_skips_memory_protection() {
        let mut hooks = MockPlatformHooks::new();
        hooks.expect_protect_memory().never();
        hooks.expect_init_resolver().times(1).returning(|| Ok(()));
        hooks.expect_load_security_mechanisms().returning(|| Ok(MechanismSet::default()));

        let guard = ResourceGuard::new(Capabilities::all(), Box::new(hooks));
        let report = guard.initialize(false);

        assert_eq!(
            report.status(GuardStep::MemoryProtection),
            Some(&StepStatus::Skipped("not a standalone daemon"))
        );
    }

    #[test]
    fn test_capabilities_gate_steps() {
        let mut hooks = MockPlatformHooks::new();
        hooks.expect_protect_memory().never();
        hooks.expect_init_resolver().never();
        hooks.expect_load_security_mechanisms().never();

        let guard = ResourceGuard::new(Capabilities::none(), Box::new(hooks));
        let report = guard.initialize(true);
        assert_eq!(report.failures(), 0);
        assert_eq!(report.steps.len(), 3);
    }

    #[test]
    fn test_mechanisms_are_kept() {
        let mut hooks = MockPlatformHooks::new();
        hooks.expect_protect_memory().returning(|| Ok(()));
        hooks.expect_init_resolver().returning(|| Ok(()));
        hooks.expect_load_security_mechanisms().returning(|| {
            Ok(MechanismSet::new(vec![Mechanism {
                name: "krb5".to_string(),
                oid: "1.2.840.113554.1.2.2".to_string(),
                library: PathBuf::from("libgssapi_krb5.so.2"),
                options: Vec::new(),
            }]))
        });

        let guard = ResourceGuard::new(Capabilities::all(), Box::new(hooks));
        let report = guard.initialize(true);
        assert_eq!(report.mechanisms.len(), 1);
    }
}
