//! Session environment construction
//!
//! The construction order matters, later steps overwrite earlier ones:
//!
//! 1. `USER`, `LOGNAME`, `HOME`, `MAIL` (and `LOGIN` with login classes)
//! 2. `TZ` from the daemon, the only ambient variable allowed through
//! 3. default `PATH` and a `TERM` placeholder
//! 4. login-class policy, evaluated into an empty scratch set and merged
//! 5. `SHELL`
//! 6. `TERM` from the session
//! 7. `DISPLAY` from the session
//! 8. client-supplied variables accepted by `accept_env`
//!
//! Step 4 is skipped when the login-class capability is off or no policy
//! is available; everything else is unconditional.

use tracing::debug;

use super::env::EnvironmentSet;
use super::error::Result;
use super::identity::{Session, UserIdentity};
use super::login_class::LoginClassPolicy;
use crate::config::EnvironmentConfig;
use crate::platform::Capabilities;

/// Names a client can never set, whatever `accept_env` says
pub const RESERVED_NAMES: &[&str] = &[
    "HOME", "USER", "LOGNAME", "LOGIN", "MAIL", "SHELL", "PATH", "TZ",
];

/// Builds the environment a session runs in
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    config: EnvironmentConfig,
    login_class: bool,
}

impl EnvironmentBuilder {
    pub fn new(config: EnvironmentConfig, capabilities: &Capabilities) -> Self {
        Self {
            config,
            login_class: capabilities.login_class,
        }
    }

    /// Compute the environment for `identity` and `session`.
    ///
    /// Pure apart from policy evaluation: identical inputs always give an
    /// identical result, and the process environment is never consulted.
    pub fn build(
        &self,
        identity: &UserIdentity,
        policy: Option<&dyn LoginClassPolicy>,
        session: &Session,
        ambient_tz: Option<&str>,
    ) -> Result<EnvironmentSet> {
        let mut env = EnvironmentSet::new();

        // 1
        env.set("USER", identity.name.as_str());
        env.set("LOGNAME", identity.name.as_str());
        if self.login_class {
            env.set("LOGIN", identity.name.as_str());
        }
        env.set("HOME", identity.home.to_string_lossy());
        env.set("MAIL", self.mail_path(&identity.name));

        // 2
        if self.config.pass_tz {
            if let Some(tz) = ambient_tz {
                env.set("TZ", tz);
            }
        }

        // 3
        env.set("PATH", self.config.default_path.as_str());
        env.set("TERM", self.config.default_term.as_str());

        // 4
        match policy {
            Some(policy) if self.login_class => {
                let mut scratch = EnvironmentSet::new();
                policy.apply(identity, &mut scratch)?;
                debug!(
                    "Login class set {} variables for {}",
                    scratch.len(),
                    identity.name
                );
                env.merge(scratch);
            }
            _ => debug!("Login class policy not applied for {}", identity.name),
        }

        // 5
        env.set("SHELL", identity.effective_shell().to_string_lossy());

        // 6
        if let Some(term) = &session.term {
            env.set("TERM", term.as_str());
        }

        // 7
        if let Some(display) = &session.display {
            env.set("DISPLAY", display.as_str());
        }

        // 8
        for (name, value) in &session.client_env {
            if self.accepts(name, value) {
                env.set(name.as_str(), value.as_str());
            } else {
                debug!("Ignoring client variable {}", name);
            }
        }

        Ok(env)
    }

    fn mail_path(&self, name: &str) -> String {
        format!("{}/{}", self.config.mail_dir.trim_end_matches('/'), name)
    }

    /// Whether a client-supplied variable may enter the session
    pub fn accepts(&self, name: &str, value: &str) -> bool {
        if name.is_empty() || name.contains(['=', '\0']) || value.contains('\0') {
            return false;
        }
        if RESERVED_NAMES.contains(&name) {
            return false;
        }
        self.config
            .accept_env
            .iter()
            .any(|pattern| glob_match(pattern, name))
    }
}

/// Shell style match supporting `*` and `?`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
