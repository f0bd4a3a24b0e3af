//! Authenticated identity and per-session facts

use std::path::{Path, PathBuf};

use super::error::{Result, SessionError};

/// An authenticated user, as supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Login name
    pub name: String,

    /// Home directory
    pub home: PathBuf,

    /// Login shell
    pub shell: PathBuf,

    /// User ID (UID)
    pub uid: u32,

    /// Group ID (GID)
    pub gid: u32,

    /// Login class, where the user database has one
    pub class: Option<String>,
}

impl UserIdentity {
    /// Get user information from system
    pub fn from_username(name: &str) -> Result<Self> {
        use nix::unistd::User;

        let user = User::from_name(name)
            .map_err(|e| SessionError::UserLookup {
                name: name.to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| SessionError::UserLookup {
                name: name.to_string(),
                reason: "no such user".to_string(),
            })?;

        #[cfg(any(
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "macos"
        ))]
        let class = user
            .class
            .to_str()
            .ok()
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        #[cfg(not(any(
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "macos"
        )))]
        let class = None;

        let identity = Self {
            name: user.name,
            home: user.dir,
            shell: user.shell,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            class,
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Reject identities the environment builder cannot use
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '=', '\0']) {
            return Err(SessionError::InvalidIdentity(format!(
                "bad user name {:?}",
                self.name
            )));
        }
        if !self.home.is_absolute() {
            return Err(SessionError::InvalidIdentity(format!(
                "home {:?} is not absolute",
                self.home
            )));
        }
        Ok(())
    }

    /// Shell to run; an empty shell field means /bin/sh
    pub fn effective_shell(&self) -> &Path {
        if self.shell.as_os_str().is_empty() {
            Path::new(DEFAULT_SHELL)
        } else {
            &self.shell
        }
    }
}

/// Shell used when the user record has none
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Facts negotiated for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Terminal type requested by the client
    pub term: Option<String>,

    /// X11 display string for forwarded X sessions
    pub display: Option<String>,

    /// Client-supplied variables (locale and friends), filtered later
    pub client_env: Vec<(String, String)>,

    /// Command to run instead of an interactive shell
    pub command: Option<String>,

    /// Starting directory; the home directory when unset
    pub working_dir: Option<PathBuf>,
}

impl Session {
    pub fn interactive() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_client_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.client_env.push((name.into(), value.into()));
        self
    }
}

/// Output of the authentication layer for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub identity: UserIdentity,
    pub session: Session,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserIdentity {
        UserIdentity {
            name: "alice".to_string(),
            home: PathBuf::from("/home/alice"),
            shell: PathBuf::from("/bin/ksh"),
            uid: 1001,
            gid: 1001,
            class: None,
        }
    }

    #[test]
    fn test_validate() {
        assert!(alice().validate().is_ok());

        let mut bad = alice();
        bad.name = "a=b".to_string();
        assert!(bad.validate().is_err());

        let mut bad = alice();
        bad.home = PathBuf::from("home/alice");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_effective_shell() {
        let mut user = alice();
        assert_eq!(user.effective_shell(), Path::new("/bin/ksh"));
        user.shell = PathBuf::new();
        assert_eq!(user.effective_shell(), Path::new("/bin/sh"));
    }

    #[test]
    fn test_root_lookup() {
        // root exists on every unix test host
        let root = UserIdentity::from_username("root").unwrap();
        assert_eq!(root.uid, 0);
        assert!(UserIdentity::from_username("no-such-user-xyzzy").is_err());
    }

    #[test]
    fn test_session_builder() {
        let session = Session::interactive()
            .with_term("xterm")
            .with_display("localhost:10.0")
            .with_client_env("LANG", "C.UTF-8");
        assert_eq!(session.term.as_deref(), Some("xterm"));
        assert_eq!(session.display.as_deref(), Some("localhost:10.0"));
        assert_eq!(session.client_env.len(), 1);
        assert!(session.command.is_none());
    }
}
