//! Session process launch

use nix::unistd::{Gid, Uid};
use std::ffi::CString;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{debug, error, info, warn};

use super::env::EnvironmentSet;
use super::error::{Result, SessionError};
use super::identity::{Session, UserIdentity};
use crate::config::{LaunchMode, SessionConfig};

/// The ids a session process runs as, supplementary groups included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
    pub groups: Vec<Gid>,
}

impl Credentials {
    /// Look up the user's group memberships from the group database
    pub fn resolve(identity: &UserIdentity) -> Result<Self> {
        let name = CString::new(identity.name.as_str())
            .map_err(|_| SessionError::InvalidIdentity(format!("{:?}", identity.name)))?;
        let gid = Gid::from_raw(identity.gid);

        let groups = nix::unistd::getgrouplist(&name, gid).map_err(|e| {
            SessionError::Credentials {
                name: identity.name.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            uid: Uid::from_raw(identity.uid),
            gid,
            groups,
        })
    }

    /// Switch the child over between fork and exec.
    ///
    /// Groups go first, while the child still has the privilege to set them.
    #[allow(unsafe_code)]
    fn apply_to(self, cmd: &mut Command) {
        let Self { uid, gid, groups } = self;

        // SAFETY: the hook only makes raw id-setting syscalls on data
        // prepared before fork; it does not allocate or take locks.
        unsafe {
            cmd.pre_exec(move || {
                nix::unistd::setgroups(&groups).map_err(io::Error::from)?;
                nix::unistd::setgid(gid).map_err(io::Error::from)?;
                nix::unistd::setuid(uid).map_err(io::Error::from)?;
                Ok(())
            });
        }
    }
}

/// Starts the user's shell with a prepared environment
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    mode: LaunchMode,
    login_shell: bool,
    switch_user: bool,
}

impl SessionLauncher {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            mode: config.launch_mode,
            login_shell: config.login_shell,
            switch_user: nix::unistd::geteuid().is_root(),
        }
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    /// Do not change uid/gid even when running as root
    pub fn without_user_switch(mut self) -> Self {
        self.switch_user = false;
        self
    }

    /// Prepare the command without starting it
    pub fn command(
        &self,
        identity: &UserIdentity,
        session: &Session,
        env: &EnvironmentSet,
    ) -> Result<Command> {
        let shell = identity.effective_shell();
        let mut cmd = Command::new(shell);

        match &session.command {
            Some(command) => {
                cmd.arg("-c").arg(command);
            }
            None if self.login_shell => {
                cmd.arg0(format!("-{}", shell_name(shell)));
            }
            None => {}
        }

        cmd.env_clear();
        cmd.envs(env.as_os_pairs());
        cmd.current_dir(working_dir(identity, session));

        if self.switch_user {
            let credentials = Credentials::resolve(identity)?;
            debug!(
                "Session for {} runs as uid {} gid {} groups {:?}",
                identity.name, credentials.uid, credentials.gid, credentials.groups
            );
            credentials.apply_to(&mut cmd);
        }

        Ok(cmd)
    }

    /// Launch according to the configured mode.
    ///
    /// In exec mode this only returns on failure.
    pub async fn launch(
        &self,
        identity: &UserIdentity,
        session: &Session,
        env: &EnvironmentSet,
    ) -> Result<ExitStatus> {
        match self.mode {
            LaunchMode::Exec => Err(self.exec(identity, session, env)),
            LaunchMode::Spawn => self.spawn(identity, session, env).await,
        }
    }

    /// Replace the current process image; returns only the failure
    pub fn exec(
        &self,
        identity: &UserIdentity,
        session: &Session,
        env: &EnvironmentSet,
    ) -> SessionError {
        info!("Starting session for {} (exec)", identity.name);
        let mut cmd = match self.command(identity, session, env) {
            Ok(cmd) => cmd,
            Err(e) => return e,
        };
        let source = cmd.exec();
        let shell = identity.effective_shell().to_path_buf();
        error!("Failed to execute {:?} for {}: {}", shell, identity.name, source);
        SessionError::Exec { shell, source }
    }

    /// Start the shell as a child and wait for it
    pub async fn spawn(
        &self,
        identity: &UserIdentity,
        session: &Session,
        env: &EnvironmentSet,
    ) -> Result<ExitStatus> {
        let shell = identity.effective_shell().to_path_buf();
        let mut cmd = tokio::process::Command::from(self.command(identity, session, env)?);

        let mut child = cmd.spawn().map_err(|source| {
            error!("Failed to execute {:?} for {}: {}", shell, identity.name, source);
            SessionError::Exec {
                shell: shell.clone(),
                source,
            }
        })?;

        info!(
            "Session started for {} (pid {})",
            identity.name,
            child.id().unwrap_or_default()
        );

        let status = child.wait().await.map_err(|e| {
            error!("Failed to wait for session of {}: {}", identity.name, e);
            SessionError::Wait(e)
        })?;

        info!("Session for {} exited: {}", identity.name, status);
        Ok(status)
    }
}

fn shell_name(shell: &Path) -> String {
    shell
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| shell.to_string_lossy().into_owned())
}

fn working_dir(identity: &UserIdentity, session: &Session) -> PathBuf {
    let wanted = session.working_dir.as_deref().unwrap_or(&identity.home);
    if wanted.is_dir() {
        wanted.to_path_buf()
    } else {
        warn!(
            "Could not chdir to {:?} for {}, using /",
            wanted, identity.name
        );
        PathBuf::from("/")
    }
}
