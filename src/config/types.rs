//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::access::RuleAction;

/// Listener and admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Addresses to listen on (e.g., "0.0.0.0:22", "[::]:22")
    #[serde(default = "default_listen_addresses")]
    pub listen_addresses: Vec<String>,

    /// Unauthenticated connection limit, "start:rate:full" or a single number
    #[serde(default = "default_max_startups")]
    pub max_startups: String,

    /// What to do once `max_startups` is reached
    #[serde(default)]
    pub startups_policy: StartupsPolicy,

    /// Maximum number of concurrent workers (authenticated or not)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds a connection may stay unauthenticated (0 = no deadline)
    #[serde(default = "default_login_grace_time")]
    pub login_grace_time_secs: u64,

    /// Period of the housekeeping tick in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Pause while throttled, in milliseconds
    #[serde(default = "default_throttle_delay")]
    pub throttle_delay_ms: u64,

    /// Backoff after a transient accept() error, in milliseconds
    #[serde(default = "default_accept_backoff")]
    pub accept_backoff_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addresses: default_listen_addresses(),
            max_startups: default_max_startups(),
            startups_policy: StartupsPolicy::default(),
            max_connections: default_max_connections(),
            login_grace_time_secs: default_login_grace_time(),
            tick_interval_ms: default_tick_interval(),
            throttle_delay_ms: default_throttle_delay(),
            accept_backoff_ms: default_accept_backoff(),
        }
    }
}

fn default_listen_addresses() -> Vec<String> {
    vec!["0.0.0.0:22".to_string()]
}

fn default_max_startups() -> String {
    "10:30:100".to_string()
}

fn default_max_connections() -> usize {
    256
}

fn default_login_grace_time() -> u64 {
    120
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_throttle_delay() -> u64 {
    100
}

fn default_accept_backoff() -> u64 {
    50
}

/// Load shedding behaviour when too many connections are unauthenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupsPolicy {
    /// Accept and immediately drop (random early drop between start and full)
    #[default]
    Drop,
    /// Leave the connection in the backlog and retry after a short pause
    Delay,
}

/// Host-based access control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Decision when no rule matches
    #[serde(default = "default_policy")]
    pub default_policy: RuleAction,

    /// Inline rules, evaluated in order before any rule file
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// hosts.allow style file
    #[serde(default)]
    pub allow_file: Option<PathBuf>,

    /// hosts.deny style file
    #[serde(default)]
    pub deny_file: Option<PathBuf>,

    /// Daemon name matched against the daemon list of rule files
    #[serde(default = "default_daemon_name")]
    pub daemon_name: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy(),
            rules: Vec::new(),
            allow_file: None,
            deny_file: None,
            daemon_name: default_daemon_name(),
        }
    }
}

fn default_policy() -> RuleAction {
    RuleAction::Allow
}

fn default_daemon_name() -> String {
    "sshd".to_string()
}

/// A single inline access rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Client pattern list (e.g., "10.0.0.0/8 EXCEPT 10.0.13.0/24")
    pub pattern: String,

    /// Action taken on match
    pub action: RuleAction,
}

/// Session environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Mail spool directory; MAIL becomes `<mail_dir>/<user>`
    #[serde(default = "default_mail_dir")]
    pub mail_dir: String,

    /// Search path used until login-class policy says otherwise
    #[serde(default = "default_path")]
    pub default_path: String,

    /// TERM placeholder for sessions without a terminal name
    #[serde(default = "default_term")]
    pub default_term: String,

    /// Carry the daemon's TZ into sessions
    #[serde(default = "default_true")]
    pub pass_tz: bool,

    /// Glob patterns of client-supplied variables to accept
    #[serde(default)]
    pub accept_env: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mail_dir: default_mail_dir(),
            default_path: default_path(),
            default_term: default_term(),
            pass_tz: true,
            accept_env: Vec::new(),
        }
    }
}

fn default_mail_dir() -> String {
    "/var/mail".to_string()
}

fn default_path() -> String {
    "/usr/bin:/bin:/usr/sbin:/sbin".to_string()
}

fn default_term() -> String {
    "su".to_string()
}

fn default_true() -> bool {
    true
}

/// Login-class policy sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginClassConfig {
    /// login.conf style capability database
    #[serde(default)]
    pub login_conf: Option<PathBuf>,

    /// Class used when the user's class is unknown
    #[serde(default = "default_class")]
    pub default_class: String,

    /// Inline classes; take precedence over `login_conf` entries of the same name
    #[serde(default)]
    pub classes: std::collections::BTreeMap<String, ClassConfig>,
}

impl Default for LoginClassConfig {
    fn default() -> Self {
        Self {
            login_conf: None,
            default_class: default_class(),
            classes: Default::default(),
        }
    }
}

fn default_class() -> String {
    "default".to_string()
}

/// Inline login class definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Variables set for members of the class, in order
    #[serde(default)]
    pub setenv: Vec<EnvVar>,

    /// Search path directories, space separated, `~` expands to home
    #[serde(default)]
    pub path: Option<String>,
}

/// Environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Capability overrides; unset means "detect for this platform"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub memory_protection: Option<bool>,

    #[serde(default)]
    pub resolver_init: Option<bool>,

    #[serde(default)]
    pub security_mechanisms: Option<bool>,

    #[serde(default)]
    pub access_control: Option<bool>,

    #[serde(default)]
    pub login_class: Option<bool>,
}

/// Startup guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Security mechanism configuration file
    #[serde(default = "default_mech_file")]
    pub mech_file: PathBuf,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            mech_file: default_mech_file(),
        }
    }
}

fn default_mech_file() -> PathBuf {
    PathBuf::from("/etc/gss/mech")
}

/// Session launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How the user's shell is started
    #[serde(default)]
    pub launch_mode: LaunchMode,

    /// Prefix argv0 with '-' for interactive shells
    #[serde(default = "default_true")]
    pub login_shell: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            launch_mode: LaunchMode::default(),
            login_shell: true,
        }
    }
}

/// Session process start strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Start the shell as a child of the worker and wait for it
    #[default]
    Spawn,
    /// Replace the current process image
    Exec,
}
