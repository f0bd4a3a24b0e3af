//! Login class policy
//!
//! A login class bundles per-user-group environment settings. Policies are
//! always evaluated against an empty scratch environment and the result is
//! merged by the caller, so nothing the daemon itself inherited can leak
//! through policy evaluation.

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use super::env::EnvironmentSet;
use super::error::Result;
use super::identity::UserIdentity;
use super::login_conf::LoginConf;
use crate::config::LoginClassConfig;

/// Evaluates login-class settings for one user
#[cfg_attr(test, mockall::automock)]
pub trait LoginClassPolicy: Send + Sync {
    /// Write the class's variables into `scratch`, which starts empty
    fn apply(&self, identity: &UserIdentity, scratch: &mut EnvironmentSet) -> Result<()>;
}

/// One resolved class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginClass {
    pub name: String,

    /// Variables in declaration order; values still carry `$` and `~`
    pub setenv: Vec<(String, String)>,

    /// Search path directories; `None` leaves PATH alone
    pub path: Option<Vec<String>>,
}

impl LoginClass {
    /// Expand and write this class into `env`
    pub fn apply_to(&self, identity: &UserIdentity, env: &mut EnvironmentSet) {
        for (name, value) in &self.setenv {
            env.set(name.clone(), expand_value(value, identity));
        }

        if let Some(dirs) = &self.path {
            let path = dirs
                .iter()
                .map(|d| expand_home(d, identity))
                .collect::<Vec<_>>()
                .join(":");
            env.set("PATH", path);
        }
    }
}

/// Class lookup table built from the capability database and inline config
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: HashMap<String, LoginClass>,
    default_class: String,
}

impl ClassTable {
    pub fn new(default_class: impl Into<String>) -> Self {
        Self {
            classes: HashMap::new(),
            default_class: default_class.into(),
        }
    }

    /// Build from configuration; inline classes replace database entries
    pub fn from_config(config: &LoginClassConfig) -> Result<Self> {
        let mut table = Self::new(config.default_class.clone());

        if let Some(path) = &config.login_conf {
            table.load_database(path)?;
        }

        for (name, class) in &config.classes {
            table.insert(LoginClass {
                name: name.clone(),
                setenv: class
                    .setenv
                    .iter()
                    .map(|v| (v.name.clone(), v.value.clone()))
                    .collect(),
                path: class
                    .path
                    .as_ref()
                    .map(|p| p.split_whitespace().map(str::to_string).collect()),
            });
        }

        debug!("{} login classes loaded", table.len());
        Ok(table)
    }

    /// Add every class of a login.conf style database
    pub fn load_database(&mut self, path: &Path) -> Result<()> {
        let conf = LoginConf::load(path)?;
        let names: Vec<String> = conf.names().map(str::to_string).collect();
        for name in names {
            if let Some(class) = conf.class(&name) {
                self.insert(class);
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, class: LoginClass) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn get(&self, name: &str) -> Option<&LoginClass> {
        self.classes.get(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class for `identity`: its own if known, else the default class
    pub fn resolve(&self, identity: &UserIdentity) -> Option<&LoginClass> {
        let requested = identity.class.as_deref().unwrap_or(&self.default_class);

        match self.classes.get(requested) {
            Some(class) => Some(class),
            None => {
                if requested != self.default_class {
                    warn!(
                        "Unknown login class {} for {}, using {}",
                        requested, identity.name, self.default_class
                    );
                }
                self.classes.get(&self.default_class)
            }
        }
    }
}

impl LoginClassPolicy for ClassTable {
    fn apply(&self, identity: &UserIdentity, scratch: &mut EnvironmentSet) -> Result<()> {
        if let Some(class) = self.resolve(identity) {
            debug!("Applying login class {} for {}", class.name, identity.name);
            class.apply_to(identity, scratch);
        }
        Ok(())
    }
}

/// `$` → user name, `~` → home directory, `\x` → literal `x`
fn expand_value(value: &str, identity: &UserIdentity) -> String {
    let home = identity.home.to_string_lossy();
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '$' => out.push_str(&identity.name),
            '~' => out.push_str(&home),
            other => out.push(other),
        }
    }
    out
}

/// Leading `~` of a path entry → home directory
fn expand_home(dir: &str, identity: &UserIdentity) -> String {
    match dir.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{}", identity.home.display(), rest)
        }
        _ => dir.to_string(),
    }
}
