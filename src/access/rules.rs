//! Ordered access rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use tracing::{info, warn};

use super::error::Result;
use super::hosts;
use super::pattern::PatternList;
use crate::config::AccessConfig;

/// What a matching rule does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// One rule of the policy table
#[derive(Debug, Clone)]
pub struct AccessRule {
    pub clients: PatternList,
    pub action: RuleAction,
    /// Where the rule came from, for log messages
    pub origin: String,
}

impl AccessRule {
    pub fn new(clients: PatternList, action: RuleAction, origin: impl Into<String>) -> Self {
        Self {
            clients,
            action,
            origin: origin.into(),
        }
    }

    /// Convenience constructor from pattern text
    pub fn parse(pattern: &str, action: RuleAction) -> Result<Self> {
        Ok(Self::new(PatternList::parse(pattern)?, action, pattern))
    }
}

/// Admission outcome for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub action: RuleAction,
    pub reason: String,
}

impl AccessDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Deny,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.action == RuleAction::Allow
    }
}

/// Read-only rule table shared by the accept loop
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
    default_action: RuleAction,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new(Vec::new(), RuleAction::Allow)
    }
}

impl AccessPolicy {
    pub fn new(rules: Vec<AccessRule>, default_action: RuleAction) -> Self {
        for rule in &rules {
            for pattern in rule.clients.unresolvable() {
                warn!(
                    "{}: pattern {} needs host name resolution and will never match",
                    rule.origin, pattern
                );
            }
        }

        Self {
            rules,
            default_action,
        }
    }

    /// Build the table: inline rules, then allow-file rules, then deny-file rules
    pub fn from_config(config: &AccessConfig) -> Result<Self> {
        let mut rules = Vec::new();

        for (idx, rule) in config.rules.iter().enumerate() {
            rules.push(AccessRule::new(
                PatternList::parse(&rule.pattern)?,
                rule.action,
                format!("rule #{}", idx + 1),
            ));
        }

        if let Some(path) = &config.allow_file {
            rules.extend(hosts::load_rules_file(path, &config.daemon_name, RuleAction::Allow)?);
        }

        if let Some(path) = &config.deny_file {
            rules.extend(hosts::load_rules_file(path, &config.daemon_name, RuleAction::Deny)?);
        }

        info!(
            "Access policy loaded: {} rules, default {}",
            rules.len(),
            config.default_policy
        );

        Ok(Self::new(rules, config.default_policy))
    }

    /// First matching rule wins; otherwise the default action applies
    pub fn evaluate(&self, peer: IpAddr) -> AccessDecision {
        match self.rules.iter().find(|r| r.clients.matches(peer)) {
            Some(rule) => AccessDecision {
                action: rule.action,
                reason: format!("matched {} ({})", rule.origin, rule.clients),
            },
            None => AccessDecision {
                action: self.default_action,
                reason: "no matching rule".to_string(),
            },
        }
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    pub fn default_action(&self) -> RuleAction {
        self.default_action
    }
}
