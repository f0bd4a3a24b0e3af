//! Host-based access control
//!
//! Decides, inline in the accept path and before any byte is exchanged,
//! whether a peer may proceed. Decisions use only the literal peer
//! address. No reverse lookup is ever made here, since a slow resolver
//! would stall admission for every connection queued behind this one.
//!
//! # Evaluation
//!
//! ```text
//! inline rules ─┐
//! allow file  ──┼─> one ordered table ─> first match wins ─> default (allow)
//! deny file   ──┘
//! ```
//!
//! Loading allow-file rules ahead of deny-file rules gives the classic
//! hosts.allow / hosts.deny precedence without a second pass.
//!
//! # Refusals
//!
//! A denied socket gets a zero linger (RST on close, no TIME_WAIT) and a
//! warning of the fixed shape `refused connect from <addr> (<addr>)`,
//! which log scrapers such as sshguard already understand.

mod error;
mod hosts;
mod pattern;
mod rules;

pub use error::{AccessError, Result};
pub use hosts::{load_rules_file, parse_rules};
pub use pattern::{canonical, ClientPattern, PatternList};
pub use rules::{AccessDecision, AccessPolicy, AccessRule, RuleAction};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::AccessConfig;
use crate::platform::Capabilities;

/// Log line emitted for every refused connection
pub fn refusal_message(peer: IpAddr) -> String {
    let peer = canonical(peer);
    format!("refused connect from {} ({})", peer, peer)
}

/// Access filter applied to each accepted connection
#[derive(Debug, Clone)]
pub struct AccessControlFilter {
    policy: Arc<AccessPolicy>,
    enabled: bool,
}

impl AccessControlFilter {
    /// Create a filter over an existing policy
    pub fn new(policy: AccessPolicy, capabilities: &Capabilities) -> Self {
        if !capabilities.access_control {
            debug!("Host-based access control disabled");
        }

        Self {
            policy: Arc::new(policy),
            enabled: capabilities.access_control,
        }
    }

    /// Load rules from configuration
    pub fn from_config(config: &AccessConfig, capabilities: &Capabilities) -> Result<Self> {
        let policy = if capabilities.access_control {
            AccessPolicy::from_config(config)?
        } else {
            AccessPolicy::default()
        };

        Ok(Self::new(policy, capabilities))
    }

    /// Decide whether `peer` may proceed
    pub fn evaluate(&self, peer: IpAddr) -> AccessDecision {
        if !self.enabled {
            return AccessDecision::allow("access control disabled");
        }

        self.policy.evaluate(canonical(peer))
    }

    /// Apply the decision to a freshly accepted socket.
    ///
    /// Returns the stream untouched when allowed. A denied stream is
    /// closed abortively and logged; `None` is returned.
    pub fn admit(&self, stream: TcpStream, peer: SocketAddr) -> Option<TcpStream> {
        let decision = self.evaluate(peer.ip());
        if decision.is_allowed() {
            return Some(stream);
        }

        #[allow(deprecated)]
        let linger = stream.set_linger(Some(Duration::ZERO));
        if let Err(e) = linger {
            debug!("set_linger failed for {}: {}", peer, e);
        }
        drop(stream);

        warn!("{}", refusal_message(peer.ip()));
        debug!("Connection refused by access rules: {}", decision.reason);

        None
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_message_shape() {
        assert_eq!(
            refusal_message("192.0.2.10".parse().unwrap()),
            "refused connect from 192.0.2.10 (192.0.2.10)"
        );
        assert_eq!(
            refusal_message("::ffff:192.0.2.10".parse().unwrap()),
            "refused connect from 192.0.2.10 (192.0.2.10)"
        );
        assert_eq!(
            refusal_message("2001:db8::1".parse().unwrap()),
            "refused connect from 2001:db8::1 (2001:db8::1)"
        );
    }

    #[test]
    fn test_disabled_filter_allows_everything() {
        let policy = AccessPolicy::new(
            vec![AccessRule::parse("ALL", RuleAction::Deny).unwrap()],
            RuleAction::Deny,
        );
        let filter = AccessControlFilter::new(policy, &Capabilities::none());
        let decision = filter.evaluate("192.0.2.1".parse().unwrap());
        assert!(decision.is_allowed());
        assert_eq!(decision.reason, "access control disabled");
    }

    #[tokio::test]
    async fn test_admit_denied_closes() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(addr).await.unwrap();
            let mut buf = [0u8; 8];
            // EOF or reset, never data
            matches!(s.read(&mut buf).await, Ok(0) | Err(_))
        });

        let (stream, peer) = listener.accept().await.unwrap();
        let policy = AccessPolicy::new(
            vec![AccessRule::parse("127.0.0.1", RuleAction::Deny).unwrap()],
            RuleAction::Allow,
        );
        let filter = AccessControlFilter::new(policy, &Capabilities::all());
        assert!(filter.admit(stream, peer).is_none());
        assert!(client.await.unwrap());
    }
}
