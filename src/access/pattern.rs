//! Client patterns
//!
//! A tcp-wrappers compatible subset that can be decided from the literal
//! peer address alone. Host name patterns are accepted for compatibility
//! with existing rule files but never match: matching them would need a
//! reverse lookup in the accept path.

use std::fmt;
use std::net::IpAddr;

use super::error::{AccessError, Result};

/// A single client pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPattern {
    /// `ALL`
    All,
    /// `LOCAL`, host names without a dot
    Local,
    /// Literal address
    Addr(IpAddr),
    /// Leading part of a dotted IPv4 address, e.g. `192.168.`
    Prefix(String),
    /// `net/len` or `net/mask`
    Net { base: IpAddr, prefix_len: u8 },
    /// Host or domain name
    HostName(String),
}

impl ClientPattern {
    /// Parse a single pattern token
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "" => return Err(AccessError::EmptyPatternList),
            "ALL" => return Ok(Self::All),
            "LOCAL" => return Ok(Self::Local),
            "KNOWN" | "UNKNOWN" | "PARANOID" => {
                return Err(AccessError::invalid(
                    token,
                    "wildcard depends on host name resolution",
                ))
            }
            _ => {}
        }

        if let Some((net, mask)) = token.split_once('/') {
            return Self::parse_net(token, net, mask);
        }

        let bare = strip_brackets(token);
        if let Ok(addr) = bare.parse::<IpAddr>() {
            return Ok(Self::Addr(canonical(addr)));
        }

        if token.ends_with('.') && token.starts_with(|c: char| c.is_ascii_digit()) {
            let valid = token
                .trim_end_matches('.')
                .split('.')
                .all(|octet| octet.parse::<u8>().is_ok());
            if !valid {
                return Err(AccessError::invalid(token, "malformed address prefix"));
            }
            return Ok(Self::Prefix(token.to_string()));
        }

        if token.starts_with('[') {
            return Err(AccessError::invalid(token, "malformed IPv6 address"));
        }

        Ok(Self::HostName(token.to_ascii_lowercase()))
    }

    fn parse_net(token: &str, net: &str, mask: &str) -> Result<Self> {
        let base = strip_brackets(net)
            .parse::<IpAddr>()
            .map(canonical)
            .map_err(|_| AccessError::invalid(token, "malformed network address"))?;

        let max = match base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = if let Ok(len) = mask.parse::<u8>() {
            len
        } else {
            let IpAddr::V4(mask_addr) = mask
                .parse::<IpAddr>()
                .map_err(|_| AccessError::invalid(token, "malformed netmask"))?
            else {
                return Err(AccessError::invalid(token, "netmask must be IPv4"));
            };
            let bits = u32::from(mask_addr);
            if bits.leading_ones() + bits.trailing_zeros() != 32 {
                return Err(AccessError::invalid(token, "netmask is not contiguous"));
            }
            bits.leading_ones() as u8
        };

        if prefix_len > max {
            return Err(AccessError::invalid(
                token,
                format!("prefix length {} exceeds {}", prefix_len, max),
            ));
        }

        Ok(Self::Net { base, prefix_len })
    }

    /// Whether the peer address matches
    pub fn matches(&self, peer: IpAddr) -> bool {
        let peer = canonical(peer);
        match self {
            Self::All => true,
            Self::Local | Self::HostName(_) => false,
            Self::Addr(addr) => *addr == peer,
            Self::Prefix(prefix) => peer.is_ipv4() && peer.to_string().starts_with(prefix.as_str()),
            Self::Net { base, prefix_len } => in_network(peer, *base, *prefix_len),
        }
    }

    /// True for patterns that can never match in this implementation
    pub fn needs_name_resolution(&self) -> bool {
        matches!(self, Self::Local | Self::HostName(_))
    }
}

impl fmt::Display for ClientPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Local => write!(f, "LOCAL"),
            Self::Addr(addr) => write!(f, "{}", addr),
            Self::Prefix(prefix) => write!(f, "{}", prefix),
            Self::Net { base, prefix_len } => write!(f, "{}/{}", base, prefix_len),
            Self::HostName(name) => write!(f, "{}", name),
        }
    }
}

/// `patterns [EXCEPT patterns [EXCEPT ...]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternList {
    include: Vec<ClientPattern>,
    except: Option<Box<PatternList>>,
}

impl PatternList {
    /// Parse a comma and/or whitespace separated list
    pub fn parse(text: &str) -> Result<Self> {
        let tokens: Vec<&str> = split_list(text).collect();
        Self::from_tokens(&tokens)
    }

    fn from_tokens(tokens: &[&str]) -> Result<Self> {
        let (head, tail) = match tokens.iter().position(|t| *t == "EXCEPT") {
            Some(idx) => (&tokens[..idx], Some(&tokens[idx + 1..])),
            None => (tokens, None),
        };

        if head.is_empty() {
            return Err(AccessError::EmptyPatternList);
        }

        let include = head
            .iter()
            .map(|t| ClientPattern::parse(t))
            .collect::<Result<Vec<_>>>()?;

        let except = match tail {
            Some(rest) => Some(Box::new(Self::from_tokens(rest)?)),
            None => None,
        };

        Ok(Self { include, except })
    }

    /// Whether the peer address matches the list
    pub fn matches(&self, peer: IpAddr) -> bool {
        self.include.iter().any(|p| p.matches(peer))
            && !self.except.as_ref().is_some_and(|e| e.matches(peer))
    }

    /// Patterns that will never match because they name hosts
    pub fn unresolvable(&self) -> Vec<&ClientPattern> {
        let mut out: Vec<&ClientPattern> = self
            .include
            .iter()
            .filter(|p| p.needs_name_resolution())
            .collect();
        if let Some(except) = &self.except {
            out.extend(except.unresolvable());
        }
        out
    }
}

impl fmt::Display for PatternList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.include.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", p)?;
        }
        if let Some(except) = &self.except {
            write!(f, " EXCEPT {}", except)?;
        }
        Ok(())
    }
}

/// Split a tcp-wrappers list on commas and whitespace
pub(crate) fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

/// IPv4-mapped IPv6 addresses are treated as IPv4
pub fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

fn strip_brackets(token: &str) -> &str {
    token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(token)
}

fn in_network(peer: IpAddr, base: IpAddr, prefix_len: u8) -> bool {
    match (peer, base) {
        (IpAddr::V4(p), IpAddr::V4(b)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
            u32::from(p) & mask == u32::from(b) & mask
        }
        (IpAddr::V6(p), IpAddr::V6(b)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0);
            u128::from(p) & mask == u128::from(b) & mask
        }
        _ => false,
    }
}
