//! hosts.allow / hosts.deny style rule files
//!
//! Each logical line is `daemon_list : client_list [: option ...]`.
//! Backslash continues a line, `#` starts a comment line. The only
//! options honoured are `allow` and `deny`; they override the action
//! implied by which file the rule came from.

use std::path::Path;
use tracing::{debug, warn};

use super::error::{AccessError, Result};
use super::pattern::{split_list, PatternList};
use super::rules::{AccessRule, RuleAction};

/// Load the rules of `path` that apply to `daemon_name`
pub fn load_rules_file(
    path: &Path,
    daemon_name: &str,
    implied: RuleAction,
) -> Result<Vec<AccessRule>> {
    let text = std::fs::read_to_string(path).map_err(|source| AccessError::RuleFile {
        path: path.to_path_buf(),
        source,
    })?;

    let rules = parse_rules(&text, &path.display().to_string(), daemon_name, implied)?;
    debug!("Loaded {} rules for {} from {:?}", rules.len(), daemon_name, path);
    Ok(rules)
}

/// Parse rule file text
pub fn parse_rules(
    text: &str,
    origin: &str,
    daemon_name: &str,
    implied: RuleAction,
) -> Result<Vec<AccessRule>> {
    let mut rules = Vec::new();

    for (line_no, line) in logical_lines(text) {
        let fields = split_fields(&line);
        if fields.len() < 2 {
            return Err(AccessError::MalformedRule {
                origin: format!("{}:{}", origin, line_no),
                line: line.clone(),
            });
        }

        if !daemon_matches(fields[0], daemon_name) {
            continue;
        }

        let mut action = implied;
        for option in &fields[2..] {
            match option.to_ascii_lowercase().as_str() {
                "allow" => action = RuleAction::Allow,
                "deny" => action = RuleAction::Deny,
                "" => {}
                other => warn!("{}:{}: ignoring unsupported option {:?}", origin, line_no, other),
            }
        }

        let clients = PatternList::parse(fields[1])?;
        rules.push(AccessRule::new(clients, action, format!("{}:{}", origin, line_no)));
    }

    Ok(rules)
}

/// Join continuation lines and drop comments, keeping the first line number
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();

        if pending.is_none() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }

        let (start, mut acc) = pending.take().unwrap_or((idx + 1, String::new()));
        match trimmed.strip_suffix('\\') {
            Some(head) => {
                acc.push_str(head);
                acc.push(' ');
                pending = Some((start, acc));
            }
            None => {
                acc.push_str(trimmed);
                out.push((start, acc));
            }
        }
    }

    if let Some((start, acc)) = pending {
        out.push((start, acc));
    }

    out
}

/// Split on ':' outside of `[...]` so IPv6 addresses survive
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in line.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => {
                fields.push(line[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(line[start..].trim());
    fields
}

/// Daemon lists support `ALL` and a single level of `EXCEPT`
fn daemon_matches(list: &str, daemon_name: &str) -> bool {
    let tokens: Vec<&str> = split_list(list).collect();
    let (head, tail) = match tokens.iter().position(|t| *t == "EXCEPT") {
        Some(idx) => (&tokens[..idx], &tokens[idx + 1..]),
        None => (&tokens[..], &[][..]),
    };

    let hit = |t: &&str| *t == "ALL" || *t == daemon_name;
    head.iter().any(hit) && !tail.iter().any(hit)
}
