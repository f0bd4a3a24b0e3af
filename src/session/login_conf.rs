//! login.conf style capability database
//!
//! ```text
//! default:\
//!     :path=/sbin /bin /usr/sbin /usr/bin ~/bin:\
//!     :setenv=BLOCKSIZE=K,MAIL=/var/mail/$:
//!
//! staff|Staff members:\
//!     :setenv=EDITOR=vi:\
//!     :tc=default:
//! ```
//!
//! Only the capabilities that affect the session environment are
//! interpreted (`setenv`, `path`, `tc`); everything else is carried but
//! ignored.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::env::is_valid_name;
use super::error::{Result, SessionError};
use super::login_class::LoginClass;

/// Maximum `tc=` chain length, guards against loops
const MAX_TC_DEPTH: usize = 16;

/// A parsed capability: `name=value`, `name#num`, `name` or `name@`
#[derive(Debug, Clone, PartialEq, Eq)]
enum Capability {
    Str(String),
    Num(String),
    Flag,
    Disabled,
}

#[derive(Debug, Clone)]
struct Record {
    caps: Vec<(String, Capability)>,
}

impl Record {
    fn get(&self, name: &str) -> Option<&Capability> {
        self.caps.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }
}

/// Parsed capability database
#[derive(Debug, Clone, Default)]
pub struct LoginConf {
    records: Vec<Record>,
    /// Every name and alias → record index
    index: HashMap<String, usize>,
}

impl LoginConf {
    /// Load and parse a database file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SessionError::LoginClassDatabase {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(&text).map_err(|reason| SessionError::LoginClassDatabase {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse database text
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut conf = Self::default();

        for entry in logical_entries(text) {
            let fields = split_unescaped(&entry, ':');
            let mut fields = fields.into_iter();

            let names = fields.next().unwrap_or_default();
            let names: Vec<String> = names
                .split('|')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty() && !n.contains(' '))
                .collect();
            if names.is_empty() {
                return Err(format!("record without a name: {:?}", entry));
            }

            let caps = fields
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .map(|f| parse_capability(&f))
                .collect();

            let idx = conf.records.len();
            conf.records.push(Record { caps });
            for name in names {
                // First definition wins, as in getcap(3)
                conf.index.entry(name).or_insert(idx);
            }
        }

        Ok(conf)
    }

    /// Class names (and aliases) defined in the database
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Resolve `name` with `tc=` inheritance into a [`LoginClass`]
    pub fn class(&self, name: &str) -> Option<LoginClass> {
        let setenv = self.lookup(name, "setenv", 0)?;
        let path = self.lookup(name, "path", 0)?;

        Some(LoginClass {
            name: name.to_string(),
            setenv: match setenv {
                Some(Capability::Str(list)) => parse_setenv(&list),
                _ => Vec::new(),
            },
            path: match path {
                Some(Capability::Str(dirs)) => Some(dirs.split_whitespace().map(str::to_string).collect()),
                _ => None,
            },
        })
    }

    /// Outer `None`: class unknown. Inner `None`: capability not set.
    fn lookup(&self, class: &str, cap: &str, depth: usize) -> Option<Option<Capability>> {
        let record = &self.records[*self.index.get(class)?];

        if let Some(found) = record.get(cap) {
            return Some(match found {
                Capability::Disabled => None,
                other => Some(other.clone()),
            });
        }

        if depth >= MAX_TC_DEPTH {
            return Some(None);
        }

        match record.get("tc") {
            Some(Capability::Str(parent)) => Some(self.lookup(parent, cap, depth + 1).flatten()),
            _ => Some(None),
        }
    }
}

/// Join `\`-continued lines into records, dropping comments and blanks
fn logical_entries(text: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut acc = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if acc.is_empty() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }

        match trimmed.strip_suffix('\\') {
            Some(head) if !head.ends_with('\\') => acc.push_str(head),
            _ => {
                acc.push_str(trimmed);
                entries.push(std::mem::take(&mut acc));
            }
        }
    }

    if !acc.is_empty() {
        entries.push(acc);
    }

    entries
}

/// Split on `sep`, honouring backslash escapes (`\:`, `\,`, `\\`)
fn split_unescaped(text: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == sep || next == '\\' => cur.push(next),
                Some(next) => {
                    cur.push('\\');
                    cur.push(next);
                }
                None => cur.push('\\'),
            }
        } else if c == sep {
            out.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    out.push(cur);
    out
}

fn parse_capability(field: &str) -> (String, Capability) {
    if let Some((name, value)) = field.split_once('=') {
        return (name.to_string(), Capability::Str(value.to_string()));
    }
    if let Some((name, value)) = field.split_once('#') {
        return (name.to_string(), Capability::Num(value.to_string()));
    }
    if let Some(name) = field.strip_suffix('@') {
        return (name.to_string(), Capability::Disabled);
    }
    (field.to_string(), Capability::Flag)
}

/// `A=1,B=two\,parts` → [(A, 1), (B, two,parts)]
///
/// Entries whose name or value could not be passed to a process are skipped.
fn parse_setenv(list: &str) -> Vec<(String, String)> {
    split_unescaped(list, ',')
        .into_iter()
        .filter_map(|item| {
            let item = item.trim();
            let (name, value) = item.split_once('=')?;
            let name = name.trim();
            if !is_valid_name(name) || value.contains('\0') {
                debug!("setenv: skipping unusable entry {:?}", item);
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# login.conf
default:\
	:passwd_format=sha512:\
	:path=/sbin /bin /usr/sbin /usr/bin ~/bin:\
	:setenv=BLOCKSIZE=K,MAIL=/var/mail/$:\
	:umask=022:

staff|Staff members:\
	:setenv=EDITOR=vi,GREETING=a\,b:\
	:tc=default:

nopath:\
	:path@:\
	:tc=default:

loop1:tc=loop2:
loop2:tc=loop1:
"#;

    #[test]
    fn test_default_class() {
        let conf = LoginConf::parse(SAMPLE).unwrap();
        let class = conf.class("default").unwrap();
        assert_eq!(
            class.setenv,
            vec![
                ("BLOCKSIZE".to_string(), "K".to_string()),
                ("MAIL".to_string(), "/var/mail/$".to_string()),
            ]
        );
        assert_eq!(
            class.path.unwrap(),
            vec!["/sbin", "/bin", "/usr/sbin", "/usr/bin", "~/bin"]
        );
    }

    #[test]
    fn test_tc_inheritance_and_alias() {
        let conf = LoginConf::parse(SAMPLE).unwrap();
        let staff = conf.class("staff").unwrap();
        assert_eq!(staff.setenv[0], ("EDITOR".to_string(), "vi".to_string()));
        assert_eq!(staff.setenv[1], ("GREETING".to_string(), "a,b".to_string()));
        // path comes from default through tc=
        assert_eq!(staff.path.as_ref().unwrap().len(), 5);

        assert!(conf.names().any(|n| n == "staff"));
        assert!(conf.class("Staff members").is_none());
    }

    #[test]
    fn test_disabled_capability_stops_inheritance() {
        let conf = LoginConf::parse(SAMPLE).unwrap();
        let class = conf.class("nopath").unwrap();
        assert!(class.path.is_none());
        assert_eq!(class.setenv.len(), 2);
    }

    #[test]
    fn test_tc_loop_terminates() {
        let conf = LoginConf::parse(SAMPLE).unwrap();
        let class = conf.class("loop1").unwrap();
        assert!(class.setenv.is_empty());
        assert!(class.path.is_none());
    }

    #[test]
    fn test_setenv_skips_unusable_names() {
        let parsed = parse_setenv("GOOD=1,BAD NAME=2, =3,NUL\0X=4,VAL=a\0b,LAST=x=y");
        assert_eq!(
            parsed,
            vec![
                ("GOOD".to_string(), "1".to_string()),
                ("LAST".to_string(), "x=y".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_class() {
        let conf = LoginConf::parse(SAMPLE).unwrap();
        assert!(conf.class("nobody-class").is_none());
    }
}
