//! Ordered session environment

use std::ffi::OsStr;

/// Variable name → value, unique keys, insertion order kept.
///
/// Setting an existing key replaces its value in place, so the position
/// of a key is that of its first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSet {
    vars: Vec<(String, String)>,
}

impl EnvironmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.vars.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.vars.iter().position(|(k, _)| k == name)?;
        Some(self.vars.remove(idx).1)
    }

    /// Merge every entry of `other`, later values winning
    pub fn merge(&mut self, other: EnvironmentSet) {
        for (k, v) in other.vars {
            self.set(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `KEY=VALUE` strings in order
    pub fn to_envp(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Pairs suitable for `Command::envs`
    pub fn as_os_pairs(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars
            .iter()
            .map(|(k, v)| (OsStr::new(k.as_str()), OsStr::new(v.as_str())))
    }
}

/// A name that can be passed to `execve`: non-empty, no `=`, NUL or whitespace
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c == '=' || c == '\0' || c.is_whitespace())
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::new();
        for (k, v) in iter {
            env.set(k, v);
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("BLOCKSIZE"));
        assert!(is_valid_name("lower_case1"));
        for bad in ["", "A=B", "A B", "TAB\tNAME", "NUL\0"] {
            assert!(!is_valid_name(bad), "{bad:?}");
        }
    }

    #[test]
    fn test_last_writer_wins_in_place() {
        let mut env = EnvironmentSet::new();
        env.set("PATH", "/bin");
        env.set("HOME", "/home/a");
        env.set("PATH", "/usr/bin");

        assert_eq!(env.len(), 2);
        assert_eq!(env.get("PATH"), Some("/usr/bin"));
        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["PATH", "HOME"]);
    }

    #[test]
    fn test_merge_and_envp() {
        let mut env: EnvironmentSet = [("A", "1"), ("B", "2")].into_iter().collect();
        let other: EnvironmentSet = [("B", "3"), ("C", "4")].into_iter().collect();
        env.merge(other);

        assert_eq!(env.to_envp(), vec!["A=1", "B=3", "C=4"]);
        assert_eq!(env.remove("A").as_deref(), Some("1"));
        assert!(!env.contains("A"));
    }
}
