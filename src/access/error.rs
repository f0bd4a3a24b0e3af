//! Access control error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for access control operations
pub type Result<T> = std::result::Result<T, AccessError>;

/// Access control error types
#[derive(Error, Debug)]
pub enum AccessError {
    /// Pattern could not be parsed
    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Pattern list has nothing to match
    #[error("Empty pattern list")]
    EmptyPatternList,

    /// Rule file line is not `daemons : clients [: option]`
    #[error("{origin}: malformed rule {line:?}")]
    MalformedRule { origin: String, line: String },

    /// Rule file could not be read
    #[error("Failed to read rule file {path:?}: {source}")]
    RuleFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AccessError {
    pub(crate) fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
