//! Unique tokens naming per-execution artifacts

use serde::{Deserialize, Serialize};

/// Collision-resistant identifier for one execution's temp files.
///
/// Rendered as 32 lowercase hex characters, so `<token>.php` and
/// `<token>.log` are safe file names on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(pub uuid::Uuid);

impl Token {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// File name for this token with the given extension
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self, extension)
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
