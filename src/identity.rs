//! Peer identity — the user-chosen handle.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// A validated peer handle: non-empty and free of whitespace, immutable for
/// the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    /// Validate and wrap a user-chosen handle.
    pub fn new(s: impl Into<String>) -> Result<Self, ChatError> {
        let s = s.into();
        if s.is_empty() {
            return Err(ChatError::InvalidHandle("handle is empty".to_string()));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ChatError::InvalidHandle(format!(
                "handle '{s}' contains whitespace"
            )));
        }
        Ok(Self(s))
    }

    /// Suggest a random 10-character alphanumeric handle.
    pub fn suggest() -> Self {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::rng();
        let s: String = (0..10)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(s)
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Handle {
    type Error = ChatError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Handle> for String {
    fn from(h: Handle) -> String {
        h.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
