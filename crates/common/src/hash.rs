//! Deterministic content ids
//!
//! Account ids hash the account number; payment ids hash the sender,
//! receiver and creation timestamp, so two identical payment instructions
//! produce the same id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 digest over a sequence of fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(String);

impl ContentId {
    /// Hash the given fields, separated so that ("ab", "c") != ("a", "bc")
    pub fn of(fields: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        ContentId(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(ContentId::of(&["A1"]), ContentId::of(&["A1"]));
        assert_ne!(ContentId::of(&["A1"]), ContentId::of(&["A2"]));
        assert_eq!(ContentId::of(&["A1"]).as_str().len(), 64);
    }

    #[test]
    fn test_field_boundaries() {
        assert_ne!(ContentId::of(&["ab", "c"]), ContentId::of(&["a", "bc"]));
    }
}
