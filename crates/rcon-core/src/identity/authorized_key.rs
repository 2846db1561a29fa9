//! Authorized key parsing

use std::fmt;

use russh_keys::PublicKeyBase64;
use thiserror::Error;

/// Errors from parsing a key line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// Line is empty or a comment
    #[error("key line is empty")]
    Empty,

    /// No token in the line decodes as a public key
    #[error("no public key found in line")]
    NoKey,
}

/// A public key as recorded in configuration.
///
/// Only the canonical wire encoding is kept for comparison; the algorithm
/// name and comment are informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    algorithm: String,
    blob: Vec<u8>,
    fingerprint: String,
    comment: Option<String>,
}

impl AuthorizedKey {
    /// Parse an `authorized_keys` or `known_hosts` style line.
    ///
    /// Accepts `keytype base64 [comment]`, `options keytype base64 [comment]`
    /// and `host keytype base64`. The first token that decodes as a public
    /// key is taken as the key; everything after it is the comment.
    pub fn parse(line: &str) -> Result<Self, KeyParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Err(KeyParseError::Empty);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        for (idx, part) in parts.iter().enumerate() {
            let Ok(key) = russh_keys::parse_public_key_base64(part) else {
                continue;
            };

            let algorithm = if idx > 0 {
                parts[idx - 1].to_string()
            } else {
                key.name().to_string()
            };
            let comment = if idx + 1 < parts.len() {
                Some(parts[idx + 1..].join(" "))
            } else {
                None
            };

            return Ok(Self {
                algorithm,
                blob: key.public_key_bytes(),
                fingerprint: key.fingerprint(),
                comment,
            });
        }

        Err(KeyParseError::NoKey)
    }

    /// True iff `presented` is byte-for-byte the recorded encoding
    pub fn matches(&self, presented: &[u8]) -> bool {
        self.blob.as_slice() == presented
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm(), self.fingerprint())?;
        if let Some(comment) = self.comment() {
            write!(f, " ({})", comment)?;
        }
        Ok(())
    }
}
