//! Sync token parsing and validation.
//!
//! Tokens are bearer credentials with a two-part structured format:
//! `prefix_body`, where the prefix names the token family and the body is
//! URL-safe base64. Validation happens client-side before any network
//! call; a malformed token is fatal to the cycle and never retried.

use thiserror::Error;

/// Minimum length of the base64 body.
const MIN_BODY_LEN: usize = 32;

/// Errors from token parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    /// Token was empty.
    #[error("sync token is empty")]
    Empty,

    /// Token is missing the `prefix_body` separator.
    #[error("sync token is missing the prefix separator")]
    MissingSeparator,

    /// Prefix is empty or not alphanumeric.
    #[error("sync token prefix is invalid")]
    InvalidPrefix,

    /// Body is too short or contains non-base64url characters.
    #[error("sync token body is invalid")]
    InvalidBody,
}

/// A validated two-part sync token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncToken {
    raw: String,
    prefix_len: usize,
}

impl SyncToken {
    /// Parses and validates a raw token string.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        if raw.is_empty() {
            return Err(TokenError::Empty);
        }

        let (prefix, body) = raw.split_once('_').ok_or(TokenError::MissingSeparator)?;

        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TokenError::InvalidPrefix);
        }

        if body.len() < MIN_BODY_LEN
            || !body
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TokenError::InvalidBody);
        }

        Ok(Self {
            raw: raw.to_string(),
            prefix_len: prefix.len(),
        })
    }

    /// The token family prefix.
    pub fn prefix(&self) -> &str {
        &self.raw[..self.prefix_len]
    }

    /// The full token as sent in the `AuthSyncToken` header.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
