use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::Display;

/// The public short identifier of a shortened URL.
///
/// User-supplied keys (custom keys, the configured default key, path
/// segments) go through [`ShortKey::new`] and must be 1-64 characters from
/// `[A-Za-z0-9_.~-]`. Generated keys are trusted and use
/// [`ShortKey::new_unchecked`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortKey(String);

const MIN_LENGTH: usize = 1;
const MAX_LENGTH: usize = 64;

impl ShortKey {
    /// Creates a new `ShortKey` after validating the input.
    pub fn new(key: impl Into<String>) -> std::result::Result<Self, CoreError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Creates a `ShortKey` without validation.
    ///
    /// Use this only for keys produced by trusted internal sources
    /// (generators, replayed logs, database rows).
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Renders the full short URL under the given base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> std::result::Result<(), CoreError> {
        if key.len() < MIN_LENGTH || key.len() > MAX_LENGTH {
            return Err(CoreError::InvalidShortKey(format!(
                "length must be between {} and {}, got {}",
                MIN_LENGTH,
                MAX_LENGTH,
                key.len()
            )));
        }

        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
        {
            return Err(CoreError::InvalidShortKey(format!(
                "must contain only alphanumeric characters, '-', '_', '.' or '~': '{}'",
                key
            )));
        }

        Ok(())
    }
}

impl Display for ShortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ShortKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keys() {
        assert!(ShortKey::new("a").is_ok());
        assert!(ShortKey::new("Abc-123_xyz").is_ok());
        assert!(ShortKey::new("v1.2~beta").is_ok());
        assert!(ShortKey::new("a".repeat(64)).is_ok());
    }

    #[test]
    fn empty_or_too_long() {
        assert!(ShortKey::new("").is_err());
        assert!(ShortKey::new("a".repeat(65)).is_err());
    }

    #[test]
    fn invalid_characters() {
        assert!(ShortKey::new("abc def").is_err());
        assert!(ShortKey::new("abc/def").is_err());
        assert!(ShortKey::new("abc!def").is_err());
    }

    #[test]
    fn to_url_trims_trailing_slash() {
        let key = ShortKey::new("abc123").unwrap();
        assert_eq!(key.to_url("http://localhost:8080"), "http://localhost:8080/abc123");
        assert_eq!(key.to_url("http://localhost:8080/"), "http://localhost:8080/abc123");
    }

    #[test]
    fn display_is_the_raw_key() {
        let key = ShortKey::new_unchecked("K1");
        assert_eq!(key.to_string(), "K1");
        assert_eq!(key.as_str(), "K1");
    }
}
