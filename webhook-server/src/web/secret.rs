//! Secret token sent by the platform in `X-Telegram-Bot-Api-Secret-Token`.

use std::fmt;

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared secret configured through `setWebhook`.
///
/// The platform allows 1 to 256 characters from `A-Z`, `a-z`, `0-9`, `_`
/// and `-`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn parse(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.is_empty() || value.len() > 256 {
            return Err(format!("length {} is outside 1..=256", value.len()));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(format!("character '{c}' is not allowed"));
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compare a header value against the secret without short-circuiting
    /// on the first differing byte.
    pub fn matches(&self, provided: &[u8]) -> bool {
        constant_time_eq(self.0.as_bytes(), provided)
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

/// Constant-time byte comparison. Only the length is allowed to leak.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_parse_enforces_charset() {
        assert!(SecretToken::parse("Abc_123-xyz").is_ok());
        assert!(SecretToken::parse("").is_err());
        assert!(SecretToken::parse("has space").is_err());
        assert!(SecretToken::parse("semi;colon").is_err());
        assert!(SecretToken::parse("a".repeat(256)).is_ok());
        assert!(SecretToken::parse("a".repeat(257)).is_err());
    }

    #[test]
    fn test_matches_and_debug() {
        let secret = SecretToken::parse("s3cret").unwrap();
        assert!(secret.matches(b"s3cret"));
        assert!(!secret.matches(b"s3creT"));
        assert!(!secret.matches(b""));
        assert_eq!(format!("{secret:?}"), "SecretToken(***)");
    }
}
