//! Opaque credentials and token decryption.

use std::fmt;

use base64::Engine;

use crate::error::TriggerError;

/// Number of leading characters kept visible when a credential is logged.
const VISIBLE_PREFIX: usize = 4;

/// An authentication credential taken from a trigger payload.
///
/// The raw value is only reachable through [`Credential::expose`]; `Debug` and
/// `Display` print a redacted form so credentials can be passed to `tracing`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw credential for use in an outbound header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted representation, safe to log.
    pub fn redacted(&self) -> String {
        if self.0.chars().count() <= VISIBLE_PREFIX * 2 {
            return "****".to_string();
        }
        let prefix: String = self.0.chars().take(VISIBLE_PREFIX).collect();
        format!("{}****", prefix)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.redacted())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Turns the encrypted token carried by a trigger into a usable credential.
pub trait TokenDecryptor: Send + Sync {
    fn decrypt(&self, encrypted: &str) -> Result<Credential, TriggerError>;
}

/// Tokens that are passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainToken;

impl TokenDecryptor for PlainToken {
    fn decrypt(&self, encrypted: &str) -> Result<Credential, TriggerError> {
        Ok(Credential::new(encrypted.trim()))
    }
}

/// Tokens carried as standard base64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Token;

impl TokenDecryptor for Base64Token {
    fn decrypt(&self, encrypted: &str) -> Result<Credential, TriggerError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encrypted.trim())
            .map_err(|e| TriggerError::InvalidToken(e.to_string()))?;
        let token = String::from_utf8(bytes).map_err(|e| TriggerError::InvalidToken(e.to_string()))?;
        Ok(Credential::new(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_are_redacted() {
        let cred = Credential::new("AgBz9xk2secret-token-value");
        assert_eq!(format!("{}", cred), "AgBz****");
        assert_eq!(format!("{:?}", cred), "Credential(AgBz****)");
        assert!(!format!("{:?}", cred).contains("secret"));
    }

    #[test]
    fn test_short_credentials_fully_hidden() {
        let cred = Credential::new("abc");
        assert_eq!(cred.redacted(), "****");
        assert_eq!(cred.expose(), "abc");
    }

    #[test]
    fn test_base64_token() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("nexus-token-123");
        let cred = Base64Token.decrypt(&encoded).unwrap();
        assert_eq!(cred.expose(), "nexus-token-123");
    }

    #[test]
    fn test_base64_token_rejects_garbage() {
        let err = Base64Token.decrypt("***not base64***").unwrap_err();
        assert!(matches!(err, TriggerError::InvalidToken(_)));
    }

    #[test]
    fn test_plain_token_trims() {
        let cred = PlainToken.decrypt("  tok \n").unwrap();
        assert_eq!(cred.expose(), "tok");
    }
}
