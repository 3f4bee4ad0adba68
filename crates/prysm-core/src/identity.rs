//! The published service identity (onion address).

use std::fmt;

/// Suffix every published service address ends with.
pub const ONION_SUFFIX: &str = ".onion";

/// Why identity file contents were rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("identity file is empty")]
    Empty,

    #[error("{0:?} does not end with {ONION_SUFFIX}")]
    MissingSuffix(String),

    #[error("{0:?} has no service label before {ONION_SUFFIX}")]
    EmptyLabel(String),

    #[error("{0:?} contains whitespace")]
    Whitespace(String),

    #[error("identity file is larger than {limit} bytes")]
    TooLarge { limit: u64 },
}

/// A validated onion address, as read from the daemon's `hostname` file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Validate trimmed identity file contents.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let address = raw.trim();
        if address.is_empty() {
            return Err(IdentityError::Empty);
        }
        let Some(label) = address.strip_suffix(ONION_SUFFIX) else {
            return Err(IdentityError::MissingSuffix(address.to_string()));
        };
        if label.is_empty() {
            return Err(IdentityError::EmptyLabel(address.to_string()));
        }
        if address.chars().any(char::is_whitespace) {
            return Err(IdentityError::Whitespace(address.to_string()));
        }
        Ok(Self(address.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address without its `.onion` suffix.
    pub fn service_id(&self) -> &str {
        self.0.strip_suffix(ONION_SUFFIX).unwrap_or(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_onion_address() {
        let addr = OnionAddress::parse("abc123.onion").unwrap();
        assert_eq!(addr.as_str(), "abc123.onion");
        assert_eq!(addr.service_id(), "abc123");
    }

    #[test]
    fn test_parse_trims_surrounding_whitespace() {
        let addr = OnionAddress::parse("  ready.onion\n").unwrap();
        assert_eq!(addr.to_string(), "ready.onion");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(OnionAddress::parse(""), Err(IdentityError::Empty));
        assert_eq!(OnionAddress::parse(" \n"), Err(IdentityError::Empty));
        assert!(matches!(
            OnionAddress::parse("not-an-onion"),
            Err(IdentityError::MissingSuffix(_))
        ));
        assert!(matches!(
            OnionAddress::parse(".onion"),
            Err(IdentityError::EmptyLabel(_))
        ));
        assert!(matches!(
            OnionAddress::parse("two words.onion"),
            Err(IdentityError::Whitespace(_))
        ));
    }
}
