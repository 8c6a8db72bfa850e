use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Longest identity accepted from a transport header
pub const MAX_IDENTITY_LEN: usize = 256;

/// Opaque identity of the paying agent.
///
/// Typically an EVM address (`0x` + 40 hex digits), which is lowercased so
/// that checksummed and plain spellings refer to the same account. Any other
/// non-empty printable token is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletIdentity(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletIdentityError {
    #[error("wallet identity is empty")]
    Empty,
    #[error("wallet identity exceeds {MAX_IDENTITY_LEN} characters")]
    TooLong,
    #[error("wallet identity contains whitespace or control characters")]
    InvalidCharacter,
}

impl WalletIdentity {
    pub fn parse(raw: &str) -> Result<Self, WalletIdentityError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(WalletIdentityError::Empty);
        }
        if value.len() > MAX_IDENTITY_LEN {
            return Err(WalletIdentityError::TooLong);
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(WalletIdentityError::InvalidCharacter);
        }

        if is_evm_address(value) {
            Ok(Self(value.to_ascii_lowercase()))
        } else {
            Ok(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_evm_address(value: &str) -> bool {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"));
    matches!(hex, Some(h) if h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
}

impl Display for WalletIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WalletIdentity {
    type Err = WalletIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalletIdentity {
    type Error = WalletIdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletIdentity> for String {
    fn from(value: WalletIdentity) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims() {
        let id = WalletIdentity::parse("  agent-7  ").unwrap();
        assert_eq!(id.as_str(), "agent-7");
    }

    #[test]
    fn test_evm_address_lowercased() {
        let id = WalletIdentity::parse("0xAbCdEf0123456789aBcDeF0123456789ABCDEF01").unwrap();
        assert_eq!(id.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_non_address_kept_verbatim() {
        let id = WalletIdentity::parse("Acct-XYZ").unwrap();
        assert_eq!(id.to_string(), "Acct-XYZ");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(WalletIdentity::parse("   "), Err(WalletIdentityError::Empty));
        assert_eq!(
            WalletIdentity::parse("two words"),
            Err(WalletIdentityError::InvalidCharacter)
        );
        let long = "a".repeat(MAX_IDENTITY_LEN + 1);
        assert_eq!(WalletIdentity::parse(&long), Err(WalletIdentityError::TooLong));
    }

    #[test]
    fn test_serde_validates() {
        let id: WalletIdentity = serde_json::from_str("\"wallet-1\"").unwrap();
        assert_eq!(id.as_str(), "wallet-1");
        assert!(serde_json::from_str::<WalletIdentity>("\"\"").is_err());
    }
}
