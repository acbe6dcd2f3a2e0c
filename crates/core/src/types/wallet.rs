//! Wallet address type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`WalletAddress`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletAddressError {
    /// The input is empty after trimming.
    #[error("wallet address cannot be empty")]
    Empty,
    /// The input contains whitespace or control characters.
    #[error("wallet address contains invalid characters")]
    InvalidCharacters,
    /// The input looks like an EVM address but is not 20 hex bytes.
    #[error("EVM wallet address must be 0x followed by 40 hex digits")]
    InvalidEvmAddress,
}

/// On-chain wallet address reported by the identity provider or stored on the
/// backend profile.
///
/// Addresses prefixed with `0x` are validated as EVM addresses and lowercased
/// so checksummed and plain spellings compare equal. Other chains' addresses
/// are kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse a wallet address.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, contains whitespace, or is a
    /// malformed `0x` address.
    pub fn parse(s: &str) -> Result<Self, WalletAddressError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(WalletAddressError::Empty);
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(WalletAddressError::InvalidCharacters);
        }

        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(WalletAddressError::InvalidEvmAddress);
            }
            return Ok(Self(format!("0x{}", hex.to_ascii_lowercase())));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is an EVM (`0x`-prefixed) address.
    #[must_use]
    pub fn is_evm(&self) -> bool {
        self.0.starts_with("0x")
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = WalletAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_evm_address_is_lowercased() {
        let addr = WalletAddress::parse("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01").unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert!(addr.is_evm());
    }

    #[test]
    fn test_evm_address_length_checked() {
        assert_eq!(
            WalletAddress::parse("0x1234"),
            Err(WalletAddressError::InvalidEvmAddress)
        );
        assert_eq!(
            WalletAddress::parse("0xzz23456789abcdef0123456789abcdef01234567"),
            Err(WalletAddressError::InvalidEvmAddress)
        );
    }

    #[test]
    fn test_non_evm_address_kept_verbatim() {
        let addr = WalletAddress::parse("7EcDhSYGxXyscszYEp35KHN8vvw3svAuLKTzXwCFLtV").unwrap();
        assert_eq!(addr.as_str(), "7EcDhSYGxXyscszYEp35KHN8vvw3svAuLKTzXwCFLtV");
        assert!(!addr.is_evm());
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert_eq!(WalletAddress::parse("  "), Err(WalletAddressError::Empty));
        assert_eq!(
            WalletAddress::parse("abc def"),
            Err(WalletAddressError::InvalidCharacters)
        );
    }
}
