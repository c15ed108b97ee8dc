// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::TypesError;

/// Number of hex characters in a state address (35 bytes).
pub const ADDRESS_LENGTH: usize = 70;
/// Number of hex characters in a namespace prefix (3 bytes).
pub const NAMESPACE_PREFIX_LENGTH: usize = 6;

/// A 70-hex-character state address: a 3-byte namespace prefix followed by
/// 32 bytes of family-defined key material.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Validates and wraps an already-hex-encoded address.
    pub fn from_hex(hex_str: impl Into<String>) -> Result<Self, TypesError> {
        let hex_str = hex_str.into();
        if hex_str.len() != ADDRESS_LENGTH {
            return Err(TypesError::InvalidAddress(format!(
                "address must be {ADDRESS_LENGTH} hex characters, got {}",
                hex_str.len()
            )));
        }
        if !hex_str.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TypesError::InvalidAddress(
                "address must be lowercase hex".to_string(),
            ));
        }
        let hex_str = hex_str.to_ascii_lowercase();
        Ok(Self(hex_str))
    }

    /// Namespace prefix for a transaction family: `lowercase(SHA512(family_name))[0:6]`.
    pub fn namespace_prefix(family_name: &str) -> String {
        let digest = Sha512::digest(family_name.as_bytes());
        hex::encode(&digest[..3])
    }

    /// Builds an address from a family name and arbitrary family-defined key bytes,
    /// hashing the key bytes down to the remaining 32 address bytes with SHA-512.
    pub fn from_family_and_key(family_name: &str, key: &[u8]) -> Self {
        let prefix = Self::namespace_prefix(family_name);
        let suffix = hex::encode(&Sha512::digest(key)[..32]);
        Self(format!("{prefix}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        &self.0[..NAMESPACE_PREFIX_LENGTH]
    }

    /// True if `self` falls under the declared address/prefix `scope` (an
    /// `inputs[]`/`outputs[]` entry, which may itself be a short prefix).
    pub fn is_within(&self, scope: &str) -> bool {
        self.0.starts_with(scope)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(Address::from_hex("abcd").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = "g".repeat(ADDRESS_LENGTH);
        assert!(Address::from_hex(bad).is_err());
    }

    #[test]
    fn namespace_prefix_is_six_hex_chars() {
        let prefix = Address::namespace_prefix("intkey");
        assert_eq!(prefix.len(), NAMESPACE_PREFIX_LENGTH);
    }

    #[test]
    fn from_family_and_key_is_well_formed() {
        let addr = Address::from_family_and_key("intkey", b"MyKey");
        assert_eq!(addr.as_str().len(), ADDRESS_LENGTH);
        assert_eq!(addr.namespace(), Address::namespace_prefix("intkey"));
    }

    #[test]
    fn is_within_checks_prefix() {
        let addr = Address::from_family_and_key("intkey", b"MyKey");
        let prefix = addr.namespace().to_string();
        assert!(addr.is_within(&prefix));
        assert!(!addr.is_within("000000"));
    }
}
