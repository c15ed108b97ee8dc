// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Identity namespace reader (spec §3 "Identity namespace"): `role_name ->
//! policy_name` and `policy_name -> ordered [(PERMIT_KEY|DENY_KEY,
//! public_key_or_*)]` entries, held in global state under a dedicated
//! synthetic family so they share the same trie as every other address.

use serde::{Deserialize, Serialize};
use validator_storage::TrieReader;
use validator_types::Address;

use crate::error::Result;

const ROLE_FAMILY: &str = "sawtooth_identity.role";
const POLICY_FAMILY: &str = "sawtooth_identity.policy";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyRule {
    Permit(String),
    Deny(String),
}

/// Read-only view of the Identity namespace at a fixed trie root.
pub struct IdentityView {
    reader: TrieReader,
}

impl IdentityView {
    pub fn new(reader: TrieReader) -> Self {
        Self { reader }
    }

    pub fn role_policy(&self, role_name: &str) -> Result<Option<String>> {
        let address = Address::from_family_and_key(ROLE_FAMILY, role_name.as_bytes());
        let Some(bytes) = self.reader.get(address.as_str())? else {
            return Ok(None);
        };
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn policy_rules(&self, policy_name: &str) -> Result<Option<Vec<PolicyRule>>> {
        let address = Address::from_family_and_key(POLICY_FAMILY, policy_name.as_bytes());
        let Some(bytes) = self.reader.get(address.as_str())? else {
            return Ok(None);
        };
        Ok(Some(bcs::from_bytes(&bytes).map_err(|e| {
            validator_storage::StorageError::Corruption(format!("malformed policy {policy_name}: {e}"))
        })?))
    }
}

/// Evaluates an ordered policy against a public key: the first matching rule
/// decides; no match implicitly denies (spec §3 invariant).
pub fn evaluate_policy(rules: &[PolicyRule], public_key: &str) -> bool {
    for rule in rules {
        match rule {
            PolicyRule::Permit(key) if key == "*" || key == public_key => return true,
            PolicyRule::Deny(key) if key == "*" || key == public_key => return false,
            _ => continue,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_rule_decides() {
        let rules = vec![PolicyRule::Deny("bob".to_string()), PolicyRule::Permit("*".to_string())];
        assert!(!evaluate_policy(&rules, "bob"));
        assert!(evaluate_policy(&rules, "alice"));
    }

    #[test]
    fn no_matching_rule_denies() {
        let rules = vec![PolicyRule::Permit("alice".to_string())];
        assert!(!evaluate_policy(&rules, "bob"));
    }
}
