// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Settings namespace reader (spec §3 "on-chain settings", §6 enumerated
//! keys): a flat `setting_name -> value` map held in global state under a
//! dedicated synthetic family, values stored as raw UTF-8 so every consumer
//! (consensus selection, publisher caps, permission checks) parses only the
//! value shape it cares about.

use validator_storage::TrieReader;
use validator_types::Address;

use crate::error::Result;

const SETTINGS_FAMILY: &str = "sawtooth_settings";

pub const CONSENSUS_ALGORITHM_NAME: &str = "sawtooth.consensus.algorithm.name";
pub const CONSENSUS_ALGORITHM_VERSION: &str = "sawtooth.consensus.algorithm.version";
pub const PUBLISHER_MAX_BATCHES_PER_BLOCK: &str = "sawtooth.publisher.max_batches_per_block";
pub const SETTINGS_VOTE_AUTHORIZED_KEYS: &str = "sawtooth.settings.vote.authorized_keys";
pub const IDENTITY_ALLOWED_KEYS: &str = "sawtooth.identity.allowed_keys";
pub const VALIDATOR_TRANSACTION_FAMILIES: &str = "sawtooth.validator.transaction_families";
pub const VALIDATOR_BLOCK_INJECTORS: &str = "sawtooth.validator.block_injectors";

/// Read-only view of the Settings namespace at a fixed trie root.
pub struct SettingsView {
    reader: TrieReader,
}

impl SettingsView {
    pub fn new(reader: TrieReader) -> Self {
        Self { reader }
    }

    /// Raw value for any setting key, including the opaque
    /// `sawtooth.consensus.pbft.members` / `sawtooth.poet.*` family.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let address = Address::from_family_and_key(SETTINGS_FAMILY, key.as_bytes());
        let Some(bytes) = self.reader.get(address.as_str())? else {
            return Ok(None);
        };
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Comma-separated settings (authorized-keys lists) split into a vector,
    /// empty entries dropped. Returns an empty vec when the key is unset.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>> {
        let Some(raw) = self.get(key)? else {
            return Ok(Vec::new());
        };
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn max_batches_per_block(&self) -> Result<Option<u32>> {
        let Some(raw) = self.get(PUBLISHER_MAX_BATCHES_PER_BLOCK)? else {
            return Ok(None);
        };
        Ok(raw.trim().parse().ok())
    }

    /// Ordered names of the block injectors the publisher runs against every
    /// candidate, e.g. `block_info,consensus_registration`.
    pub fn block_injectors(&self) -> Result<Vec<String>> {
        self.get_list(VALIDATOR_BLOCK_INJECTORS)
    }

    pub fn authorized_setting_voters(&self) -> Result<Vec<String>> {
        self.get_list(SETTINGS_VOTE_AUTHORIZED_KEYS)
    }

    pub fn identity_allowed_keys(&self) -> Result<Vec<String>> {
        self.get_list(IDENTITY_ALLOWED_KEYS)
    }

    /// Optional allowlist of `(family, version)` pairs admitted for
    /// transaction execution; `None` means no allowlist is configured.
    pub fn allowed_transaction_families(&self) -> Result<Option<Vec<(String, String)>>> {
        let Some(raw) = self.get(VALIDATOR_TRANSACTION_FAMILIES)? else {
            return Ok(None);
        };
        let pairs = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|entry| entry.split_once(':'))
            .map(|(family, version)| (family.to_string(), version.to_string()))
            .collect();
        Ok(Some(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_storage::KvStore;

    fn empty_view() -> SettingsView {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        SettingsView::new(TrieReader::new(&kv, validator_storage::EMPTY_TRIE_ROOT))
    }

    #[test]
    fn unset_settings_return_empty() {
        let view = empty_view();
        assert_eq!(view.get(CONSENSUS_ALGORITHM_NAME).unwrap(), None);
        assert_eq!(view.authorized_setting_voters().unwrap(), Vec::<String>::new());
        assert_eq!(view.max_batches_per_block().unwrap(), None);
        assert_eq!(view.allowed_transaction_families().unwrap(), None);
    }
}
