// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Permission verifier (C14, spec §4.9): evaluates `(role_name, public_key)`
//! against the on-chain Identity namespace, falling back to an off-chain
//! validator-configured role table and finally the `default` role. Policy
//! lookups are cached per state root and dropped whenever a new head is
//! committed, mirroring the teacher's pattern of a small `RwLock`-guarded
//! cache keyed by a version identifier rather than invalidating entry by
//! entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use validator_storage::{NodeHash, TrieReader};

use crate::error::Result;
use crate::identity::{evaluate_policy, IdentityView, PolicyRule};
use crate::settings::SettingsView;

/// Trie root identifying the global state version a lookup is evaluated
/// against; also the cache key for resolved policy snapshots.
pub type StateRoot = NodeHash;

const DEFAULT_ROLE: &str = "default";

/// Resolved snapshot of the policies relevant to the roles looked up so far
/// at a given state root. Populated lazily and shared behind an `Arc` so
/// concurrent lookups against the same root reuse one another's work.
#[derive(Default)]
struct PolicySnapshot {
    policies: RwLock<HashMap<String, Option<Vec<PolicyRule>>>>,
}

impl PolicySnapshot {
    fn rules_for(&self, view: &IdentityView, role: &str) -> Result<Option<Vec<PolicyRule>>> {
        if let Some(cached) = self.policies.read().get(role) {
            return Ok(cached.clone());
        }
        let resolved = match view.role_policy(role)? {
            Some(policy_name) => view.policy_rules(&policy_name)?,
            None => None,
        };
        self.policies.write().insert(role.to_string(), resolved.clone());
        Ok(resolved)
    }
}

/// Off-chain roles configured directly on this validator (e.g. via CLI flags
/// or a local config file), consulted when no on-chain entry exists for a
/// role.
#[derive(Clone, Default)]
pub struct OffChainRoles {
    roles: Arc<HashMap<String, Vec<PolicyRule>>>,
}

impl OffChainRoles {
    pub fn new(roles: HashMap<String, Vec<PolicyRule>>) -> Self {
        Self { roles: Arc::new(roles) }
    }

    fn rules_for(&self, role: &str) -> Option<&[PolicyRule]> {
        self.roles.get(role).map(Vec::as_slice)
    }
}

pub struct PermissionVerifier {
    reader_for_root: Box<dyn Fn(StateRoot) -> TrieReader + Send + Sync>,
    off_chain: OffChainRoles,
    cache: RwLock<HashMap<StateRoot, Arc<PolicySnapshot>>>,
}

impl PermissionVerifier {
    pub fn new(
        reader_for_root: impl Fn(StateRoot) -> TrieReader + Send + Sync + 'static,
        off_chain: OffChainRoles,
    ) -> Self {
        Self { reader_for_root: Box::new(reader_for_root), off_chain, cache: RwLock::new(HashMap::new()) }
    }

    /// Drops all cached policy snapshots; call after committing a new head.
    pub fn invalidate(&self) {
        self.cache.write().clear();
    }

    fn snapshot(&self, state_root: StateRoot) -> Arc<PolicySnapshot> {
        if let Some(snapshot) = self.cache.read().get(&state_root) {
            return snapshot.clone();
        }
        let snapshot = Arc::new(PolicySnapshot::default());
        self.cache.write().entry(state_root).or_insert_with(|| snapshot.clone()).clone()
    }

    /// Evaluates `role_name` for `public_key` at `state_root`. Returns `true`
    /// when permitted.
    pub fn check(&self, role_name: &str, public_key: &str, state_root: StateRoot) -> Result<bool> {
        let snapshot = self.snapshot(state_root);
        let reader = (self.reader_for_root)(state_root);
        let view = IdentityView::new(reader);

        if let Some(rules) = snapshot.rules_for(&view, role_name)? {
            return Ok(evaluate_policy(&rules, public_key));
        }
        if let Some(rules) = self.off_chain.rules_for(role_name) {
            return Ok(evaluate_policy(rules, public_key));
        }
        if let Some(rules) = snapshot.rules_for(&view, DEFAULT_ROLE)? {
            return Ok(evaluate_policy(&rules, public_key));
        }
        if let Some(rules) = self.off_chain.rules_for(DEFAULT_ROLE) {
            return Ok(evaluate_policy(rules, public_key));
        }
        Ok(true)
    }

    /// The `sawtooth.validator.transaction_families` allowlist at
    /// `state_root`, for admission gates that need it without their own
    /// route to the Settings namespace.
    pub fn allowed_transaction_families(&self, state_root: StateRoot) -> Result<Option<Vec<(String, String)>>> {
        let reader = (self.reader_for_root)(state_root);
        SettingsView::new(reader).allowed_transaction_families()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_storage::{KvStore, StateChangeOp, TrieWriter, EMPTY_TRIE_ROOT};
    use validator_types::Address;

    fn addr(family: &str, key: &str) -> String {
        Address::from_family_and_key(family, key.as_bytes()).as_str().to_string()
    }

    fn setup() -> (KvStore, StateRoot) {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let writer = TrieWriter::new(&kv);
        let policy = bcs::to_bytes(&vec![PolicyRule::Deny("*".to_string())]).unwrap();
        let ops = vec![
            StateChangeOp::Set { address: addr("sawtooth_identity.role", "transactor.batch_signer"), value: b"closed".to_vec() },
            StateChangeOp::Set { address: addr("sawtooth_identity.policy", "closed"), value: policy },
        ];
        let root = writer.apply(EMPTY_TRIE_ROOT, ops).unwrap();
        (kv, root)
    }

    #[test]
    fn on_chain_deny_wins_over_implicit_permit() {
        let (kv, root) = setup();
        let verifier = PermissionVerifier::new(
            move |r| TrieReader::new(&kv, r),
            OffChainRoles::default(),
        );
        assert!(!verifier.check("transactor.batch_signer", "anyone", root).unwrap());
    }

    #[test]
    fn unset_role_falls_back_to_implicit_permit() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let verifier = PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::default());
        assert!(verifier.check("transactor.batch_signer", "anyone", EMPTY_TRIE_ROOT).unwrap());
    }

    #[test]
    fn off_chain_role_used_when_no_on_chain_entry() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let mut roles = HashMap::new();
        roles.insert("network".to_string(), vec![PolicyRule::Deny("*".to_string())]);
        let verifier =
            PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::new(roles));
        assert!(!verifier.check("network", "anyone", EMPTY_TRIE_ROOT).unwrap());
    }
}
