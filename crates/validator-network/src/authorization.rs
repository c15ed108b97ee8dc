// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Handshake and authorization (C6/C7/C14, spec §4.8): the responder side
//! of a new peer connection advertises supported roles/protocol version,
//! then runs either the trust scheme (accept the stated key) or the
//! challenge scheme (nonce + signature, verified against the `network`
//! role policy in the permission verifier).

use std::collections::HashSet;

use rand::RngCore;
use validator_permissions::PermissionVerifier;
use validator_types::crypto::verify_header_signature;

use crate::error::{NetworkError, Result};
use crate::peer_table::{ROLE_NETWORK, ROLE_NETWORK_CONSENSUS};

const NONCE_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationScheme {
    Trust,
    Challenge,
}

pub fn generate_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Verifies a challenge response's signature over the nonce, then checks
/// the signer against the `network` role policy at `state_root`.
pub fn verify_challenge_response(
    verifier: &PermissionVerifier,
    nonce: &[u8],
    public_key_hex: &str,
    signature_hex: &str,
    state_root: validator_permissions::StateRoot,
) -> Result<()> {
    verify_header_signature(nonce, signature_hex, public_key_hex)
        .map_err(|e| NetworkError::HandshakeFailed(e.to_string()))?;
    authorize_role(verifier, ROLE_NETWORK, public_key_hex, state_root)
}

/// Checks `public_key_hex` against `role`'s policy, translating a denial
/// into `AuthorizationViolation`.
pub fn authorize_role(
    verifier: &PermissionVerifier,
    role: &str,
    public_key_hex: &str,
    state_root: validator_permissions::StateRoot,
) -> Result<()> {
    if verifier.check(role, public_key_hex, state_root)? {
        Ok(())
    } else {
        Err(NetworkError::AuthorizationViolation(format!("{public_key_hex} denied role {role}")))
    }
}

/// Role set granted to a newly authorized peer: always `network`, plus
/// `network.consensus` if that role's policy also permits the key.
pub fn assign_roles(
    verifier: &PermissionVerifier,
    public_key_hex: &str,
    state_root: validator_permissions::StateRoot,
) -> Result<HashSet<String>> {
    let mut roles = HashSet::new();
    roles.insert(ROLE_NETWORK.to_string());
    if verifier.check(ROLE_NETWORK_CONSENSUS, public_key_hex, state_root)? {
        roles.insert(ROLE_NETWORK_CONSENSUS.to_string());
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use validator_permissions::{OffChainRoles, PolicyRule};
    use validator_storage::{KvStore, TrieReader, EMPTY_TRIE_ROOT};
    use validator_types::crypto::Signer;

    fn permissive_verifier() -> PermissionVerifier {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::default())
    }

    fn restrictive_verifier() -> PermissionVerifier {
        let mut roles = HashMap::new();
        roles.insert(ROLE_NETWORK_CONSENSUS.to_string(), vec![PolicyRule::Deny("*".to_string())]);
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::new(roles))
    }

    #[test]
    fn challenge_response_round_trips_with_implicit_permit() {
        let signer = Signer::generate(&mut rand::thread_rng());
        let nonce = generate_nonce();
        let signature = signer.sign(&nonce);
        let verifier = permissive_verifier();
        verify_challenge_response(&verifier, &nonce, &signer.public_key_hex, &signature, EMPTY_TRIE_ROOT).unwrap();
    }

    #[test]
    fn tampered_signature_fails_handshake() {
        let signer = Signer::generate(&mut rand::thread_rng());
        let nonce = generate_nonce();
        let other_nonce = generate_nonce();
        let signature = signer.sign(&other_nonce);
        let verifier = permissive_verifier();
        assert!(verify_challenge_response(&verifier, &nonce, &signer.public_key_hex, &signature, EMPTY_TRIE_ROOT).is_err());
    }

    #[test]
    fn consensus_role_withheld_when_policy_denies() {
        let signer = Signer::generate(&mut rand::thread_rng());
        let verifier = restrictive_verifier();
        let roles = assign_roles(&verifier, &signer.public_key_hex, EMPTY_TRIE_ROOT).unwrap();
        assert!(roles.contains(ROLE_NETWORK));
        assert!(!roles.contains(ROLE_NETWORK_CONSENSUS));
    }
}
