// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Loads this validator's signing key from `<data_dir>/keys/validator.priv`,
//! generating and persisting a fresh one on first boot. `Signer` doesn't
//! implement `Clone`, so callers that need more than one `Signer` built from
//! the same key (genesis bootstrap, the block publisher) go through
//! [`signer_from_bytes`] rather than cloning.

use std::path::{Path, PathBuf};

use secp256k1::{PublicKey, SecretKey, SECP256K1};

use validator_types::crypto::Signer;

use crate::error::{NodeError, Result};

fn key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("keys").join("validator.priv")
}

pub fn signer_from_bytes(bytes: &[u8; 32]) -> Result<Signer> {
    let secret_key = SecretKey::from_slice(bytes).map_err(|e| NodeError::GenesisInvalid(format!("invalid signing key: {e}")))?;
    let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
    Ok(Signer { secret_key, public_key_hex: hex::encode(public_key.serialize()) })
}

/// Returns the raw 32-byte secret key, loading it from disk if present or
/// generating and persisting a new one otherwise.
pub fn load_or_generate(data_dir: &Path) -> Result<[u8; 32]> {
    let path = key_path(data_dir);
    if let Ok(contents) = std::fs::read_to_string(&path) {
        let bytes = hex::decode(contents.trim())?;
        let mut key = [0u8; 32];
        if bytes.len() == 32 {
            key.copy_from_slice(&bytes);
            return Ok(key);
        }
        tracing::warn!(path = %path.display(), "signing key file is malformed, regenerating");
    }

    let mut rng = rand::thread_rng();
    let signer = Signer::generate(&mut rng);
    let key = signer.secret_key.secret_bytes();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, hex::encode(key))?;
    tracing::info!(path = %path.display(), public_key = %signer.public_key_hex, "generated new validator signing key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_is_reloaded_identically() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_generate(dir.path()).unwrap();
        let second = load_or_generate(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn signer_from_bytes_round_trips_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = load_or_generate(dir.path()).unwrap();
        let a = signer_from_bytes(&key).unwrap();
        let b = signer_from_bytes(&key).unwrap();
        assert_eq!(a.public_key_hex, b.public_key_hex);
    }
}
