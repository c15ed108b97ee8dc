// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use secp256k1::{
    ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey, SECP256K1,
};
use sha2::{Digest, Sha256, Sha512};

use crate::error::TypesError;

/// Signs `header_bytes` with a secp256k1 private key, returning the lowercase
/// hex of a compact 64-byte ECDSA signature over SHA-256 of the header, per
/// the wire format in §6 of the specification this crate implements.
pub fn sign_header(header_bytes: &[u8], signing_key: &SecretKey) -> String {
    let digest = Sha256::digest(header_bytes);
    let message = Message::from_digest_slice(&digest).expect("SHA-256 digest is 32 bytes");
    let signature = SECP256K1.sign_ecdsa(&message, signing_key);
    hex::encode(signature.serialize_compact())
}

/// Verifies that `header_signature` (hex) is a valid secp256k1 ECDSA
/// signature over SHA-256 of `header_bytes` by `signer_public_key` (hex).
pub fn verify_header_signature(
    header_bytes: &[u8],
    header_signature: &str,
    signer_public_key: &str,
) -> Result<(), TypesError> {
    let sig_bytes = hex::decode(header_signature)?;
    let signature = Signature::from_compact(&sig_bytes)
        .map_err(|e| TypesError::BadSignature(e.to_string()))?;
    let pubkey_bytes = hex::decode(signer_public_key)?;
    let public_key =
        PublicKey::from_slice(&pubkey_bytes).map_err(|e| TypesError::BadSignature(e.to_string()))?;
    let digest = Sha256::digest(header_bytes);
    let message = Message::from_digest_slice(&digest).expect("SHA-256 digest is 32 bytes");
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|e| TypesError::BadSignature(e.to_string()))
}

/// Lowercase hex of `SHA-512(payload)`, as required for `payload_sha512`.
pub fn payload_sha512_hex(payload: &[u8]) -> String {
    hex::encode(Sha512::digest(payload))
}

/// A signing identity: a secp256k1 keypair plus its hex-encoded public key,
/// used by transaction/batch/block test fixtures and by the validator's own
/// block-signing key.
pub struct Signer {
    pub secret_key: SecretKey,
    pub public_key_hex: String,
}

impl Signer {
    pub fn generate(rng: &mut impl rand::Rng) -> Self {
        let secret_key = SecretKey::new(rng);
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        Self {
            secret_key,
            public_key_hex: hex::encode(public_key.serialize()),
        }
    }

    pub fn sign(&self, header_bytes: &[u8]) -> String {
        sign_header(header_bytes, &self.secret_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let mut rng = rand::thread_rng();
        let signer = Signer::generate(&mut rng);
        let header = b"some canonical header bytes";
        let sig = signer.sign(header);
        verify_header_signature(header, &sig, &signer.public_key_hex).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_header() {
        let mut rng = rand::thread_rng();
        let signer = Signer::generate(&mut rng);
        let sig = signer.sign(b"original header");
        assert!(verify_header_signature(b"tampered header", &sig, &signer.public_key_hex).is_err());
    }

    #[test]
    fn payload_hash_matches_sha512() {
        let hash = payload_sha512_hex(b"hello");
        assert_eq!(hash.len(), 128);
    }
}
