// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use prost::Message;

use crate::crypto::{payload_sha512_hex, verify_header_signature};
use crate::error::TypesError;
use crate::proto;

/// Decoded transaction header. Mirrors `proto::TransactionHeader` one to
/// one; kept as a separate type so callers never depend on the generated
/// `prost` struct directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionHeader {
    pub family_name: String,
    pub family_version: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub dependencies: Vec<String>,
    pub nonce: String,
    pub signer_public_key: String,
    pub batcher_public_key: String,
    pub payload_sha512: String,
}

impl From<proto::TransactionHeader> for TransactionHeader {
    fn from(h: proto::TransactionHeader) -> Self {
        Self {
            family_name: h.family_name,
            family_version: h.family_version,
            inputs: h.inputs,
            outputs: h.outputs,
            dependencies: h.dependencies,
            nonce: h.nonce,
            signer_public_key: h.signer_public_key,
            batcher_public_key: h.batcher_public_key,
            payload_sha512: h.payload_sha512,
        }
    }
}

impl From<TransactionHeader> for proto::TransactionHeader {
    fn from(h: TransactionHeader) -> Self {
        Self {
            family_name: h.family_name,
            family_version: h.family_version,
            inputs: h.inputs,
            outputs: h.outputs,
            dependencies: h.dependencies,
            nonce: h.nonce,
            signer_public_key: h.signer_public_key,
            batcher_public_key: h.batcher_public_key,
            payload_sha512: h.payload_sha512,
        }
    }
}

/// A signed transaction: an opaque, signed header plus its payload.
///
/// `header_bytes` is kept verbatim (not re-serialized from `header`) so that
/// `header_signature` always verifies against exactly the bytes the signer
/// produced, regardless of field-ordering changes in this crate over time.
#[derive(Clone, Debug)]
pub struct Transaction {
    header_bytes: Bytes,
    header: TransactionHeader,
    header_signature: String,
    payload: Bytes,
}

impl Transaction {
    /// Decodes and structurally validates a transaction: the header must
    /// parse, and `payload_sha512` must match the actual payload. Signature
    /// verification is a separate step (`verify_signature`) since callers
    /// often want to batch it with other checks.
    pub fn decode(
        header_bytes: Bytes,
        header_signature: String,
        payload: Bytes,
    ) -> Result<Self, TypesError> {
        let decoded = proto::TransactionHeader::decode(header_bytes.as_ref())?;
        let header = TransactionHeader::from(decoded);
        let expected = payload_sha512_hex(&payload);
        if header.payload_sha512 != expected {
            return Err(TypesError::BadPayloadHash {
                expected,
                actual: header.payload_sha512.clone(),
            });
        }
        Ok(Self {
            header_bytes,
            header,
            header_signature,
            payload,
        })
    }

    /// Builds a transaction from a header and payload, signing the encoded
    /// header with `signing_key`.
    pub fn build(mut header: TransactionHeader, payload: Bytes, signing_key: &secp256k1::SecretKey) -> Self {
        header.payload_sha512 = payload_sha512_hex(&payload);
        let header_bytes: Bytes = proto::TransactionHeader::from(header.clone())
            .encode_to_vec()
            .into();
        let header_signature = crate::crypto::sign_header(&header_bytes, signing_key);
        Self {
            header_bytes,
            header,
            header_signature,
            payload,
        }
    }

    pub fn header(&self) -> &TransactionHeader {
        &self.header
    }

    pub fn header_bytes(&self) -> &Bytes {
        &self.header_bytes
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Header signature is also the transaction's content-addressed id.
    pub fn id(&self) -> &str {
        &self.header_signature
    }

    pub fn verify_signature(&self) -> Result<(), TypesError> {
        verify_header_signature(&self.header_bytes, &self.header_signature, &self.header.signer_public_key)
    }

    pub fn to_proto(&self) -> proto::Transaction {
        proto::Transaction {
            header: self.header_bytes.to_vec(),
            header_signature: self.header_signature.clone(),
            payload: self.payload.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TransactionBuilder;

    #[test]
    fn build_then_decode_round_trips() {
        let txn = TransactionBuilder::new("intkey", "1.0")
            .payload(b"set MyKey 999".to_vec())
            .build();
        let decoded =
            Transaction::decode(txn.header_bytes().clone(), txn.id().to_string(), txn.payload().clone())
                .unwrap();
        assert_eq!(decoded.header(), txn.header());
        decoded.verify_signature().unwrap();
    }

    #[test]
    fn decode_rejects_bad_payload_hash() {
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"abc".to_vec()).build();
        let err = Transaction::decode(
            txn.header_bytes().clone(),
            txn.id().to_string(),
            Bytes::from_static(b"different"),
        )
        .unwrap_err();
        assert!(matches!(err, TypesError::BadPayloadHash { .. }));
    }
}
