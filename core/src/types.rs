//! Core identifier newtypes shared across the ledger, storage, and seal
//! boundaries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use wincode::{SchemaRead, SchemaWrite};

/// Errors parsing identifiers from their hex forms
#[derive(Debug, Error)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

fn parse_hex32(s: &str) -> Result<[u8; 32], ParseIdError> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParseIdError::InvalidLength(len))
}

/// Identifier of an on-chain object (access list, cap, listing, blob
/// registration). The raw bytes double as the encryption namespace for
/// access lists.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, SchemaRead, SchemaWrite, Serialize, Deserialize,
)]
pub struct ObjectId(pub [u8; 32]);

impl ObjectId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for ObjectId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(ObjectId)
    }
}

/// An account address, derived from an Ed25519 verifying key.
/// Formula: SHA256(signer_pk_bytes)
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, SchemaRead, SchemaWrite, Serialize, Deserialize,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// Derive the address for an Ed25519 public key
    pub fn from_signer_pubkey(pk: &[u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(pk);
        Address(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Address {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(Address)
    }
}

/// Digest of a submitted transaction
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, SchemaRead, SchemaWrite, Serialize, Deserialize,
)]
pub struct TxDigest(pub [u8; 32]);

impl std::fmt::Display for TxDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Content identifier of a stored blob (BLAKE3 of the encoded bytes)
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, SchemaRead, SchemaWrite, Serialize, Deserialize,
)]
pub struct BlobId(pub [u8; 32]);

impl BlobId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for BlobId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(BlobId)
    }
}
