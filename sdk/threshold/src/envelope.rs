//! Encrypted Object Envelope
//!
//! Versioned wire format for a threshold-encrypted dataset. The header
//! (version, package id, identity, threshold, KEM/DEM tags) is bound
//! into the AEAD as associated data, so a ciphertext opened under a
//! different identity fails authentication instead of yielding garbage.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wincode::{SchemaRead, SchemaWrite};

/// Current envelope wire version
pub const ENVELOPE_VERSION_V1: u8 = 1;

/// Key-encapsulation mechanism tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KemType {
    /// Shamir share escrow, shares transported via X25519 + HKDF-free
    /// BLAKE3 derive-key
    X25519ShareEscrow = 0,
}

/// Data-encapsulation mechanism tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemType {
    ChaCha20Poly1305 = 0,
}

impl TryFrom<u8> for KemType {
    type Error = EnvelopeError;

    fn try_from(tag: u8) -> Result<Self, EnvelopeError> {
        match tag {
            0 => Ok(KemType::X25519ShareEscrow),
            other => Err(EnvelopeError::UnknownKemType(other)),
        }
    }
}

impl TryFrom<u8> for DemType {
    type Error = EnvelopeError;

    fn try_from(tag: u8) -> Result<Self, EnvelopeError> {
        match tag {
            0 => Ok(DemType::ChaCha20Poly1305),
            other => Err(EnvelopeError::UnknownDemType(other)),
        }
    }
}

/// Envelope errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown KEM type tag {0}")]
    UnknownKemType(u8),

    #[error("unknown DEM type tag {0}")]
    UnknownDemType(u8),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed (wrong key, wrong identity, or tampered ciphertext)")]
    DecryptionFailed,

    #[error("envelope serialization failed")]
    SerializationFailed,

    #[error("envelope deserialization failed")]
    DeserializationFailed,
}

/// A threshold-encrypted dataset as stored in the blob network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct EncryptedObject {
    /// Wire version
    pub version: u8,
    /// Package the access policy lives under
    pub package_id: [u8; 32],
    /// Seal identity bytes (utf-8 of `hex(namespace) + "::" + dataset_id`)
    pub identity: Vec<u8>,
    /// Threshold K recorded at encryption time
    pub threshold: u8,
    /// KEM type tag
    pub kem_type: u8,
    /// DEM type tag
    pub dem_type: u8,
    /// AEAD nonce
    pub nonce: [u8; 12],
    /// Ciphertext + tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedObject {
    /// Serialize to storage bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        wincode::serialize(self).map_err(|_| EnvelopeError::SerializationFailed)
    }

    /// Parse from storage bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let object: Self =
            wincode::deserialize(bytes).map_err(|_| EnvelopeError::DeserializationFailed)?;
        if object.version != ENVELOPE_VERSION_V1 {
            return Err(EnvelopeError::UnsupportedVersion(object.version));
        }
        KemType::try_from(object.kem_type)?;
        DemType::try_from(object.dem_type)?;
        Ok(object)
    }

    /// Header bytes bound as AEAD associated data
    fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(3 + 32 + 1 + self.identity.len());
        aad.push(self.version);
        aad.extend_from_slice(&self.package_id);
        aad.push(self.threshold);
        aad.push(self.kem_type);
        aad.push(self.dem_type);
        aad.extend_from_slice(&self.identity);
        aad
    }
}

/// Encrypt plaintext under a dataset encryption key, binding the header
/// fields (identity included) as associated data.
pub fn seal_envelope(
    key: &[u8; 32],
    package_id: [u8; 32],
    identity: &[u8],
    threshold: u8,
    plaintext: &[u8],
) -> Result<EncryptedObject, EnvelopeError> {
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let mut object = EncryptedObject {
        version: ENVELOPE_VERSION_V1,
        package_id,
        identity: identity.to_vec(),
        threshold,
        kem_type: KemType::X25519ShareEscrow as u8,
        dem_type: DemType::ChaCha20Poly1305 as u8,
        nonce: nonce_bytes,
        ciphertext: Vec::new(),
    };

    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| EnvelopeError::EncryptionFailed)?;
    let aad = object.associated_data();

    object.ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| EnvelopeError::EncryptionFailed)?;

    Ok(object)
}

/// Decrypt an envelope with the reconstructed dataset encryption key.
///
/// Fails if the key is wrong, the ciphertext was modified, or the
/// header (identity in particular) does not match what was sealed.
pub fn open_envelope(object: &EncryptedObject, key: &[u8; 32]) -> Result<Vec<u8>, EnvelopeError> {
    if object.version != ENVELOPE_VERSION_V1 {
        return Err(EnvelopeError::UnsupportedVersion(object.version));
    }

    let cipher =
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| EnvelopeError::DecryptionFailed)?;
    let aad = object.associated_data();

    cipher
        .decrypt(
            Nonce::from_slice(&object.nonce),
            Payload {
                msg: object.ciphertext.as_slice(),
                aad: &aad,
            },
        )
        .map_err(|_| EnvelopeError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shares::random_secret;

    const PKG: [u8; 32] = [5u8; 32];

    #[test]
    fn roundtrip() {
        let key = random_secret();
        let object = seal_envelope(&key, PKG, b"abc::ds-1", 2, b"hello").unwrap();
        assert_eq!(object.threshold, 2);
        assert_eq!(object.kem_type, 0);
        assert_eq!(object.dem_type, 0);

        let plaintext = open_envelope(&object, &key).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn wire_roundtrip() {
        let key = random_secret();
        let object = seal_envelope(&key, PKG, b"abc::ds-1", 2, b"payload").unwrap();
        let bytes = object.to_bytes().unwrap();
        let parsed = EncryptedObject::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, object);
        assert_eq!(open_envelope(&parsed, &key).unwrap(), b"payload");
    }

    #[test]
    fn bit_flip_rejected() {
        let key = random_secret();
        let mut object = seal_envelope(&key, PKG, b"abc::ds-1", 2, b"hello").unwrap();
        object.ciphertext[0] ^= 0xff;
        assert!(matches!(
            open_envelope(&object, &key),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn identity_mismatch_rejected() {
        let key = random_secret();
        let mut object = seal_envelope(&key, PKG, b"abc::ds-1", 2, b"hello").unwrap();
        object.identity = b"abc::ds-2".to_vec();
        assert!(matches!(
            open_envelope(&object, &key),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn wrong_key_rejected() {
        let key = random_secret();
        let object = seal_envelope(&key, PKG, b"abc::ds-1", 2, b"hello").unwrap();
        let other = random_secret();
        assert!(open_envelope(&object, &other).is_err());
    }

    #[test]
    fn unknown_version_rejected() {
        let key = random_secret();
        let mut object = seal_envelope(&key, PKG, b"abc::ds-1", 2, b"hello").unwrap();
        object.version = 9;
        let bytes = object.to_bytes().unwrap();
        assert!(matches!(
            EncryptedObject::from_bytes(&bytes),
            Err(EnvelopeError::UnsupportedVersion(9))
        ));
    }
}
