//! Key Server Set
//!
//! Descriptors for the key servers holding escrowed shares of dataset
//! encryption keys, plus the X25519 + ChaCha20-Poly1305 transport used
//! to move a share to a server (escrow) or from a server to a session
//! (delivery) without exposing it in transit.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::shares::{Share, ShareId};

/// Identifier of a key server within a set (1-indexed, same space as
/// the share ids it holds)
pub type ServerId = ShareId;

/// Public descriptor of a key server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyServerInfo {
    /// Server ID (1-indexed)
    pub id: ServerId,
    /// Server's X25519 public key (for encrypted share escrow)
    pub public_key: [u8; 32],
}

impl KeyServerInfo {
    pub fn new(id: ServerId, public_key: [u8; 32]) -> Self {
        Self { id, public_key }
    }
}

/// The set of key servers a dataset key is escrowed with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyServerSet {
    /// Threshold K: minimum servers needed to reconstruct a key
    pub threshold: usize,
    /// Server descriptors (length N)
    pub servers: Vec<KeyServerInfo>,
}

impl KeyServerSet {
    pub fn new(threshold: usize, servers: Vec<KeyServerInfo>) -> Self {
        assert!(threshold > 0 && threshold <= servers.len());
        Self { threshold, servers }
    }

    /// Get server descriptor by ID
    pub fn server(&self, id: ServerId) -> Option<&KeyServerInfo> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn total(&self) -> usize {
        self.servers.len()
    }

    /// Check whether the collected shares meet the threshold
    pub fn can_reconstruct(&self, shares: &[Share]) -> bool {
        shares.len() >= self.threshold
    }
}

/// A key server's own keypair (held server-side)
pub struct KeyServerKeypair {
    pub id: ServerId,
    secret_key: StaticSecret,
    pub public_key: PublicKey,
}

impl Clone for KeyServerKeypair {
    fn clone(&self) -> Self {
        // StaticSecret is not Clone; rebuild from bytes
        Self::from_secret(self.id, self.secret_bytes())
    }
}

impl KeyServerKeypair {
    /// Generate a fresh random keypair
    pub fn generate(id: ServerId) -> Self {
        let mut rng = rand::thread_rng();
        let secret_key = StaticSecret::random_from_rng(&mut rng);
        let public_key = PublicKey::from(&secret_key);
        Self {
            id,
            secret_key,
            public_key,
        }
    }

    /// Rebuild from persisted secret bytes
    pub fn from_secret(id: ServerId, secret_bytes: [u8; 32]) -> Self {
        let secret_key = StaticSecret::from(secret_bytes);
        let public_key = PublicKey::from(&secret_key);
        Self {
            id,
            secret_key,
            public_key,
        }
    }

    /// Secret key bytes (for persistence)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.to_bytes()
    }

    /// Public descriptor for this server
    pub fn to_info(&self) -> KeyServerInfo {
        KeyServerInfo::new(self.id, *self.public_key.as_bytes())
    }

    /// Decrypt a share escrowed to this server
    pub fn decrypt_share(&self, encrypted: &EncryptedShare) -> Option<Share> {
        encrypted.decrypt_with(&self.secret_key)
    }
}

/// A share encrypted for a specific X25519 recipient.
///
/// Used in both directions: seller → key server (escrow, recipient is
/// the server) and key server → buyer (delivery, recipient is the
/// session's response key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedShare {
    /// Share/server ID this share belongs to
    pub server_id: ServerId,
    /// Ephemeral public key of the encryptor
    pub ephemeral_pk: [u8; 32],
    /// Nonce
    pub nonce: [u8; 12],
    /// Encrypted share value + tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedShare {
    /// Encrypt a share to a recipient public key
    pub fn encrypt(share: &Share, recipient_pk: &[u8; 32]) -> Self {
        use chacha20poly1305::{
            ChaCha20Poly1305, Nonce,
            aead::{Aead, KeyInit},
        };
        use x25519_dalek::EphemeralSecret;

        let mut rng = rand::thread_rng();
        let ephemeral_secret = EphemeralSecret::random_from_rng(&mut rng);
        let ephemeral_pk = PublicKey::from(&ephemeral_secret);

        let recipient = PublicKey::from(*recipient_pk);
        let shared_secret = ephemeral_secret.diffie_hellman(&recipient);

        let key = derive_share_key(shared_secret.as_bytes(), ephemeral_pk.as_bytes());

        let mut nonce_bytes = [0u8; 12];
        rng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(&key).expect("valid key");
        let ciphertext = cipher
            .encrypt(nonce, share.value.as_slice())
            .expect("encryption should not fail");

        Self {
            server_id: share.id,
            ephemeral_pk: *ephemeral_pk.as_bytes(),
            nonce: nonce_bytes,
            ciphertext,
        }
    }

    /// Decrypt with the recipient's secret key
    pub fn decrypt_with(&self, recipient_secret: &StaticSecret) -> Option<Share> {
        use chacha20poly1305::{
            ChaCha20Poly1305, Nonce,
            aead::{Aead, KeyInit},
        };

        let sender_pk = PublicKey::from(self.ephemeral_pk);
        let shared_secret = recipient_secret.diffie_hellman(&sender_pk);

        let key = derive_share_key(shared_secret.as_bytes(), &self.ephemeral_pk);

        let cipher = ChaCha20Poly1305::new_from_slice(&key).ok()?;
        let nonce = Nonce::from_slice(&self.nonce);
        let plaintext = cipher.decrypt(nonce, self.ciphertext.as_slice()).ok()?;

        if plaintext.len() != 32 {
            return None;
        }

        let mut value = [0u8; 32];
        value.copy_from_slice(&plaintext);

        Some(Share::new(self.server_id, value))
    }
}

/// Derive the transport key for a share
fn derive_share_key(shared_secret: &[u8], ephemeral_pk: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("datamart-seal-share-v1");
    hasher.update(shared_secret);
    hasher.update(ephemeral_pk);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_share_roundtrip() {
        let server = KeyServerKeypair::generate(1);
        let share = Share::new(1, [42u8; 32]);

        let encrypted = EncryptedShare::encrypt(&share, server.public_key.as_bytes());
        let decrypted = server.decrypt_share(&encrypted).expect("decryption failed");

        assert_eq!(decrypted.id, share.id);
        assert_eq!(decrypted.value, share.value);
    }

    #[test]
    fn wrong_recipient_cannot_decrypt() {
        let server = KeyServerKeypair::generate(1);
        let other = KeyServerKeypair::generate(2);
        let share = Share::new(1, [13u8; 32]);

        let encrypted = EncryptedShare::encrypt(&share, server.public_key.as_bytes());
        assert!(other.decrypt_share(&encrypted).is_none());
    }

    #[test]
    fn server_set_construction() {
        let infos: Vec<KeyServerInfo> = (1..=5)
            .map(|i| KeyServerKeypair::generate(i).to_info())
            .collect();

        let set = KeyServerSet::new(3, infos);
        assert_eq!(set.total(), 5);
        assert!(set.server(3).is_some());
        assert!(set.server(9).is_none());
        assert!(!set.can_reconstruct(&[]));
    }
}
