//! Signing boundaries.
//!
//! The workflows never hold key material themselves. Publish needs a
//! [`TransactionSigner`]; retrieve additionally needs a
//! [`MessageSigner`] for the one personal-message signature that
//! authorizes a session. Wallet integrations implement these traits;
//! [`KeypairSigner`] is the in-process implementation used by tests and
//! local tooling.

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use thiserror::Error;

use crate::ledger::{LedgerError, SignedTransaction, Transaction};
use crate::types::Address;

/// Signing errors
#[derive(Debug, Error)]
pub enum SignerError {
    /// The user (or wallet) refused to sign
    #[error("signature request declined: {0}")]
    Declined(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Signs ledger transactions
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// The ledger address this signer controls
    fn address(&self) -> Address;

    /// Sign a transaction for submission
    async fn sign_transaction(&self, tx: &Transaction) -> Result<SignedTransaction, SignerError>;
}

/// Signs opaque personal messages (session authorization)
#[async_trait]
pub trait MessageSigner: Send + Sync {
    fn address(&self) -> Address;

    /// The signer's Ed25519 public key bytes
    fn public_key(&self) -> [u8; 32];

    /// Sign an application-prefixed personal message
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// In-process Ed25519 signer
pub struct KeypairSigner {
    signing_key: SigningKey,
    address: Address,
}

impl KeypairSigner {
    pub fn new(signing_key: SigningKey) -> Self {
        let address = Address::from_signer_pubkey(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self::new(SigningKey::generate(&mut rng))
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        *self.signing_key.verifying_key().as_bytes()
    }

    /// Inherent accessor so callers holding a concrete `KeypairSigner`
    /// need not pick between the two signer traits
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: &Transaction) -> Result<SignedTransaction, SignerError> {
        let tx_bytes = tx.to_bytes()?;
        let signature = self.signing_key.sign(&tx_bytes);
        Ok(SignedTransaction {
            tx_bytes,
            signature: signature.to_bytes().to_vec(),
            signer_pubkey: self.public_key_bytes(),
        })
    }
}

#[async_trait]
impl MessageSigner for KeypairSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn public_key(&self) -> [u8; 32] {
        self.public_key_bytes()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }
}
