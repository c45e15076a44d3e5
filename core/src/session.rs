//! Session credentials.
//!
//! A session key lets a buyer make many key requests after a single
//! wallet interaction. The wallet signs one personal message binding
//! the session's X25519 response key, the requester address, the
//! package, and an expiry; key servers verify that certificate on every
//! request and encrypt delivered shares to the response key.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wincode::{SchemaRead, SchemaWrite};

use datamart_threshold::{EncryptedShare, Share};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::types::Address;

/// Domain prefix for the personal message, so a session signature can
/// never be replayed as a transaction signature
const MESSAGE_PREFIX: &[u8] = b"datamart-session-v1:";

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has not been signed")]
    NotSigned,

    #[error("session signature is invalid")]
    InvalidSignature,

    #[error("signer public key does not match the session address")]
    AddressMismatch,

    #[error("session expired")]
    Expired,

    #[error("malformed session certificate")]
    Malformed,
}

/// The signed portion of a session's personal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct ChallengePayload {
    pub package_id: [u8; 32],
    pub address: Address,
    pub response_public: [u8; 32],
    pub nonce: [u8; 16],
    pub expires_at_ms: u64,
}

/// A session credential held by the requesting client.
///
/// Carries the X25519 response secret; it never leaves this struct.
pub struct SessionCredential {
    address: Address,
    payload: ChallengePayload,
    response_secret: StaticSecret,
    signature: Option<Vec<u8>>,
    signer_pubkey: Option<[u8; 32]>,
}

impl SessionCredential {
    /// Create an unsigned session valid for `ttl_ms` from now
    pub fn create(address: Address, package_id: [u8; 32], ttl_ms: u64) -> Self {
        let mut rng = rand::thread_rng();
        let response_secret = StaticSecret::random_from_rng(&mut rng);
        let response_public = PublicKey::from(&response_secret);

        let mut nonce = [0u8; 16];
        rng.fill_bytes(&mut nonce);

        let payload = ChallengePayload {
            package_id,
            address,
            response_public: *response_public.as_bytes(),
            nonce,
            expires_at_ms: now_ms().saturating_add(ttl_ms),
        };

        Self {
            address,
            payload,
            response_secret,
            signature: None,
            signer_pubkey: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn response_public(&self) -> [u8; 32] {
        self.payload.response_public
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.payload.expires_at_ms
    }

    /// The personal message the wallet must sign
    pub fn personal_message(&self) -> Result<Vec<u8>, SessionError> {
        let body = wincode::serialize(&self.payload).map_err(|_| SessionError::Malformed)?;
        let mut message = Vec::with_capacity(MESSAGE_PREFIX.len() + body.len());
        message.extend_from_slice(MESSAGE_PREFIX);
        message.extend_from_slice(&body);
        Ok(message)
    }

    /// Attach and verify the wallet's signature over the personal
    /// message. The signer's public key must hash to the session
    /// address.
    pub fn attach_signature(
        &mut self,
        signature: Vec<u8>,
        signer_pubkey: [u8; 32],
    ) -> Result<(), SessionError> {
        if Address::from_signer_pubkey(&signer_pubkey) != self.address {
            return Err(SessionError::AddressMismatch);
        }

        let message = self.personal_message()?;
        verify_signature(&message, &signature, &signer_pubkey)?;

        self.signature = Some(signature);
        self.signer_pubkey = Some(signer_pubkey);
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn is_expired(&self) -> bool {
        now_ms() >= self.payload.expires_at_ms
    }

    /// Decrypt a share a key server encrypted to this session's
    /// response key
    pub fn decrypt_share(&self, encrypted: &EncryptedShare) -> Option<Share> {
        encrypted.decrypt_with(&self.response_secret)
    }

    /// The presentable certificate for key requests
    pub fn certificate(&self) -> Result<SessionCertificate, SessionError> {
        let signature = self.signature.clone().ok_or(SessionError::NotSigned)?;
        let signer_pubkey = self.signer_pubkey.ok_or(SessionError::NotSigned)?;
        Ok(SessionCertificate {
            message: self.personal_message()?,
            signature,
            signer_pubkey,
        })
    }
}

/// What a client presents to key servers: the signed personal message
/// plus the signature and signer key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCertificate {
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
    pub signer_pubkey: [u8; 32],
}

impl SessionCertificate {
    /// Verify the certificate and return its payload.
    ///
    /// Checks the message prefix, the Ed25519 signature, the binding of
    /// the signer key to the payload address, and the expiry.
    pub fn verify(&self) -> Result<ChallengePayload, SessionError> {
        let payload = self.parse_payload()?;

        verify_signature(&self.message, &self.signature, &self.signer_pubkey)?;

        if Address::from_signer_pubkey(&self.signer_pubkey) != payload.address {
            return Err(SessionError::AddressMismatch);
        }
        if now_ms() >= payload.expires_at_ms {
            return Err(SessionError::Expired);
        }

        Ok(payload)
    }

    /// Parse the payload without verifying the signature
    pub fn parse_payload(&self) -> Result<ChallengePayload, SessionError> {
        let body = self
            .message
            .strip_prefix(MESSAGE_PREFIX)
            .ok_or(SessionError::Malformed)?;
        wincode::deserialize(body).map_err(|_| SessionError::Malformed)
    }
}

fn verify_signature(
    message: &[u8],
    signature: &[u8],
    signer_pubkey: &[u8; 32],
) -> Result<(), SessionError> {
    let vk =
        VerifyingKey::from_bytes(signer_pubkey).map_err(|_| SessionError::InvalidSignature)?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| SessionError::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    vk.verify(message, &sig)
        .map_err(|_| SessionError::InvalidSignature)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
