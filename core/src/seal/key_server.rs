//! Key share servers.
//!
//! Each key server escrows one share of every dataset encryption key,
//! indexed by seal identity. A share is released only after the server
//! verifies the requester's session certificate and evaluates the
//! approval transaction against current ledger state. The approval
//! transaction itself is never executed on-chain.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use datamart_threshold::{EncryptedShare, KeyServerInfo, KeyServerKeypair};

use crate::ledger::{Command, LedgerClient, LedgerError, ObjectData, Transaction};
use crate::session::{SessionCertificate, SessionError};

/// Key server errors
#[derive(Debug, Error)]
pub enum KeyServerError {
    /// The requester is not a member of the access list
    #[error("access denied")]
    AccessDenied,

    #[error("session expired")]
    SessionExpired,

    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// No share escrowed under this identity
    #[error("unknown identity")]
    UnknownIdentity,

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for KeyServerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => KeyServerError::SessionExpired,
            other => KeyServerError::InvalidSession(other.to_string()),
        }
    }
}

/// A request for one escrowed share
pub struct KeyRequest<'a> {
    /// Seal identity of the dataset
    pub identity: &'a str,
    /// Serialized, unexecuted approval transaction
    pub approval_tx_bytes: &'a [u8],
    /// The requester's session certificate
    pub session: &'a SessionCertificate,
}

/// Boundary to one key server
#[async_trait]
pub trait KeyShareServer: Send + Sync {
    /// Public descriptor (id, escrow public key)
    fn info(&self) -> KeyServerInfo;

    /// Escrow a share under an identity (publish path)
    async fn store_share(
        &self,
        identity: &str,
        share: &EncryptedShare,
    ) -> Result<(), KeyServerError>;

    /// Release this server's share for an identity, re-encrypted to the
    /// session's response key (retrieve path)
    async fn fetch_share(&self, request: KeyRequest<'_>) -> Result<EncryptedShare, KeyServerError>;
}

/// In-process key server backed by a ledger client
pub struct LocalKeyServer<L> {
    keypair: KeyServerKeypair,
    ledger: Arc<L>,
    escrow: DashMap<String, EncryptedShare>,
}

impl<L: LedgerClient> LocalKeyServer<L> {
    pub fn new(keypair: KeyServerKeypair, ledger: Arc<L>) -> Self {
        Self {
            keypair,
            ledger,
            escrow: DashMap::new(),
        }
    }

    /// Validate the approval transaction against the session and
    /// requested identity. Returns the access list to check.
    fn validate_approval(
        &self,
        request: &KeyRequest<'_>,
        session_address: crate::types::Address,
    ) -> Result<crate::types::ObjectId, KeyServerError> {
        let tx = Transaction::from_bytes(request.approval_tx_bytes)
            .map_err(|_| KeyServerError::InvalidSession("malformed approval transaction".into()))?;

        if tx.sender != session_address {
            return Err(KeyServerError::InvalidSession(
                "approval sender does not match session".into(),
            ));
        }

        let (identity, access_list) = match tx.commands.as_slice() {
            [Command::SealApprove {
                identity,
                access_list,
            }] => (identity, *access_list),
            _ => {
                return Err(KeyServerError::InvalidSession(
                    "approval must contain exactly one SealApprove".into(),
                ));
            }
        };

        if identity.as_slice() != request.identity.as_bytes() {
            return Err(KeyServerError::InvalidSession(
                "approval identity does not match request".into(),
            ));
        }

        // The identity must be namespaced under the access list it
        // claims, otherwise a membership in one list would unlock
        // datasets of another.
        let prefix = format!("{}::", hex::encode(access_list.0));
        if !request.identity.starts_with(&prefix) {
            return Err(KeyServerError::InvalidSession(
                "identity not namespaced under access list".into(),
            ));
        }

        Ok(access_list)
    }
}

#[async_trait]
impl<L: LedgerClient> KeyShareServer for LocalKeyServer<L> {
    fn info(&self) -> KeyServerInfo {
        self.keypair.to_info()
    }

    async fn store_share(
        &self,
        identity: &str,
        share: &EncryptedShare,
    ) -> Result<(), KeyServerError> {
        if share.server_id != self.keypair.id {
            return Err(KeyServerError::Internal(format!(
                "share {} escrowed to server {}",
                share.server_id, self.keypair.id
            )));
        }
        // Reject opaque blobs we cannot serve later
        if self.keypair.decrypt_share(share).is_none() {
            return Err(KeyServerError::Internal(
                "share not encrypted to this server".into(),
            ));
        }
        self.escrow.insert(identity.to_string(), share.clone());
        debug!(server = self.keypair.id, identity, "share escrowed");
        Ok(())
    }

    async fn fetch_share(&self, request: KeyRequest<'_>) -> Result<EncryptedShare, KeyServerError> {
        let payload = request.session.verify()?;
        let access_list = self.validate_approval(&request, payload.address)?;

        let object = self.ledger.get_object(access_list).await.map_err(|err| {
            match err {
                LedgerError::ObjectNotFound(_) => KeyServerError::AccessDenied,
                other => KeyServerError::Ledger(other.to_string()),
            }
        })?;
        let list = match &object.data {
            ObjectData::AccessList(data) => data,
            _ => return Err(KeyServerError::Ledger("object is not an access list".into())),
        };

        if !list.is_member(&payload.address) {
            warn!(
                server = self.keypair.id,
                identity = request.identity,
                "access denied"
            );
            return Err(KeyServerError::AccessDenied);
        }

        let escrowed = self
            .escrow
            .get(request.identity)
            .map(|entry| entry.clone())
            .ok_or(KeyServerError::UnknownIdentity)?;

        let share = self
            .keypair
            .decrypt_share(&escrowed)
            .ok_or_else(|| KeyServerError::Internal("escrowed share undecryptable".into()))?;

        debug!(
            server = self.keypair.id,
            identity = request.identity,
            "share released"
        );
        Ok(EncryptedShare::encrypt(&share, &payload.response_public))
    }
}
