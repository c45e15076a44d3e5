//! Threshold Encryption Service client.
//!
//! Orchestrates the K-of-N key flow over a set of key share servers:
//! on encrypt, a fresh dataset encryption key is split and each share is
//! escrowed with its server; on fetch, servers release their shares to a
//! verified session and the client recombines them. Access control is
//! the servers' decision; this client only transports shares.

pub mod key_server;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use datamart_config::DatamartConfig;
use datamart_threshold::{
    EncryptedObject, EncryptedShare, KeyServerSet, Share, combine_shares, open_envelope,
    random_secret, seal_envelope, split_secret,
};

use crate::seal::key_server::{KeyRequest, KeyServerError, KeyShareServer};
use crate::session::SessionCredential;
use crate::types::ObjectId;

/// Seal client errors
#[derive(Debug, Error)]
pub enum SealError {
    #[error("access denied")]
    AccessDenied,

    #[error("session expired")]
    SessionExpired,

    #[error("key fetch failed: {0}")]
    KeyFetch(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid seal configuration: {0}")]
    Config(String),
}

/// Seal parameters, usually sourced from [`DatamartConfig`]
#[derive(Debug, Clone)]
pub struct SealConfig {
    /// Package the access policies live under
    pub package_id: [u8; 32],
    /// Threshold K
    pub threshold: u8,
    /// Session lifetime in milliseconds
    pub session_ttl_ms: u64,
    /// Per-server timeout for escrow and fetch
    pub request_timeout: Duration,
}

impl SealConfig {
    pub fn from_settings(settings: &DatamartConfig) -> Result<Self, SealError> {
        let package_id: ObjectId = settings
            .ledger
            .package_id
            .parse()
            .map_err(|err| SealError::Config(format!("bad package id: {err}")))?;
        let threshold = u8::try_from(settings.seal.threshold_k)
            .map_err(|_| SealError::Config("threshold exceeds 255".into()))?;
        Ok(Self {
            package_id: package_id.0,
            threshold,
            session_ttl_ms: settings.seal.session_ttl_min * 60_000,
            request_timeout: Duration::from_millis(settings.seal.key_request_timeout_ms),
        })
    }
}

/// Result of threshold-encrypting a dataset
pub struct EncryptResult {
    /// The envelope to store in the blob network
    pub object: EncryptedObject,
    /// The raw dataset encryption key, for seller-side disaster
    /// recovery. Discard unless a backup is wanted.
    pub backup_key: [u8; 32],
}

/// Client for the threshold encryption service
pub struct SealClient {
    servers: Vec<Arc<dyn KeyShareServer>>,
    set: KeyServerSet,
    config: SealConfig,
}

impl SealClient {
    pub fn new(servers: Vec<Arc<dyn KeyShareServer>>, config: SealConfig) -> Result<Self, SealError> {
        if config.threshold == 0 || (config.threshold as usize) > servers.len() {
            return Err(SealError::Config(format!(
                "threshold {} with {} servers",
                config.threshold,
                servers.len()
            )));
        }
        let infos = servers.iter().map(|server| server.info()).collect();
        let set = KeyServerSet::new(config.threshold as usize, infos);
        Ok(Self {
            servers,
            set,
            config,
        })
    }

    pub fn threshold(&self) -> u8 {
        self.config.threshold
    }

    pub fn total_servers(&self) -> usize {
        self.set.total()
    }

    /// The roster of server descriptors the client escrows against
    pub fn server_set(&self) -> &KeyServerSet {
        &self.set
    }

    pub fn session_ttl_ms(&self) -> u64 {
        self.config.session_ttl_ms
    }

    pub fn package_id(&self) -> [u8; 32] {
        self.config.package_id
    }

    /// Threshold-encrypt a dataset under an identity and escrow the key
    /// shares with the key servers. All N escrows must succeed; a
    /// partially escrowed key could fall below the reconstruction
    /// threshold later.
    pub async fn encrypt(&self, identity: &str, data: &[u8]) -> Result<EncryptResult, SealError> {
        let dek = random_secret();
        let shares = split_secret(&dek, self.config.threshold as usize, self.servers.len())
            .map_err(|err| SealError::Encryption(err.to_string()))?;

        let object = seal_envelope(
            &dek,
            self.config.package_id,
            identity.as_bytes(),
            self.config.threshold,
            data,
        )
        .map_err(|err| SealError::Encryption(err.to_string()))?;

        for server in &self.servers {
            let info = server.info();
            let share = shares
                .iter()
                .find(|s| s.id == info.id)
                .ok_or_else(|| SealError::Encryption(format!("no share for server {}", info.id)))?;
            let escrowed = EncryptedShare::encrypt(share, &info.public_key);

            timeout(
                self.config.request_timeout,
                server.store_share(identity, &escrowed),
            )
            .await
            .map_err(|_| SealError::Encryption(format!("escrow to server {} timed out", info.id)))?
            .map_err(|err| SealError::Encryption(format!("escrow to server {}: {err}", info.id)))?;
        }

        debug!(
            identity,
            threshold = self.config.threshold,
            servers = self.servers.len(),
            "dataset key escrowed"
        );
        Ok(EncryptResult {
            object,
            backup_key: dek,
        })
    }

    /// Fetch key shares for an identity.
    ///
    /// Servers are asked in order until K shares are collected. A
    /// single AccessDenied is authoritative and aborts the fetch; other
    /// per-server failures (timeouts, unknown identity) are tolerated
    /// as long as K servers respond.
    pub async fn fetch_keys(
        &self,
        identity: &str,
        approval_tx_bytes: &[u8],
        session: &SessionCredential,
    ) -> Result<Vec<Share>, SealError> {
        if session.is_expired() {
            return Err(SealError::SessionExpired);
        }
        let cert = session
            .certificate()
            .map_err(|err| SealError::KeyFetch(err.to_string()))?;

        let need = self.config.threshold as usize;
        let mut shares: Vec<Share> = Vec::with_capacity(need);
        let mut failures: Vec<String> = Vec::new();

        for server in &self.servers {
            if self.set.can_reconstruct(&shares) {
                break;
            }
            let info = server.info();
            let request = KeyRequest {
                identity,
                approval_tx_bytes,
                session: &cert,
            };

            match timeout(self.config.request_timeout, server.fetch_share(request)).await {
                Ok(Ok(delivered)) => match session.decrypt_share(&delivered) {
                    Some(share) => shares.push(share),
                    None => {
                        warn!(server = info.id, "undecryptable share delivery");
                        failures.push(format!("server {}: undecryptable delivery", info.id));
                    }
                },
                Ok(Err(KeyServerError::AccessDenied)) => return Err(SealError::AccessDenied),
                Ok(Err(KeyServerError::SessionExpired)) => return Err(SealError::SessionExpired),
                Ok(Err(err)) => {
                    warn!(server = info.id, error = %err, "key fetch failed");
                    failures.push(format!("server {}: {err}", info.id));
                }
                Err(_) => {
                    warn!(server = info.id, "key fetch timed out");
                    failures.push(format!("server {}: timeout", info.id));
                }
            }
        }

        if !self.set.can_reconstruct(&shares) {
            return Err(SealError::KeyFetch(format!(
                "collected {} of {} shares ({})",
                shares.len(),
                need,
                failures.join("; ")
            )));
        }
        Ok(shares)
    }

    /// Recombine shares and open an envelope
    pub fn decrypt_with_shares(
        &self,
        object: &EncryptedObject,
        shares: &[Share],
    ) -> Result<Vec<u8>, SealError> {
        let dek = combine_shares(shares, object.threshold as usize)
            .map_err(|err| SealError::Decryption(err.to_string()))?;
        open_envelope(object, &dek).map_err(|err| SealError::Decryption(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::market;
    use crate::session::SessionCredential;
    use crate::signer::{KeypairSigner, MessageSigner};
    use datamart_threshold::KeyServerKeypair;

    use super::key_server::LocalKeyServer;

    fn test_config(package_id: [u8; 32]) -> SealConfig {
        SealConfig {
            package_id,
            threshold: 2,
            session_ttl_ms: 60_000,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn local_servers(ledger: &Arc<InMemoryLedger>, n: u8) -> Vec<Arc<dyn KeyShareServer>> {
        (1..=n)
            .map(|id| {
                Arc::new(LocalKeyServer::new(
                    KeyServerKeypair::generate(id),
                    ledger.clone(),
                )) as Arc<dyn KeyShareServer>
            })
            .collect()
    }

    async fn signed_session(signer: &KeypairSigner, package_id: [u8; 32]) -> SessionCredential {
        let mut session = SessionCredential::create(signer.address(), package_id, 60_000);
        let message = session.personal_message().unwrap();
        let sig = signer.sign_message(&message).await.unwrap();
        session
            .attach_signature(sig, signer.public_key_bytes())
            .unwrap();
        session
    }

    #[tokio::test]
    async fn encrypt_fetch_decrypt_roundtrip() {
        let ledger = Arc::new(InMemoryLedger::new());
        let owner = KeypairSigner::generate();
        let created = market::create_access_list(ledger.as_ref(), &owner, "team")
            .await
            .unwrap();

        let package_id = [7u8; 32];
        let client = SealClient::new(local_servers(&ledger, 3), test_config(package_id)).unwrap();

        let identity = format!("{}::ds-1", hex::encode(created.access_list_id.0));
        let result = client.encrypt(&identity, b"sensor readings").await.unwrap();
        assert_eq!(result.object.threshold, 2);

        let session = signed_session(&owner, package_id).await;
        let approval = market::seal_approve_tx(owner.address(), &identity, created.access_list_id)
            .to_bytes()
            .unwrap();

        let shares = client.fetch_keys(&identity, &approval, &session).await.unwrap();
        assert_eq!(shares.len(), 2);

        let plaintext = client.decrypt_with_shares(&result.object, &shares).unwrap();
        assert_eq!(plaintext, b"sensor readings");
    }

    #[tokio::test]
    async fn backup_key_opens_envelope_directly() {
        let ledger = Arc::new(InMemoryLedger::new());
        let client = SealClient::new(local_servers(&ledger, 3), test_config([7u8; 32])).unwrap();

        let result = client.encrypt("aa::ds", b"payload").await.unwrap();
        let plaintext = open_envelope(&result.object, &result.backup_key).unwrap();
        assert_eq!(plaintext, b"payload");
    }

    #[tokio::test]
    async fn non_member_denied() {
        let ledger = Arc::new(InMemoryLedger::new());
        let owner = KeypairSigner::generate();
        let outsider = KeypairSigner::generate();
        let created = market::create_access_list(ledger.as_ref(), &owner, "team")
            .await
            .unwrap();

        let package_id = [7u8; 32];
        let client = SealClient::new(local_servers(&ledger, 3), test_config(package_id)).unwrap();

        let identity = format!("{}::ds-1", hex::encode(created.access_list_id.0));
        client.encrypt(&identity, b"secret").await.unwrap();

        let session = signed_session(&outsider, package_id).await;
        let approval =
            market::seal_approve_tx(outsider.address(), &identity, created.access_list_id)
                .to_bytes()
                .unwrap();

        let denied = client.fetch_keys(&identity, &approval, &session).await;
        assert!(matches!(denied, Err(SealError::AccessDenied)));
    }

    #[tokio::test]
    async fn server_set_tracks_the_roster() {
        let ledger = Arc::new(InMemoryLedger::new());
        let client = SealClient::new(local_servers(&ledger, 3), test_config([7u8; 32])).unwrap();

        let set = client.server_set();
        assert_eq!(set.total(), 3);
        assert_eq!(set.threshold, 2);
        assert!(set.server(2).is_some());
        assert!(set.server(9).is_none());
    }

    #[tokio::test]
    async fn invalid_threshold_config_rejected() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut config = test_config([7u8; 32]);
        config.threshold = 4;
        assert!(matches!(
            SealClient::new(local_servers(&ledger, 3), config),
            Err(SealError::Config(_))
        ));
    }
}
