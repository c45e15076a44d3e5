//! In-memory storage network.
//!
//! Holds slivers in process memory and enforces the same invariants the
//! real network does: uploads require a final registration transaction,
//! and reads are only served for certified blobs whose content still
//! hashes to the registered id.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::ledger::{LedgerClient, ObjectData};
use crate::storage::flow::EncodedBlob;
use crate::storage::{BlobStore, StorageError};
use crate::types::{BlobId, ObjectId, TxDigest};

struct StoredBlob {
    registration: ObjectId,
    slivers: Vec<Vec<u8>>,
    size: u64,
}

/// Process-local blob store backed by a ledger client
pub struct InMemoryStorageNetwork<L> {
    ledger: Arc<L>,
    blobs: DashMap<BlobId, StoredBlob>,
}

impl<L: LedgerClient> InMemoryStorageNetwork<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            blobs: DashMap::new(),
        }
    }

    pub fn stored_count(&self) -> usize {
        self.blobs.len()
    }

    /// Drop slivers of registrations that expired without certification
    pub async fn expire_uncertified(&self, current_epoch: u64) -> usize {
        // Snapshot the candidates first; the ledger lookups must not
        // run while a map shard is locked
        let candidates: Vec<(BlobId, ObjectId)> = self
            .blobs
            .iter()
            .map(|entry| (*entry.key(), entry.registration))
            .collect();

        let mut expired = Vec::new();
        for (blob_id, registration) in candidates {
            let object = match self.ledger.get_object(registration).await {
                Ok(object) => object,
                Err(_) => continue,
            };
            if let ObjectData::BlobRegistration(reg) = &object.data {
                if !reg.certified && current_epoch > reg.registered_epoch.saturating_add(reg.epochs)
                {
                    expired.push(blob_id);
                }
            }
        }
        for blob_id in &expired {
            self.blobs.remove(blob_id);
            debug!(blob = %blob_id, "expired uncertified blob");
        }
        expired.len()
    }
}

#[async_trait]
impl<L: LedgerClient> BlobStore for InMemoryStorageNetwork<L> {
    async fn upload_slivers(
        &self,
        register_digest: TxDigest,
        registration: ObjectId,
        encoded: &EncodedBlob,
    ) -> Result<(), StorageError> {
        // Registration must be final before the network accepts data
        self.ledger
            .wait_for_transaction(register_digest)
            .await
            .map_err(|err| StorageError::Ledger(err.to_string()))?;

        let object = self
            .ledger
            .get_object(registration)
            .await
            .map_err(|_| StorageError::NotRegistered(encoded.blob_id))?;
        match &object.data {
            ObjectData::BlobRegistration(reg) if reg.blob_id == encoded.blob_id => {}
            ObjectData::BlobRegistration(_) => {
                return Err(StorageError::UploadFailed(
                    "registration is for a different blob".into(),
                ));
            }
            _ => return Err(StorageError::NotRegistered(encoded.blob_id)),
        }

        self.blobs.insert(encoded.blob_id, StoredBlob {
            registration,
            slivers: encoded.slivers.clone(),
            size: encoded.size,
        });
        debug!(blob = %encoded.blob_id, slivers = encoded.slivers.len(), "slivers stored");
        Ok(())
    }

    async fn read_blob(&self, blob_id: BlobId) -> Result<Vec<u8>, StorageError> {
        let (registration, bytes) = {
            let stored = self
                .blobs
                .get(&blob_id)
                .ok_or(StorageError::UnknownBlob(blob_id))?;
            let mut bytes = Vec::with_capacity(stored.size as usize);
            for sliver in &stored.slivers {
                bytes.extend_from_slice(sliver);
            }
            (stored.registration, bytes)
        };

        let object = self
            .ledger
            .get_object(registration)
            .await
            .map_err(|_| StorageError::NotRegistered(blob_id))?;
        match &object.data {
            ObjectData::BlobRegistration(reg) if !reg.certified => {
                return Err(StorageError::NotCertified(blob_id));
            }
            ObjectData::BlobRegistration(reg) if reg.blob_id != blob_id => {
                return Err(StorageError::NotRegistered(blob_id));
            }
            ObjectData::BlobRegistration(_) => {}
            _ => return Err(StorageError::NotRegistered(blob_id)),
        }

        // Content check against the registered id
        if BlobId(*blake3::hash(&bytes).as_bytes()) != blob_id {
            return Err(StorageError::DownloadFailed("content hash mismatch".into()));
        }
        Ok(bytes)
    }
}
