//! Blob encoding and the write flow.
//!
//! [`WriteBlobFlow`] is a state machine over the storage protocol's
//! write path. Each ledger step hands back an unsigned transaction for
//! the caller to sign and submit, keeping key material out of the flow.

use crate::ledger::{Command, Owner, Transaction, TransactionEffects};
use crate::storage::{BlobStore, StorageError};
use crate::types::{Address, BlobId, ObjectId, TxDigest};

/// Sliver size in bytes
pub const SLIVER_SIZE: usize = 4096;

/// A blob encoded for upload
#[derive(Debug, Clone)]
pub struct EncodedBlob {
    /// Content id: BLAKE3 over the unencoded bytes
    pub blob_id: BlobId,
    /// Unencoded size in bytes
    pub size: u64,
    /// Fixed-size slivers (last one may be short)
    pub slivers: Vec<Vec<u8>>,
}

impl EncodedBlob {
    /// Reassemble the original bytes
    pub fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size as usize);
        for sliver in &self.slivers {
            out.extend_from_slice(sliver);
        }
        out
    }
}

/// Encode bytes into slivers and derive the content id
pub fn encode_blob(bytes: &[u8]) -> EncodedBlob {
    let blob_id = BlobId(*blake3::hash(bytes).as_bytes());
    let slivers = if bytes.is_empty() {
        Vec::new()
    } else {
        bytes.chunks(SLIVER_SIZE).map(|c| c.to_vec()).collect()
    };
    EncodedBlob {
        blob_id,
        size: bytes.len() as u64,
        slivers,
    }
}

enum FlowState {
    Created { data: Vec<u8> },
    Encoded { encoded: EncodedBlob },
    Registered {
        encoded: EncodedBlob,
        digest: TxDigest,
        registration: ObjectId,
    },
    Uploaded {
        blob_id: BlobId,
        registration: ObjectId,
    },
    Certified { blob_id: BlobId },
    // Transient marker while a transition is in progress
    Poisoned,
}

/// Write path state machine: encode → register → upload → certify
pub struct WriteBlobFlow<'a, S: BlobStore + ?Sized> {
    store: &'a S,
    state: FlowState,
}

impl<'a, S: BlobStore + ?Sized> WriteBlobFlow<'a, S> {
    pub fn new(store: &'a S, data: Vec<u8>) -> Self {
        Self {
            store,
            state: FlowState::Created { data },
        }
    }

    /// Encode the blob and return its content id
    pub fn encode(&mut self) -> Result<BlobId, StorageError> {
        match std::mem::replace(&mut self.state, FlowState::Poisoned) {
            FlowState::Created { data } => {
                let encoded = encode_blob(&data);
                let blob_id = encoded.blob_id;
                self.state = FlowState::Encoded { encoded };
                Ok(blob_id)
            }
            state => {
                self.state = state;
                Err(StorageError::FlowOrder("encode requires a fresh flow"))
            }
        }
    }

    /// The registration transaction to sign and submit
    pub fn register_tx(
        &self,
        sender: Address,
        epochs: u64,
        deletable: bool,
    ) -> Result<Transaction, StorageError> {
        match &self.state {
            FlowState::Encoded { encoded } => Ok(Transaction::new(sender, vec![
                Command::RegisterBlob {
                    blob_id: encoded.blob_id,
                    size: encoded.size,
                    epochs,
                    deletable,
                },
            ])),
            _ => Err(StorageError::FlowOrder("register requires an encoded blob")),
        }
    }

    /// Record the registration effects (digest + registration object)
    pub fn register_completed(
        &mut self,
        effects: &TransactionEffects,
    ) -> Result<(), StorageError> {
        match std::mem::replace(&mut self.state, FlowState::Poisoned) {
            FlowState::Encoded { encoded } => {
                let registration = effects
                    .created
                    .iter()
                    .find(|c| matches!(c.owner, Owner::Address(_)))
                    .map(|c| c.object_id)
                    .ok_or(StorageError::NotRegistered(encoded.blob_id));
                match registration {
                    Ok(registration) => {
                        self.state = FlowState::Registered {
                            encoded,
                            digest: effects.digest,
                            registration,
                        };
                        Ok(())
                    }
                    Err(err) => {
                        self.state = FlowState::Encoded { encoded };
                        Err(err)
                    }
                }
            }
            state => {
                self.state = state;
                Err(StorageError::FlowOrder(
                    "register_completed requires an encoded blob",
                ))
            }
        }
    }

    /// Upload the slivers to the storage network
    pub async fn upload(&mut self) -> Result<(), StorageError> {
        match std::mem::replace(&mut self.state, FlowState::Poisoned) {
            FlowState::Registered {
                encoded,
                digest,
                registration,
            } => {
                match self
                    .store
                    .upload_slivers(digest, registration, &encoded)
                    .await
                {
                    Ok(()) => {
                        self.state = FlowState::Uploaded {
                            blob_id: encoded.blob_id,
                            registration,
                        };
                        Ok(())
                    }
                    Err(err) => {
                        self.state = FlowState::Registered {
                            encoded,
                            digest,
                            registration,
                        };
                        Err(err)
                    }
                }
            }
            state => {
                self.state = state;
                Err(StorageError::FlowOrder("upload requires a registered blob"))
            }
        }
    }

    /// The certification transaction to sign and submit
    pub fn certify_tx(&self, sender: Address) -> Result<Transaction, StorageError> {
        match &self.state {
            FlowState::Uploaded { registration, .. } => Ok(Transaction::new(sender, vec![
                Command::CertifyBlob {
                    registration: *registration,
                },
            ])),
            _ => Err(StorageError::FlowOrder("certify requires an uploaded blob")),
        }
    }

    /// Record certification
    pub fn certify_completed(&mut self) -> Result<BlobId, StorageError> {
        match std::mem::replace(&mut self.state, FlowState::Poisoned) {
            FlowState::Uploaded { blob_id, .. } => {
                self.state = FlowState::Certified { blob_id };
                Ok(blob_id)
            }
            state => {
                self.state = state;
                Err(StorageError::FlowOrder(
                    "certify_completed requires an uploaded blob",
                ))
            }
        }
    }

    /// The content id, once known
    pub fn blob_id(&self) -> Option<BlobId> {
        match &self.state {
            FlowState::Created { .. } | FlowState::Poisoned => None,
            FlowState::Encoded { encoded } => Some(encoded.blob_id),
            FlowState::Registered { encoded, .. } => Some(encoded.blob_id),
            FlowState::Uploaded { blob_id, .. } => Some(*blob_id),
            FlowState::Certified { blob_id } => Some(*blob_id),
        }
    }
}
