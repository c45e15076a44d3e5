//! Blob Storage Network boundary.
//!
//! Blobs follow a register → upload → certify flow: registration puts
//! the blob's metadata on the ledger, upload moves the encoded slivers
//! into the network, and certification marks the blob durable. Reads
//! are only served for certified blobs.

pub mod flow;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{BlobId, ObjectId, TxDigest};
use self::flow::EncodedBlob;

/// Storage network errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob {0} is not registered")]
    NotRegistered(BlobId),

    #[error("blob {0} is not certified")]
    NotCertified(BlobId),

    #[error("blob {0} is unknown to this network")]
    UnknownBlob(BlobId),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("write flow out of order: {0}")]
    FlowOrder(&'static str),

    #[error("ledger error: {0}")]
    Ledger(String),
}

/// Async boundary to the storage network
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the slivers of a registered blob. The registration
    /// transaction must already be final on the ledger.
    async fn upload_slivers(
        &self,
        register_digest: TxDigest,
        registration: ObjectId,
        encoded: &EncodedBlob,
    ) -> Result<(), StorageError>;

    /// Read back a certified blob by id
    async fn read_blob(&self, blob_id: BlobId) -> Result<Vec<u8>, StorageError>;
}
