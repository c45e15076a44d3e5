//! Publish and retrieve workflows.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Marketplace Workflows                        │
//! │                                                                  │
//! │  Publish:  namespace → encrypt → encode → register → upload      │
//! │            → certify → listing                                   │
//! │                                                                  │
//! │  Retrieve: namespace → session → approval → key fetch            │
//! │            → download → decrypt                                  │
//! │                                                                  │
//! │  Access is decided at key fetch: a non-member is denied before   │
//! │  a single blob byte is downloaded.                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod publish;
mod retrieve;

use std::sync::Arc;

use crate::ledger::LedgerClient;
use crate::seal::SealClient;
use crate::storage::BlobStore;

pub use publish::{ListingDetails, PublishOutcome, PublishRequest};
pub use retrieve::RetrieveRequest;

/// Encryption parameters recorded on a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionMetadata {
    pub threshold: u64,
    pub kem_type: u64,
    pub dem_type: u64,
}

/// The end-to-end orchestrator over the ledger, the storage network,
/// and the threshold encryption service
pub struct MarketplaceWorkflow<L, S> {
    ledger: Arc<L>,
    storage: Arc<S>,
    seal: SealClient,
    storage_epochs: u64,
    deletable: bool,
}

impl<L: LedgerClient, S: BlobStore> MarketplaceWorkflow<L, S> {
    pub fn new(
        ledger: Arc<L>,
        storage: Arc<S>,
        seal: SealClient,
        storage_epochs: u64,
        deletable: bool,
    ) -> Self {
        Self {
            ledger,
            storage,
            seal,
            storage_epochs,
            deletable,
        }
    }

    pub fn seal(&self) -> &SealClient {
        &self.seal
    }
}
