//! Datamart Core
//!
//! End-to-end orchestration for the encrypted dataset marketplace:
//! threshold encryption over key share servers, the blob storage write
//! and read flows, the on-chain marketplace objects, and the publish
//! and retrieve workflows that tie them together.

// ============ Primitives ============
pub mod error;
pub mod identity;
pub mod progress;
pub mod types;

// ============ Signing and Sessions ============
pub mod session;
pub mod signer;

// ============ Service Boundaries ============
pub mod ledger;
pub mod market;
pub mod seal;
pub mod storage;

// ============ Workflows ============
pub mod workflow;

pub use error::WorkflowError;
pub use identity::derive_identity;
pub use progress::{Phase, ProgressReporter};
pub use types::{Address, BlobId, ObjectId, TxDigest};

pub use session::{SessionCertificate, SessionCredential, SessionError};
pub use signer::{KeypairSigner, MessageSigner, SignerError, TransactionSigner};

pub use ledger::{LedgerClient, LedgerError};
pub use seal::{SealClient, SealConfig, SealError};
pub use storage::{BlobStore, StorageError};

pub use workflow::{
    EncryptionMetadata, ListingDetails, MarketplaceWorkflow, PublishOutcome, PublishRequest,
    RetrieveRequest,
};
