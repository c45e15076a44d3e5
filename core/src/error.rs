//! Workflow error taxonomy.
//!
//! Every failure surfaced by a publish or retrieve run carries the phase
//! it occurred in, so callers can tell a policy denial from an
//! infrastructure fault without string matching.

use thiserror::Error;

use crate::progress::Phase;

/// Errors from the publish and retrieve workflows
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("namespace resolution failed: {0}")]
    NamespaceResolution(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("blob registration failed: {0}")]
    StorageRegister(String),

    #[error("shard upload failed: {0}")]
    StorageUpload(String),

    #[error("blob certification failed: {0}")]
    StorageCertify(String),

    #[error("listing creation failed: {0}")]
    ListingCreation(String),

    #[error("session creation failed: {0}")]
    SessionCreation(String),

    #[error("session signature rejected: {0}")]
    SessionSignature(String),

    #[error("access denied: requester is not a member of the access list")]
    AccessDenied,

    #[error("key fetch failed: {0}")]
    KeyFetch(String),

    #[error("session expired before key fetch")]
    SessionExpired,

    #[error("blob download failed: {0}")]
    StorageDownload(String),

    #[error("decryption failed: {0}")]
    Decryption(String),
}

impl WorkflowError {
    /// The workflow phase this error belongs to
    pub fn phase(&self) -> Phase {
        match self {
            WorkflowError::NamespaceResolution(_) => Phase::FetchingNamespace,
            WorkflowError::Encryption(_) => Phase::Encrypting,
            WorkflowError::StorageRegister(_) => Phase::Registering,
            WorkflowError::StorageUpload(_) => Phase::UploadingShards,
            WorkflowError::StorageCertify(_) => Phase::Certifying,
            WorkflowError::ListingCreation(_) => Phase::CreatingListing,
            WorkflowError::SessionCreation(_) => Phase::CreatingSession,
            WorkflowError::SessionSignature(_) => Phase::SigningSession,
            WorkflowError::AccessDenied
            | WorkflowError::KeyFetch(_)
            | WorkflowError::SessionExpired => Phase::FetchingKeys,
            WorkflowError::StorageDownload(_) => Phase::Downloading,
            WorkflowError::Decryption(_) => Phase::Decrypting,
        }
    }

    /// True when the failure is a policy decision rather than an
    /// infrastructure fault
    pub fn is_denial(&self) -> bool {
        matches!(self, WorkflowError::AccessDenied)
    }
}
