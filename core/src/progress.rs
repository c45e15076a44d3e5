//! Workflow progress reporting.
//!
//! Both workflows emit (phase, percent) pairs through an optional
//! caller-supplied callback. Percentages are monotonically increasing
//! within a run; a failed run simply stops emitting.

use tracing::debug;

/// A stage of the publish or retrieve workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    // Publish
    FetchingNamespace,
    Encrypting,
    Encoding,
    Registering,
    UploadingShards,
    Certifying,
    CreatingListing,
    // Retrieve
    CreatingSession,
    SigningSession,
    CreatingApproval,
    FetchingKeys,
    Downloading,
    Decrypting,
    // Shared
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FetchingNamespace => "fetching-namespace",
            Phase::Encrypting => "encrypting",
            Phase::Encoding => "encoding",
            Phase::Registering => "registering",
            Phase::UploadingShards => "uploading-shards",
            Phase::Certifying => "certifying",
            Phase::CreatingListing => "creating-listing",
            Phase::CreatingSession => "creating-session",
            Phase::SigningSession => "signing-session",
            Phase::CreatingApproval => "creating-approval",
            Phase::FetchingKeys => "fetching-keys",
            Phase::Downloading => "downloading",
            Phase::Decrypting => "decrypting",
            Phase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan-out point for progress updates
pub struct ProgressReporter<'a> {
    callback: Option<&'a (dyn Fn(Phase, u8) + Send + Sync)>,
}

impl<'a> ProgressReporter<'a> {
    /// Reporter that only logs
    pub fn none() -> Self {
        Self { callback: None }
    }

    /// Reporter forwarding to a caller callback
    pub fn new(callback: &'a (dyn Fn(Phase, u8) + Send + Sync)) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// Emit a progress update
    pub fn emit(&self, phase: Phase, percent: u8) {
        debug!(phase = %phase, percent, "workflow progress");
        if let Some(callback) = self.callback {
            callback(phase, percent);
        }
    }
}
