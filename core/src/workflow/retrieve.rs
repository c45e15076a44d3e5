//! The retrieve workflow.

use tracing::info;

use datamart_threshold::EncryptedObject;

use crate::error::WorkflowError;
use crate::identity::derive_identity;
use crate::ledger::LedgerClient;
use crate::market;
use crate::progress::{Phase, ProgressReporter};
use crate::seal::SealError;
use crate::session::SessionCredential;
use crate::signer::MessageSigner;
use crate::storage::BlobStore;
use crate::types::{BlobId, ObjectId};
use crate::workflow::MarketplaceWorkflow;

/// Everything needed to retrieve one dataset
pub struct RetrieveRequest {
    pub blob_id: BlobId,
    pub access_list_id: ObjectId,
    pub dataset_id: String,
}

impl<L: LedgerClient, S: BlobStore> MarketplaceWorkflow<L, S> {
    /// Retrieve and decrypt a dataset.
    ///
    /// Key shares are fetched before the blob is downloaded, so a
    /// requester without access is turned away without moving any
    /// dataset bytes. One wallet signature covers the whole session.
    pub async fn retrieve(
        &self,
        request: RetrieveRequest,
        signer: &dyn MessageSigner,
        progress: &ProgressReporter<'_>,
    ) -> Result<Vec<u8>, WorkflowError> {
        info!(dataset = %request.dataset_id, blob = %request.blob_id, "retrieving dataset");

        progress.emit(Phase::FetchingNamespace, 5);
        market::get_access_list(self.ledger.as_ref(), request.access_list_id)
            .await
            .map_err(|err| WorkflowError::NamespaceResolution(err.to_string()))?;

        let identity = derive_identity(&request.access_list_id, &request.dataset_id);

        progress.emit(Phase::CreatingSession, 10);
        let mut session = SessionCredential::create(
            signer.address(),
            self.seal().package_id(),
            self.seal().session_ttl_ms(),
        );

        progress.emit(Phase::SigningSession, 15);
        let message = session
            .personal_message()
            .map_err(|err| WorkflowError::SessionCreation(err.to_string()))?;
        let signature = signer
            .sign_message(&message)
            .await
            .map_err(|err| WorkflowError::SessionSignature(err.to_string()))?;
        session
            .attach_signature(signature, signer.public_key())
            .map_err(|err| WorkflowError::SessionSignature(err.to_string()))?;

        // The approval transaction is presented to key servers but
        // never submitted to the ledger.
        progress.emit(Phase::CreatingApproval, 20);
        let approval = market::seal_approve_tx(signer.address(), &identity, request.access_list_id)
            .to_bytes()
            .map_err(|err| WorkflowError::KeyFetch(err.to_string()))?;

        progress.emit(Phase::FetchingKeys, 30);
        let shares = self
            .seal()
            .fetch_keys(&identity, &approval, &session)
            .await
            .map_err(|err| match err {
                SealError::AccessDenied => WorkflowError::AccessDenied,
                SealError::SessionExpired => WorkflowError::SessionExpired,
                other => WorkflowError::KeyFetch(other.to_string()),
            })?;

        progress.emit(Phase::Downloading, 50);
        let envelope_bytes = self
            .storage
            .read_blob(request.blob_id)
            .await
            .map_err(|err| WorkflowError::StorageDownload(err.to_string()))?;

        progress.emit(Phase::Decrypting, 80);
        let object = EncryptedObject::from_bytes(&envelope_bytes)
            .map_err(|err| WorkflowError::Decryption(err.to_string()))?;
        if object.identity != identity.as_bytes() {
            return Err(WorkflowError::Decryption(
                "envelope identity does not match request".into(),
            ));
        }
        let plaintext = self
            .seal()
            .decrypt_with_shares(&object, &shares)
            .map_err(|err| WorkflowError::Decryption(err.to_string()))?;

        progress.emit(Phase::Complete, 100);
        info!(blob = %request.blob_id, bytes = plaintext.len(), "dataset retrieved");

        Ok(plaintext)
    }
}
