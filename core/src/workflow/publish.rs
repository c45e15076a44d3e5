//! The publish workflow.

use tracing::info;

use crate::error::WorkflowError;
use crate::identity::derive_identity;
use crate::ledger::LedgerClient;
use crate::market;
use crate::progress::{Phase, ProgressReporter};
use crate::signer::TransactionSigner;
use crate::storage::BlobStore;
use crate::storage::flow::WriteBlobFlow;
use crate::types::{BlobId, ObjectId};
use crate::workflow::{EncryptionMetadata, MarketplaceWorkflow};

/// Listing details supplied by the seller
#[derive(Debug, Clone)]
pub struct ListingDetails {
    pub title: String,
    pub description: String,
    pub price: u64,
}

/// Everything needed to publish one dataset
pub struct PublishRequest {
    /// Raw dataset bytes
    pub file: Vec<u8>,
    /// Access list the dataset is published under
    pub access_list_id: ObjectId,
    /// The seller's owner cap for that list
    pub cap_id: ObjectId,
    /// Seller-chosen dataset identifier, unique within the namespace
    pub dataset_id: String,
    pub listing: ListingDetails,
}

/// What a successful publish produced
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub blob_id: BlobId,
    pub listing_id: ObjectId,
    pub metadata: EncryptionMetadata,
}

impl<L: LedgerClient, S: BlobStore> MarketplaceWorkflow<L, S> {
    /// Publish a dataset: encrypt it under the access list namespace,
    /// store it, and create the marketplace listing.
    ///
    /// Every step is fail-fast; an error leaves no listing behind, and
    /// a retry starts from the beginning with a fresh encryption.
    pub async fn publish(
        &self,
        request: PublishRequest,
        signer: &dyn TransactionSigner,
        progress: &ProgressReporter<'_>,
    ) -> Result<PublishOutcome, WorkflowError> {
        let sender = signer.address();
        info!(dataset = %request.dataset_id, bytes = request.file.len(), "publishing dataset");

        // Resolve the namespace: the access list must exist on-chain
        progress.emit(Phase::FetchingNamespace, 0);
        market::get_access_list(self.ledger.as_ref(), request.access_list_id)
            .await
            .map_err(|err| WorkflowError::NamespaceResolution(err.to_string()))?;

        progress.emit(Phase::Encrypting, 10);
        let identity = derive_identity(&request.access_list_id, &request.dataset_id);
        let encrypted = self
            .seal()
            .encrypt(&identity, &request.file)
            .await
            .map_err(|err| WorkflowError::Encryption(err.to_string()))?;
        let envelope_bytes = encrypted
            .object
            .to_bytes()
            .map_err(|err| WorkflowError::Encryption(err.to_string()))?;

        progress.emit(Phase::Encoding, 20);
        let mut flow = WriteBlobFlow::new(self.storage.as_ref(), envelope_bytes);
        let blob_id = flow
            .encode()
            .map_err(|err| WorkflowError::StorageRegister(err.to_string()))?;

        progress.emit(Phase::Registering, 40);
        let tx = flow
            .register_tx(sender, self.storage_epochs, self.deletable)
            .map_err(|err| WorkflowError::StorageRegister(err.to_string()))?;
        let signed = signer
            .sign_transaction(&tx)
            .await
            .map_err(|err| WorkflowError::StorageRegister(err.to_string()))?;
        let effects = self
            .ledger
            .submit_transaction(signed)
            .await
            .map_err(|err| WorkflowError::StorageRegister(err.to_string()))?;
        flow.register_completed(&effects)
            .map_err(|err| WorkflowError::StorageRegister(err.to_string()))?;

        progress.emit(Phase::UploadingShards, 60);
        flow.upload()
            .await
            .map_err(|err| WorkflowError::StorageUpload(err.to_string()))?;

        progress.emit(Phase::Certifying, 80);
        let tx = flow
            .certify_tx(sender)
            .map_err(|err| WorkflowError::StorageCertify(err.to_string()))?;
        let signed = signer
            .sign_transaction(&tx)
            .await
            .map_err(|err| WorkflowError::StorageCertify(err.to_string()))?;
        self.ledger
            .submit_transaction(signed)
            .await
            .map_err(|err| WorkflowError::StorageCertify(err.to_string()))?;
        flow.certify_completed()
            .map_err(|err| WorkflowError::StorageCertify(err.to_string()))?;

        progress.emit(Phase::CreatingListing, 90);
        let metadata = EncryptionMetadata {
            threshold: u64::from(encrypted.object.threshold),
            kem_type: u64::from(encrypted.object.kem_type),
            dem_type: u64::from(encrypted.object.dem_type),
        };
        let tx = market::create_listing_tx(
            sender,
            request.listing.title.clone(),
            request.listing.description.clone(),
            request.access_list_id,
            request.cap_id,
            blob_id,
            request.listing.price,
            metadata.threshold,
            metadata.kem_type,
            metadata.dem_type,
        );
        let signed = signer
            .sign_transaction(&tx)
            .await
            .map_err(|err| WorkflowError::ListingCreation(err.to_string()))?;
        let effects = self
            .ledger
            .submit_transaction(signed)
            .await
            .map_err(|err| WorkflowError::ListingCreation(err.to_string()))?;
        let listing_id = market::extract_listing_id(&effects)
            .map_err(|err| WorkflowError::ListingCreation(err.to_string()))?;

        progress.emit(Phase::Complete, 100);
        info!(blob = %blob_id, listing = %listing_id, "dataset published");

        Ok(PublishOutcome {
            blob_id,
            listing_id,
            metadata,
        })
    }
}
