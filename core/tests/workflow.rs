//! End-to-end workflow tests over the in-memory ledger, storage
//! network, and key servers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use datamart_core::ledger::memory::InMemoryLedger;
use datamart_core::market;
use datamart_core::seal::key_server::{KeyShareServer, LocalKeyServer};
use datamart_core::seal::{SealClient, SealConfig};
use datamart_core::storage::flow::EncodedBlob;
use datamart_core::storage::memory::InMemoryStorageNetwork;
use datamart_core::storage::{BlobStore, StorageError};
use datamart_core::{
    Address, BlobId, KeypairSigner, ListingDetails, MarketplaceWorkflow, MessageSigner, ObjectId,
    Phase, ProgressReporter, PublishRequest, RetrieveRequest, SignerError, TxDigest,
    WorkflowError,
};
use datamart_threshold::KeyServerKeypair;

const PACKAGE_ID: [u8; 32] = [0x11; 32];

fn seal_config(session_ttl_ms: u64) -> SealConfig {
    SealConfig {
        package_id: PACKAGE_ID,
        threshold: 2,
        session_ttl_ms,
        request_timeout: Duration::from_secs(5),
    }
}

fn key_servers(ledger: &Arc<InMemoryLedger>) -> Vec<Arc<dyn KeyShareServer>> {
    (1..=3)
        .map(|id| {
            Arc::new(LocalKeyServer::new(
                KeyServerKeypair::generate(id),
                ledger.clone(),
            )) as Arc<dyn KeyShareServer>
        })
        .collect()
}

fn workflow_with<S: BlobStore>(
    ledger: &Arc<InMemoryLedger>,
    storage: Arc<S>,
    session_ttl_ms: u64,
) -> MarketplaceWorkflow<InMemoryLedger, S> {
    let seal = SealClient::new(key_servers(ledger), seal_config(session_ttl_ms)).unwrap();
    MarketplaceWorkflow::new(ledger.clone(), storage, seal, 100, false)
}

fn publish_request(access_list_id: ObjectId, cap_id: ObjectId, data: &[u8]) -> PublishRequest {
    PublishRequest {
        file: data.to_vec(),
        access_list_id,
        cap_id,
        dataset_id: "weather-2025".into(),
        listing: ListingDetails {
            title: "Hourly weather".into(),
            description: "One year of hourly readings".into(),
            price: 250,
        },
    }
}

/// Storage wrapper whose uploads can be made to fail
struct FlakyStore {
    inner: InMemoryStorageNetwork<InMemoryLedger>,
    fail_uploads: AtomicBool,
}

impl FlakyStore {
    fn new(ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            inner: InMemoryStorageNetwork::new(ledger),
            fail_uploads: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn upload_slivers(
        &self,
        register_digest: TxDigest,
        registration: ObjectId,
        encoded: &EncodedBlob,
    ) -> Result<(), StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("injected fault".into()));
        }
        self.inner
            .upload_slivers(register_digest, registration, encoded)
            .await
    }

    async fn read_blob(&self, blob_id: BlobId) -> Result<Vec<u8>, StorageError> {
        self.inner.read_blob(blob_id).await
    }
}

/// A wallet that refuses to sign personal messages
struct DecliningSigner {
    inner: KeypairSigner,
}

#[async_trait]
impl MessageSigner for DecliningSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn public_key(&self) -> [u8; 32] {
        self.inner.public_key_bytes()
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::Declined("user rejected the request".into()))
    }
}

#[tokio::test]
async fn publish_then_retrieve_roundtrip() {
    let ledger = Arc::new(InMemoryLedger::new());
    let storage = Arc::new(InMemoryStorageNetwork::new(ledger.clone()));
    let workflow = workflow_with(&ledger, storage, 60_000);

    let seller = KeypairSigner::generate();
    let buyer = KeypairSigner::generate();

    let created = market::create_access_list(ledger.as_ref(), &seller, "research")
        .await
        .unwrap();

    let data = vec![0x5au8; 20_000];
    let outcome = workflow
        .publish(
            publish_request(created.access_list_id, created.cap_id, &data),
            &seller,
            &ProgressReporter::none(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.metadata.threshold, 2);
    assert_eq!(outcome.metadata.kem_type, 0);
    assert_eq!(outcome.metadata.dem_type, 0);

    // The listing records the same parameters
    let listing = market::get_listing(ledger.as_ref(), outcome.listing_id)
        .await
        .unwrap();
    assert_eq!(listing.blob_id, outcome.blob_id);
    assert_eq!(listing.seal_threshold, 2);
    assert_eq!(listing.price, 250);

    market::grant_access(
        ledger.as_ref(),
        &seller,
        created.access_list_id,
        created.cap_id,
        buyer.address(),
    )
    .await
    .unwrap();

    let plaintext = workflow
        .retrieve(
            RetrieveRequest {
                blob_id: outcome.blob_id,
                access_list_id: created.access_list_id,
                dataset_id: "weather-2025".into(),
            },
            &buyer,
            &ProgressReporter::none(),
        )
        .await
        .unwrap();

    assert_eq!(plaintext, data);
}

#[tokio::test]
async fn non_member_denied_before_download() {
    let ledger = Arc::new(InMemoryLedger::new());
    let storage = Arc::new(InMemoryStorageNetwork::new(ledger.clone()));
    let workflow = workflow_with(&ledger, storage, 60_000);

    let seller = KeypairSigner::generate();
    let outsider = KeypairSigner::generate();

    let created = market::create_access_list(ledger.as_ref(), &seller, "research")
        .await
        .unwrap();

    let outcome = workflow
        .publish(
            publish_request(created.access_list_id, created.cap_id, b"confidential"),
            &seller,
            &ProgressReporter::none(),
        )
        .await
        .unwrap();

    let phases: Mutex<Vec<Phase>> = Mutex::new(Vec::new());
    let callback = |phase: Phase, _percent: u8| {
        phases.lock().unwrap().push(phase);
    };

    let denied = workflow
        .retrieve(
            RetrieveRequest {
                blob_id: outcome.blob_id,
                access_list_id: created.access_list_id,
                dataset_id: "weather-2025".into(),
            },
            &outsider,
            &ProgressReporter::new(&callback),
        )
        .await;

    assert!(matches!(denied, Err(WorkflowError::AccessDenied)));

    // Denial happens at key fetch; no download phase was reached
    let phases = phases.lock().unwrap();
    assert!(phases.contains(&Phase::FetchingKeys));
    assert!(!phases.contains(&Phase::Downloading));
}

#[tokio::test]
async fn failed_upload_leaves_no_listing_and_retry_succeeds() {
    let ledger = Arc::new(InMemoryLedger::new());
    let storage = Arc::new(FlakyStore::new(ledger.clone()));
    let workflow = workflow_with(&ledger, storage.clone(), 60_000);

    let seller = KeypairSigner::generate();
    let created = market::create_access_list(ledger.as_ref(), &seller, "research")
        .await
        .unwrap();

    storage.fail_uploads.store(true, Ordering::SeqCst);
    let failed = workflow
        .publish(
            publish_request(created.access_list_id, created.cap_id, b"dataset"),
            &seller,
            &ProgressReporter::none(),
        )
        .await;

    match failed {
        Err(WorkflowError::StorageUpload(_)) => {}
        other => panic!("expected upload failure, got {other:?}"),
    }

    // Nothing was listed for the failed publish
    let published = market::published_datasets(ledger.as_ref()).await.unwrap();
    assert!(published.is_empty());

    // A fresh attempt goes through end to end
    storage.fail_uploads.store(false, Ordering::SeqCst);
    let outcome = workflow
        .publish(
            publish_request(created.access_list_id, created.cap_id, b"dataset"),
            &seller,
            &ProgressReporter::none(),
        )
        .await
        .unwrap();

    let published = market::published_datasets(ledger.as_ref()).await.unwrap();
    assert_eq!(published.len(), 1);

    let plaintext = workflow
        .retrieve(
            RetrieveRequest {
                blob_id: outcome.blob_id,
                access_list_id: created.access_list_id,
                dataset_id: "weather-2025".into(),
            },
            &seller,
            &ProgressReporter::none(),
        )
        .await
        .unwrap();
    assert_eq!(plaintext, b"dataset");
}

#[tokio::test]
async fn progress_is_monotonic_on_success() {
    let ledger = Arc::new(InMemoryLedger::new());
    let storage = Arc::new(InMemoryStorageNetwork::new(ledger.clone()));
    let workflow = workflow_with(&ledger, storage, 60_000);

    let seller = KeypairSigner::generate();
    let created = market::create_access_list(ledger.as_ref(), &seller, "research")
        .await
        .unwrap();

    let updates: Mutex<Vec<(Phase, u8)>> = Mutex::new(Vec::new());
    let callback = |phase: Phase, percent: u8| {
        updates.lock().unwrap().push((phase, percent));
    };

    let outcome = workflow
        .publish(
            publish_request(created.access_list_id, created.cap_id, b"data"),
            &seller,
            &ProgressReporter::new(&callback),
        )
        .await
        .unwrap();

    {
        let updates = updates.lock().unwrap();
        assert_eq!(updates.first().map(|u| u.1), Some(0));
        assert_eq!(updates.last(), Some(&(Phase::Complete, 100)));
        assert!(updates.windows(2).all(|w| w[0].1 < w[1].1));
    }

    updates.lock().unwrap().clear();

    workflow
        .retrieve(
            RetrieveRequest {
                blob_id: outcome.blob_id,
                access_list_id: created.access_list_id,
                dataset_id: "weather-2025".into(),
            },
            &seller,
            &ProgressReporter::new(&callback),
        )
        .await
        .unwrap();

    let updates = updates.lock().unwrap();
    assert_eq!(updates.last(), Some(&(Phase::Complete, 100)));
    assert!(updates.windows(2).all(|w| w[0].1 < w[1].1));
}

#[tokio::test]
async fn expired_session_rejected() {
    let ledger = Arc::new(InMemoryLedger::new());
    let storage = Arc::new(InMemoryStorageNetwork::new(ledger.clone()));

    // TTL of zero: the session is expired the moment it is created
    let workflow = workflow_with(&ledger, storage, 0);

    let seller = KeypairSigner::generate();
    let created = market::create_access_list(ledger.as_ref(), &seller, "research")
        .await
        .unwrap();

    let outcome = {
        // Publish with a sane workflow; only retrieval uses the TTL
        let storage = Arc::new(InMemoryStorageNetwork::new(ledger.clone()));
        let publisher = workflow_with(&ledger, storage, 60_000);
        publisher
            .publish(
                publish_request(created.access_list_id, created.cap_id, b"data"),
                &seller,
                &ProgressReporter::none(),
            )
            .await
            .unwrap()
    };

    let denied = workflow
        .retrieve(
            RetrieveRequest {
                blob_id: outcome.blob_id,
                access_list_id: created.access_list_id,
                dataset_id: "weather-2025".into(),
            },
            &seller,
            &ProgressReporter::none(),
        )
        .await;

    assert!(matches!(denied, Err(WorkflowError::SessionExpired)));
}

#[tokio::test]
async fn declined_signature_fails_session_phase() {
    let ledger = Arc::new(InMemoryLedger::new());
    let storage = Arc::new(InMemoryStorageNetwork::new(ledger.clone()));
    let workflow = workflow_with(&ledger, storage, 60_000);

    let seller = KeypairSigner::generate();
    let created = market::create_access_list(ledger.as_ref(), &seller, "research")
        .await
        .unwrap();

    let outcome = workflow
        .publish(
            publish_request(created.access_list_id, created.cap_id, b"data"),
            &seller,
            &ProgressReporter::none(),
        )
        .await
        .unwrap();

    let decliner = DecliningSigner {
        inner: KeypairSigner::generate(),
    };

    let denied = workflow
        .retrieve(
            RetrieveRequest {
                blob_id: outcome.blob_id,
                access_list_id: created.access_list_id,
                dataset_id: "weather-2025".into(),
            },
            &decliner,
            &ProgressReporter::none(),
        )
        .await;

    match denied {
        Err(err @ WorkflowError::SessionSignature(_)) => {
            assert_eq!(err.phase(), Phase::SigningSession);
        }
        other => panic!("expected session signature failure, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_dataset_id_cannot_decrypt() {
    let ledger = Arc::new(InMemoryLedger::new());
    let storage = Arc::new(InMemoryStorageNetwork::new(ledger.clone()));
    let workflow = workflow_with(&ledger, storage, 60_000);

    let seller = KeypairSigner::generate();
    let created = market::create_access_list(ledger.as_ref(), &seller, "research")
        .await
        .unwrap();

    let outcome = workflow
        .publish(
            publish_request(created.access_list_id, created.cap_id, b"data"),
            &seller,
            &ProgressReporter::none(),
        )
        .await
        .unwrap();

    // A member asking under the wrong dataset id derives a different
    // identity; no shares were escrowed for it.
    let failed = workflow
        .retrieve(
            RetrieveRequest {
                blob_id: outcome.blob_id,
                access_list_id: created.access_list_id,
                dataset_id: "some-other-dataset".into(),
            },
            &seller,
            &ProgressReporter::none(),
        )
        .await;

    assert!(matches!(failed, Err(WorkflowError::KeyFetch(_))));
}
