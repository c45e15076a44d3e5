//! In-memory ledger.
//!
//! Executes marketplace transactions against process-local state with
//! the same validation a real ledger node performs: signature checks,
//! sender/cap ownership checks, and command aborts. Used by local
//! deployments and the integration tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::debug;

use crate::ledger::{
    AccessListCapObject, AccessListObject, BlobRegistrationObject, Command, CreatedObject, Event,
    EventKind, LedgerClient, LedgerError, LedgerObject, ListingObject, ObjectData, Owner,
    SignedTransaction, Transaction, TransactionEffects,
};
use crate::types::{Address, ObjectId, TxDigest};

/// Process-local ledger
pub struct InMemoryLedger {
    objects: DashMap<ObjectId, LedgerObject>,
    effects: DashMap<TxDigest, TransactionEffects>,
    events: RwLock<Vec<Event>>,
    tx_counter: AtomicU64,
    epoch: AtomicU64,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            effects: DashMap::new(),
            events: RwLock::new(Vec::new()),
            tx_counter: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Advance the storage epoch (local deployments drive this manually)
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn verify(&self, tx: &SignedTransaction) -> Result<Transaction, LedgerError> {
        let vk = VerifyingKey::from_bytes(&tx.signer_pubkey)
            .map_err(|_| LedgerError::InvalidSignature)?;
        let sig_bytes: [u8; 64] = tx
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| LedgerError::InvalidSignature)?;
        let sig = Signature::from_bytes(&sig_bytes);
        vk.verify(&tx.tx_bytes, &sig)
            .map_err(|_| LedgerError::InvalidSignature)?;

        let parsed = Transaction::from_bytes(&tx.tx_bytes)?;
        if Address::from_signer_pubkey(&tx.signer_pubkey) != parsed.sender {
            return Err(LedgerError::InvalidSignature);
        }
        Ok(parsed)
    }

    fn get(&self, id: ObjectId) -> Result<LedgerObject, LedgerError> {
        self.objects
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or(LedgerError::ObjectNotFound(id))
    }

    /// Read through the transaction's staged overlay, then committed
    /// state
    fn staged_get(
        &self,
        staged: &HashMap<ObjectId, LedgerObject>,
        id: ObjectId,
    ) -> Result<LedgerObject, LedgerError> {
        if let Some(object) = staged.get(&id) {
            return Ok(object.clone());
        }
        self.get(id)
    }

    /// Check that `cap` is owned by `sender` and governs `access_list`
    fn check_cap(
        &self,
        staged: &HashMap<ObjectId, LedgerObject>,
        cap: ObjectId,
        access_list: ObjectId,
        sender: Address,
    ) -> Result<(), LedgerError> {
        let cap_obj = self.staged_get(staged, cap)?;
        if cap_obj.owner != Owner::Address(sender) {
            return Err(LedgerError::Execution("cap not owned by sender".into()));
        }
        match &cap_obj.data {
            ObjectData::AccessListCap(data) if data.access_list_id == access_list => Ok(()),
            ObjectData::AccessListCap(_) => Err(LedgerError::Execution(
                "cap governs a different access list".into(),
            )),
            _ => Err(LedgerError::UnexpectedShape(
                "object is not an access list cap".into(),
            )),
        }
    }

    fn execute(
        &self,
        digest: TxDigest,
        tx: &Transaction,
    ) -> Result<TransactionEffects, LedgerError> {
        // Every object the transaction creates or touches is staged in
        // a local overlay. An abort in any command discards the overlay
        // and the ledger stays as it was.
        let mut staged: HashMap<ObjectId, LedgerObject> = HashMap::new();
        let mut created = Vec::new();
        let mut events = Vec::new();
        let sender = tx.sender;

        for (index, command) in tx.commands.iter().enumerate() {
            let index = index as u64;
            match command {
                Command::CreateAccessList { name } => {
                    let list_id = stage_object(
                        digest,
                        index * 2,
                        Owner::Shared,
                        ObjectData::AccessList(AccessListObject {
                            name: name.clone(),
                            members: vec![sender],
                        }),
                        &mut staged,
                        &mut created,
                    );
                    stage_object(
                        digest,
                        index * 2 + 1,
                        Owner::Address(sender),
                        ObjectData::AccessListCap(AccessListCapObject {
                            access_list_id: list_id,
                        }),
                        &mut staged,
                        &mut created,
                    );
                }
                Command::AddMember {
                    access_list,
                    cap,
                    member,
                } => {
                    self.check_cap(&staged, *cap, *access_list, sender)?;
                    let mut object = self.staged_get(&staged, *access_list)?;
                    match &mut object.data {
                        ObjectData::AccessList(list) => {
                            if !list.members.contains(member) {
                                list.members.push(*member);
                                events.push(Event::MemberAdded {
                                    access_list_id: *access_list,
                                    member: *member,
                                });
                            }
                        }
                        _ => {
                            return Err(LedgerError::UnexpectedShape(
                                "object is not an access list".into(),
                            ));
                        }
                    }
                    staged.insert(*access_list, object);
                }
                Command::CreateListing {
                    title,
                    description,
                    access_list,
                    cap,
                    blob_id,
                    price,
                    seal_threshold,
                    seal_kem_type,
                    seal_dem_type,
                } => {
                    self.check_cap(&staged, *cap, *access_list, sender)?;
                    let listing_id = stage_object(
                        digest,
                        index * 2,
                        Owner::Shared,
                        ObjectData::Listing(ListingObject {
                            title: title.clone(),
                            description: description.clone(),
                            seller: sender,
                            access_list_id: *access_list,
                            blob_id: *blob_id,
                            price: *price,
                            seal_threshold: *seal_threshold,
                            seal_kem_type: *seal_kem_type,
                            seal_dem_type: *seal_dem_type,
                            sales_count: 0,
                            created_at_ms: now_ms(),
                        }),
                        &mut staged,
                        &mut created,
                    );
                    events.push(Event::DatasetPublished {
                        listing_id,
                        seller: sender,
                        access_list_id: *access_list,
                        blob_id: *blob_id,
                        price: *price,
                    });
                }
                Command::RegisterBlob {
                    blob_id,
                    size,
                    epochs,
                    deletable,
                } => {
                    stage_object(
                        digest,
                        index * 2,
                        Owner::Address(sender),
                        ObjectData::BlobRegistration(BlobRegistrationObject {
                            blob_id: *blob_id,
                            size: *size,
                            epochs: *epochs,
                            deletable: *deletable,
                            certified: false,
                            registered_epoch: self.current_epoch(),
                        }),
                        &mut staged,
                        &mut created,
                    );
                }
                Command::CertifyBlob { registration } => {
                    let mut object = self.staged_get(&staged, *registration)?;
                    if object.owner != Owner::Address(sender) {
                        return Err(LedgerError::Execution(
                            "registration not owned by sender".into(),
                        ));
                    }
                    match &mut object.data {
                        ObjectData::BlobRegistration(reg) => reg.certified = true,
                        _ => {
                            return Err(LedgerError::UnexpectedShape(
                                "object is not a blob registration".into(),
                            ));
                        }
                    }
                    staged.insert(*registration, object);
                }
                Command::PurchaseListing { listing } => {
                    let mut object = self.staged_get(&staged, *listing)?;
                    let (access_list_id, seller, price) = match &mut object.data {
                        ObjectData::Listing(data) => {
                            data.sales_count += 1;
                            (data.access_list_id, data.seller, data.price)
                        }
                        _ => {
                            return Err(LedgerError::UnexpectedShape(
                                "object is not a listing".into(),
                            ));
                        }
                    };
                    staged.insert(*listing, object);

                    let mut list_obj = self.staged_get(&staged, access_list_id)?;
                    if let ObjectData::AccessList(list) = &mut list_obj.data {
                        if !list.members.contains(&sender) {
                            list.members.push(sender);
                            events.push(Event::MemberAdded {
                                access_list_id,
                                member: sender,
                            });
                        }
                    }
                    staged.insert(access_list_id, list_obj);

                    events.push(Event::Purchase {
                        listing_id: *listing,
                        buyer: sender,
                        seller,
                        price,
                    });
                }
                Command::SealApprove {
                    identity,
                    access_list,
                } => {
                    let list = self.staged_get(&staged, *access_list)?;
                    let list = match &list.data {
                        ObjectData::AccessList(data) => data,
                        _ => {
                            return Err(LedgerError::UnexpectedShape(
                                "object is not an access list".into(),
                            ));
                        }
                    };

                    let prefix = format!("{}::", hex::encode(access_list.0));
                    if !identity.starts_with(prefix.as_bytes()) {
                        return Err(LedgerError::Execution(
                            "identity not namespaced under access list".into(),
                        ));
                    }
                    if !list.is_member(&sender) {
                        return Err(LedgerError::Execution("no access".into()));
                    }
                    // Approval only; no state change
                }
            }
        }

        // Commit: every command succeeded
        for (id, object) in staged {
            self.objects.insert(id, object);
        }
        self.events.write().map_err(poisoned)?.extend(events.clone());

        Ok(TransactionEffects {
            digest,
            created,
            events,
        })
    }
}

/// Derive a fresh object id and record the object in the staging
/// overlay
fn stage_object(
    digest: TxDigest,
    index: u64,
    owner: Owner,
    data: ObjectData,
    staged: &mut HashMap<ObjectId, LedgerObject>,
    created: &mut Vec<CreatedObject>,
) -> ObjectId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&digest.0);
    hasher.update(&index.to_le_bytes());
    let id = ObjectId(*hasher.finalize().as_bytes());

    staged.insert(id, LedgerObject { id, owner, data });
    created.push(CreatedObject {
        object_id: id,
        owner,
    });
    id
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Execution("event log lock poisoned".into())
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_object(&self, id: ObjectId) -> Result<LedgerObject, LedgerError> {
        self.get(id)
    }

    async fn submit_transaction(
        &self,
        tx: SignedTransaction,
    ) -> Result<TransactionEffects, LedgerError> {
        let parsed = self.verify(&tx)?;

        let counter = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&tx.tx_bytes);
        hasher.update(&counter.to_le_bytes());
        let digest = TxDigest(*hasher.finalize().as_bytes());

        debug!(digest = %digest, commands = parsed.commands.len(), "executing transaction");

        let effects = self.execute(digest, &parsed)?;
        self.effects.insert(digest, effects.clone());
        Ok(effects)
    }

    async fn wait_for_transaction(
        &self,
        digest: TxDigest,
    ) -> Result<TransactionEffects, LedgerError> {
        // Execution is synchronous here; effects are available as soon
        // as submit returns.
        self.effects
            .get(&digest)
            .map(|entry| entry.clone())
            .ok_or_else(|| LedgerError::Execution(format!("unknown transaction {digest}")))
    }

    async fn query_events(&self, kind: EventKind) -> Result<Vec<Event>, LedgerError> {
        Ok(self
            .events
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|event| event.kind() == kind)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{KeypairSigner, TransactionSigner};
    use crate::types::BlobId;

    async fn submit(
        ledger: &InMemoryLedger,
        signer: &KeypairSigner,
        commands: Vec<Command>,
    ) -> Result<TransactionEffects, LedgerError> {
        let tx = Transaction::new(signer.address(), commands);
        let signed = signer.sign_transaction(&tx).await.unwrap();
        ledger.submit_transaction(signed).await
    }

    #[tokio::test]
    async fn create_access_list_yields_list_and_cap() {
        let ledger = InMemoryLedger::new();
        let signer = KeypairSigner::generate();

        let effects = submit(&ledger, &signer, vec![Command::CreateAccessList {
            name: "team".into(),
        }])
        .await
        .unwrap();

        assert_eq!(effects.created.len(), 2);
        let shared = effects
            .created
            .iter()
            .find(|c| c.owner == Owner::Shared)
            .unwrap();
        let owned = effects
            .created
            .iter()
            .find(|c| c.owner == Owner::Address(signer.address()))
            .unwrap();

        let list = ledger.get_object(shared.object_id).await.unwrap();
        match list.data {
            ObjectData::AccessList(data) => {
                assert_eq!(data.members, vec![signer.address()]);
            }
            other => panic!("unexpected object: {other:?}"),
        }

        let cap = ledger.get_object(owned.object_id).await.unwrap();
        match cap.data {
            ObjectData::AccessListCap(data) => {
                assert_eq!(data.access_list_id, shared.object_id);
            }
            other => panic!("unexpected object: {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_member_requires_matching_cap() {
        let ledger = InMemoryLedger::new();
        let owner = KeypairSigner::generate();
        let stranger = KeypairSigner::generate();
        let member = KeypairSigner::generate();

        let effects = submit(&ledger, &owner, vec![Command::CreateAccessList {
            name: "team".into(),
        }])
        .await
        .unwrap();
        let list_id = effects.created[0].object_id;
        let cap_id = effects.created[1].object_id;

        // Stranger holding someone else's cap id cannot add members
        let denied = submit(&ledger, &stranger, vec![Command::AddMember {
            access_list: list_id,
            cap: cap_id,
            member: stranger.address(),
        }])
        .await;
        assert!(matches!(denied, Err(LedgerError::Execution(_))));

        submit(&ledger, &owner, vec![Command::AddMember {
            access_list: list_id,
            cap: cap_id,
            member: member.address(),
        }])
        .await
        .unwrap();

        let list = ledger.get_object(list_id).await.unwrap();
        match list.data {
            ObjectData::AccessList(data) => assert!(data.is_member(&member.address())),
            other => panic!("unexpected object: {other:?}"),
        }

        let events = ledger.query_events(EventKind::MemberAdded).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn aborted_transaction_leaves_no_effects() {
        let ledger = InMemoryLedger::new();
        let owner = KeypairSigner::generate();
        let member = KeypairSigner::generate();

        let effects = submit(&ledger, &owner, vec![Command::CreateAccessList {
            name: "team".into(),
        }])
        .await
        .unwrap();
        let list_id = effects.created[0].object_id;
        let cap_id = effects.created[1].object_id;

        // First command is valid; the second aborts on a bogus cap.
        // Nothing from the transaction may stick.
        let bogus_cap = ObjectId([0xcd; 32]);
        let failed = submit(&ledger, &owner, vec![
            Command::AddMember {
                access_list: list_id,
                cap: cap_id,
                member: member.address(),
            },
            Command::AddMember {
                access_list: list_id,
                cap: bogus_cap,
                member: member.address(),
            },
        ])
        .await;
        assert!(failed.is_err());

        let list = ledger.get_object(list_id).await.unwrap();
        match list.data {
            ObjectData::AccessList(data) => assert!(!data.is_member(&member.address())),
            other => panic!("unexpected object: {other:?}"),
        }
        let events = ledger.query_events(EventKind::MemberAdded).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn later_commands_see_earlier_staged_writes() {
        let ledger = InMemoryLedger::new();
        let owner = KeypairSigner::generate();
        let member = KeypairSigner::generate();

        let effects = submit(&ledger, &owner, vec![Command::CreateAccessList {
            name: "team".into(),
        }])
        .await
        .unwrap();
        let list_id = effects.created[0].object_id;
        let cap_id = effects.created[1].object_id;

        // The second AddMember must see the first one's staged write
        // and skip the duplicate
        submit(&ledger, &owner, vec![
            Command::AddMember {
                access_list: list_id,
                cap: cap_id,
                member: member.address(),
            },
            Command::AddMember {
                access_list: list_id,
                cap: cap_id,
                member: member.address(),
            },
        ])
        .await
        .unwrap();

        let list = ledger.get_object(list_id).await.unwrap();
        match list.data {
            ObjectData::AccessList(data) => {
                assert_eq!(
                    data.members
                        .iter()
                        .filter(|m| **m == member.address())
                        .count(),
                    1
                );
            }
            other => panic!("unexpected object: {other:?}"),
        }
        let events = ledger.query_events(EventKind::MemberAdded).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn seal_approve_enforces_membership_and_namespace() {
        let ledger = InMemoryLedger::new();
        let owner = KeypairSigner::generate();
        let outsider = KeypairSigner::generate();

        let effects = submit(&ledger, &owner, vec![Command::CreateAccessList {
            name: "team".into(),
        }])
        .await
        .unwrap();
        let list_id = effects.created[0].object_id;

        let identity = format!("{}::ds-1", hex::encode(list_id.0)).into_bytes();

        // Member passes
        submit(&ledger, &owner, vec![Command::SealApprove {
            identity: identity.clone(),
            access_list: list_id,
        }])
        .await
        .unwrap();

        // Non-member aborts
        let denied = submit(&ledger, &outsider, vec![Command::SealApprove {
            identity: identity.clone(),
            access_list: list_id,
        }])
        .await;
        assert!(matches!(denied, Err(LedgerError::Execution(_))));

        // Wrong namespace aborts even for members
        let foreign = format!("{}::ds-1", hex::encode([0u8; 32])).into_bytes();
        let denied = submit(&ledger, &owner, vec![Command::SealApprove {
            identity: foreign,
            access_list: list_id,
        }])
        .await;
        assert!(matches!(denied, Err(LedgerError::Execution(_))));
    }

    #[tokio::test]
    async fn purchase_adds_buyer_to_access_list() {
        let ledger = InMemoryLedger::new();
        let seller = KeypairSigner::generate();
        let buyer = KeypairSigner::generate();

        let effects = submit(&ledger, &seller, vec![Command::CreateAccessList {
            name: "team".into(),
        }])
        .await
        .unwrap();
        let list_id = effects.created[0].object_id;
        let cap_id = effects.created[1].object_id;

        let effects = submit(&ledger, &seller, vec![Command::CreateListing {
            title: "weather".into(),
            description: "hourly".into(),
            access_list: list_id,
            cap: cap_id,
            blob_id: BlobId([4u8; 32]),
            price: 100,
            seal_threshold: 2,
            seal_kem_type: 0,
            seal_dem_type: 0,
        }])
        .await
        .unwrap();
        let listing_id = effects.created[0].object_id;

        submit(&ledger, &buyer, vec![Command::PurchaseListing {
            listing: listing_id,
        }])
        .await
        .unwrap();

        let list = ledger.get_object(list_id).await.unwrap();
        match list.data {
            ObjectData::AccessList(data) => assert!(data.is_member(&buyer.address())),
            other => panic!("unexpected object: {other:?}"),
        }

        let listing = ledger.get_object(listing_id).await.unwrap();
        match listing.data {
            ObjectData::Listing(data) => assert_eq!(data.sales_count, 1),
            other => panic!("unexpected object: {other:?}"),
        }

        let events = ledger.query_events(EventKind::Purchase).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn forged_sender_rejected() {
        let ledger = InMemoryLedger::new();
        let signer = KeypairSigner::generate();
        let victim = KeypairSigner::generate();

        // Transaction claims the victim as sender but is signed by us
        let tx = Transaction::new(victim.address(), vec![Command::CreateAccessList {
            name: "forged".into(),
        }]);
        let signed = signer.sign_transaction(&tx).await.unwrap();

        assert!(matches!(
            ledger.submit_transaction(signed).await,
            Err(LedgerError::InvalidSignature)
        ));
    }
}
