//! Marketplace operations.
//!
//! Transaction builders for the marketplace commands plus thin read
//! helpers over any [`LedgerClient`]. The workflows use the builders;
//! the convenience functions cover the seller-side admin operations
//! (create an access list, grant access) that sit outside publish and
//! retrieve.

use crate::ledger::{
    AccessListObject, Command, Event, EventKind, LedgerClient, LedgerError, ListingObject,
    ObjectData, Owner, Transaction, TransactionEffects,
};
use crate::signer::{SignerError, TransactionSigner};
use crate::types::{Address, BlobId, ObjectId};

// ============ Transaction Builders ============

pub fn create_access_list_tx(sender: Address, name: impl Into<String>) -> Transaction {
    Transaction::new(sender, vec![Command::CreateAccessList { name: name.into() }])
}

pub fn add_member_tx(
    sender: Address,
    access_list: ObjectId,
    cap: ObjectId,
    member: Address,
) -> Transaction {
    Transaction::new(sender, vec![Command::AddMember {
        access_list,
        cap,
        member,
    }])
}

#[allow(clippy::too_many_arguments)]
pub fn create_listing_tx(
    sender: Address,
    title: impl Into<String>,
    description: impl Into<String>,
    access_list: ObjectId,
    cap: ObjectId,
    blob_id: BlobId,
    price: u64,
    seal_threshold: u64,
    seal_kem_type: u64,
    seal_dem_type: u64,
) -> Transaction {
    Transaction::new(sender, vec![Command::CreateListing {
        title: title.into(),
        description: description.into(),
        access_list,
        cap,
        blob_id,
        price,
        seal_threshold,
        seal_kem_type,
        seal_dem_type,
    }])
}

pub fn purchase_tx(sender: Address, listing: ObjectId) -> Transaction {
    Transaction::new(sender, vec![Command::PurchaseListing { listing }])
}

/// Build the approval transaction a retrieve session presents to key
/// servers. Never submitted to the ledger.
pub fn seal_approve_tx(sender: Address, identity: &str, access_list: ObjectId) -> Transaction {
    Transaction::new(sender, vec![Command::SealApprove {
        identity: identity.as_bytes().to_vec(),
        access_list,
    }])
}

// ============ Effects Extraction ============

/// The two objects a CreateAccessList transaction yields
#[derive(Debug, Clone, Copy)]
pub struct CreatedAccessList {
    pub access_list_id: ObjectId,
    pub cap_id: ObjectId,
}

/// Pull the access list and cap ids out of creation effects
pub fn extract_access_list(effects: &TransactionEffects) -> Result<CreatedAccessList, LedgerError> {
    let access_list_id = effects
        .created
        .iter()
        .find(|c| c.owner == Owner::Shared)
        .map(|c| c.object_id)
        .ok_or_else(|| LedgerError::UnexpectedShape("no shared object created".into()))?;
    let cap_id = effects
        .created
        .iter()
        .find(|c| matches!(c.owner, Owner::Address(_)))
        .map(|c| c.object_id)
        .ok_or_else(|| LedgerError::UnexpectedShape("no owned cap created".into()))?;
    Ok(CreatedAccessList {
        access_list_id,
        cap_id,
    })
}

/// Pull the listing id out of creation effects
pub fn extract_listing_id(effects: &TransactionEffects) -> Result<ObjectId, LedgerError> {
    effects
        .events
        .iter()
        .find_map(|event| match event {
            Event::DatasetPublished { listing_id, .. } => Some(*listing_id),
            _ => None,
        })
        .ok_or_else(|| LedgerError::UnexpectedShape("no DatasetPublished event".into()))
}

// ============ Read Helpers ============

/// Fetch and type-check an access list
pub async fn get_access_list<L: LedgerClient + ?Sized>(
    ledger: &L,
    id: ObjectId,
) -> Result<AccessListObject, LedgerError> {
    match ledger.get_object(id).await?.data {
        ObjectData::AccessList(data) => Ok(data),
        _ => Err(LedgerError::UnexpectedShape(format!(
            "{id} is not an access list"
        ))),
    }
}

/// Fetch and type-check a listing
pub async fn get_listing<L: LedgerClient + ?Sized>(
    ledger: &L,
    id: ObjectId,
) -> Result<ListingObject, LedgerError> {
    match ledger.get_object(id).await?.data {
        ObjectData::Listing(data) => Ok(data),
        _ => Err(LedgerError::UnexpectedShape(format!("{id} is not a listing"))),
    }
}

/// Whether an address is currently a member of an access list
pub async fn has_access<L: LedgerClient + ?Sized>(
    ledger: &L,
    access_list: ObjectId,
    address: Address,
) -> Result<bool, LedgerError> {
    Ok(get_access_list(ledger, access_list).await?.is_member(&address))
}

/// All DatasetPublished events, for marketplace browsing
pub async fn published_datasets<L: LedgerClient + ?Sized>(
    ledger: &L,
) -> Result<Vec<Event>, LedgerError> {
    ledger.query_events(EventKind::DatasetPublished).await
}

// ============ Admin Convenience ============

/// Create an access list and return its ids
pub async fn create_access_list<L: LedgerClient + ?Sized>(
    ledger: &L,
    signer: &dyn TransactionSigner,
    name: impl Into<String>,
) -> Result<CreatedAccessList, SignerError> {
    let tx = create_access_list_tx(signer.address(), name);
    let signed = signer.sign_transaction(&tx).await?;
    let effects = ledger.submit_transaction(signed).await?;
    Ok(extract_access_list(&effects)?)
}

/// Grant an address access to datasets under an access list
pub async fn grant_access<L: LedgerClient + ?Sized>(
    ledger: &L,
    signer: &dyn TransactionSigner,
    access_list: ObjectId,
    cap: ObjectId,
    member: Address,
) -> Result<(), SignerError> {
    let tx = add_member_tx(signer.address(), access_list, cap, member);
    let signed = signer.sign_transaction(&tx).await?;
    ledger.submit_transaction(signed).await?;
    Ok(())
}
