//! Ledger Client boundary.
//!
//! Transactions, on-chain object schemas, events, and the async client
//! trait the workflows program against. The marketplace keeps three
//! object kinds on the ledger: access lists (shared), their owner caps
//! (address-owned), listings (shared), and blob registrations
//! (address-owned).

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wincode::{SchemaRead, SchemaWrite};

use crate::types::{Address, BlobId, ObjectId, TxDigest};

// ============ Commands and Transactions ============

/// A single marketplace command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub enum Command {
    /// Create an access list; the sender becomes its first member and
    /// receives the owner cap
    CreateAccessList { name: String },
    /// Add a member to an access list (requires the owner cap)
    AddMember {
        access_list: ObjectId,
        cap: ObjectId,
        member: Address,
    },
    /// Create a marketplace listing tied to an access list and a
    /// certified blob (requires the owner cap)
    CreateListing {
        title: String,
        description: String,
        access_list: ObjectId,
        cap: ObjectId,
        blob_id: BlobId,
        price: u64,
        seal_threshold: u64,
        seal_kem_type: u64,
        seal_dem_type: u64,
    },
    /// Register a blob with the storage network's on-chain registry
    RegisterBlob {
        blob_id: BlobId,
        size: u64,
        epochs: u64,
        deletable: bool,
    },
    /// Mark a registered blob as certified (all shards stored)
    CertifyBlob { registration: ObjectId },
    /// Purchase a listing; the buyer joins the listing's access list
    PurchaseListing { listing: ObjectId },
    /// Access approval probe. Aborts unless the sender is a member of
    /// the access list and the identity is namespaced under it. Never
    /// executed on-chain by the retrieve workflow; key servers evaluate
    /// it against current ledger state.
    SealApprove {
        identity: Vec<u8>,
        access_list: ObjectId,
    },
}

/// An unsigned transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct Transaction {
    pub sender: Address,
    pub commands: Vec<Command>,
}

impl Transaction {
    pub fn new(sender: Address, commands: Vec<Command>) -> Self {
        Self { sender, commands }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        wincode::serialize(self).map_err(|_| LedgerError::Serialization)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        wincode::deserialize(bytes).map_err(|_| LedgerError::Serialization)
    }
}

/// A transaction plus its Ed25519 signature over the serialized bytes
#[derive(Debug, Clone, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct SignedTransaction {
    pub tx_bytes: Vec<u8>,
    pub signature: Vec<u8>,
    pub signer_pubkey: [u8; 32],
}

// ============ Effects and Events ============

/// Ownership of an on-chain object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub enum Owner {
    Address(Address),
    Shared,
}

/// An object created during transaction execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedObject {
    pub object_id: ObjectId,
    pub owner: Owner,
}

/// What a transaction did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEffects {
    pub digest: TxDigest,
    pub created: Vec<CreatedObject>,
    pub events: Vec<Event>,
}

/// Marketplace events emitted during execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    DatasetPublished {
        listing_id: ObjectId,
        seller: Address,
        access_list_id: ObjectId,
        blob_id: BlobId,
        price: u64,
    },
    Purchase {
        listing_id: ObjectId,
        buyer: Address,
        seller: Address,
        price: u64,
    },
    MemberAdded {
        access_list_id: ObjectId,
        member: Address,
    },
}

/// Event type selector for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DatasetPublished,
    Purchase,
    MemberAdded,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DatasetPublished { .. } => EventKind::DatasetPublished,
            Event::Purchase { .. } => EventKind::Purchase,
            Event::MemberAdded { .. } => EventKind::MemberAdded,
        }
    }
}

// ============ Object Schemas ============

/// Access list: the set of addresses allowed to decrypt datasets
/// published under it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessListObject {
    pub name: String,
    pub members: Vec<Address>,
}

impl AccessListObject {
    pub fn is_member(&self, address: &Address) -> bool {
        self.members.contains(address)
    }
}

/// Owner capability for an access list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessListCapObject {
    pub access_list_id: ObjectId,
}

/// A marketplace listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingObject {
    pub title: String,
    pub description: String,
    pub seller: Address,
    pub access_list_id: ObjectId,
    pub blob_id: BlobId,
    pub price: u64,
    pub seal_threshold: u64,
    pub seal_kem_type: u64,
    pub seal_dem_type: u64,
    pub sales_count: u64,
    pub created_at_ms: u64,
}

/// On-chain record of a blob in the storage network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRegistrationObject {
    pub blob_id: BlobId,
    pub size: u64,
    pub epochs: u64,
    pub deletable: bool,
    pub certified: bool,
    pub registered_epoch: u64,
}

/// Typed contents of a ledger object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectData {
    AccessList(AccessListObject),
    AccessListCap(AccessListCapObject),
    Listing(ListingObject),
    BlobRegistration(BlobRegistrationObject),
}

/// An object as returned by the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerObject {
    pub id: ObjectId,
    pub owner: Owner,
    pub data: ObjectData,
}

// ============ Errors and Client Trait ============

/// Ledger access errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("object has unexpected shape: {0}")]
    UnexpectedShape(String),

    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("execution aborted: {0}")]
    Execution(String),

    #[error("transaction serialization failed")]
    Serialization,
}

/// Async boundary to the ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch an object by id
    async fn get_object(&self, id: ObjectId) -> Result<LedgerObject, LedgerError>;

    /// Submit a signed transaction for execution
    async fn submit_transaction(
        &self,
        tx: SignedTransaction,
    ) -> Result<TransactionEffects, LedgerError>;

    /// Wait until a transaction's effects are available
    async fn wait_for_transaction(
        &self,
        digest: TxDigest,
    ) -> Result<TransactionEffects, LedgerError>;

    /// Query emitted events by kind
    async fn query_events(&self, kind: EventKind) -> Result<Vec<Event>, LedgerError>;
}
