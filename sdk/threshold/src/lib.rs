//! Datamart Threshold Encryption
//!
//! Primitives for K-of-N threshold encryption of marketplace datasets.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  Encrypted Dataset Key Flow                       │
//! │                                                                   │
//! │  1. Seller                  2. Key Servers          3. Buyer      │
//! │  ┌──────────┐              ┌──────────────┐        ┌──────────┐   │
//! │  │ Encrypt, │──escrowed───▶│  Hold share  │──on───▶│ Combine  │   │
//! │  │ split DEK│   shares     │ per identity │approval│ (K-of-N) │   │
//! │  └──────────┘              └──────────────┘        └──────────┘   │
//! │                                                                   │
//! │  Properties:                                                      │
//! │  • No single key server can recover the dataset key               │
//! │  • Shares only released after an on-chain membership check        │
//! │  • Ciphertext is bound to its seal identity (AEAD AAD)            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod envelope;
pub mod servers;
pub mod shares;

pub use envelope::{
    DemType, EncryptedObject, EnvelopeError, KemType, open_envelope, seal_envelope,
};
pub use servers::{EncryptedShare, KeyServerInfo, KeyServerKeypair, KeyServerSet, ServerId};
pub use shares::{Share, ThresholdError, combine_shares, random_secret, split_secret};
