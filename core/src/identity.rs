//! Seal identity derivation.

use crate::types::ObjectId;

/// Derive the seal identity string for a dataset.
///
/// Format: `hex(namespace_bytes) + "::" + dataset_id`, where the
/// namespace is the access list object id. Identical inputs always
/// produce identical identities, so key servers can index escrowed
/// shares by this string alone.
pub fn derive_identity(namespace: &ObjectId, dataset_id: &str) -> String {
    format!("{}::{}", hex::encode(namespace.0), dataset_id)
}
