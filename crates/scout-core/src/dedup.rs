//! Identity-based merging of provider batches into a job's result set.

use std::collections::HashSet;

use crate::models::{Entity, IdentityKey};

/// Identities already accumulated for a job.
pub type IdentitySet = HashSet<IdentityKey>;

/// Merge `batch` into `seen`, returning only the entities not seen before.
///
/// Runs in O(batch). The first occurrence of an identity wins, including
/// duplicates inside the batch itself. Merging the same batch again yields
/// nothing.
pub fn merge(seen: &mut IdentitySet, batch: Vec<Entity>) -> Vec<Entity> {
    let mut unique = Vec::with_capacity(batch.len());
    for entity in batch {
        if seen.insert(entity.identity()) {
            unique.push(entity);
        }
    }
    unique
}
