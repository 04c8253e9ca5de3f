/// RealmEngine v1 — Identity Allocator
///
/// Realm-scoped, strictly increasing object identities. Identities are
/// handed out in the order objects first escape (or are bound as roots),
/// which is program order. Deleted identities are never reused.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arithmetic::checked_inc;
use crate::domain::{ObjectId, RealmId};
use crate::error::Result;

/// Allocation state for one realm. Lives inside the realm store so it is
/// checkpointed and restored together with the object graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAllocator {
    realm: RealmId,
    last: u64,
}

impl IdentityAllocator {
    pub fn new(realm: RealmId) -> Self {
        Self { realm, last: 0 }
    }

    /// Next unused identity, strictly greater than every earlier one.
    pub fn allocate(&mut self) -> Result<ObjectId> {
        self.last = checked_inc(self.last, "object identity")?;
        let id = ObjectId::new(self.realm.clone(), self.last);
        debug!(object_id = %id, "allocated identity");
        Ok(id)
    }

    /// Highest identity handed out so far (0 when none).
    pub fn last_allocated(&self) -> u64 {
        self.last
    }

    pub fn realm(&self) -> &RealmId {
        &self.realm
    }

    /// Whether `id` could have been produced by this allocator.
    pub fn has_issued(&self, id: &ObjectId) -> bool {
        id.realm == self.realm && id.seq >= 1 && id.seq <= self.last
    }
}
