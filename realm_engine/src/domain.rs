/// RealmEngine v1 — Core Domain Types
///
/// Pure data. Identities, hashes, holders and the per-node object record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hashing::hashlet_of_bytes;
use crate::value::{CompositeKind, Field, NodeId};

// ── Identities ─────────────────────────────────────────────────────

/// 20-byte content digest rendered as 40 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hashlet(pub String);

impl Hashlet {
    /// Placeholder carried by freshly promoted objects until the commit
    /// pass computes their real hash.
    pub fn zero() -> Self {
        Hashlet("0".repeat(40))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hashlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Realm identifier: hashlet of the realm's package path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RealmId(pub String);

impl RealmId {
    pub fn from_path(pkg_path: &str) -> Self {
        RealmId(hashlet_of_bytes(pkg_path.as_bytes()).0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable, realm-scoped object identity. Renders as `<realm>:<seq>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    pub realm: RealmId,
    pub seq: u64,
}

impl ObjectId {
    pub fn new(realm: RealmId, seq: u64) -> Self {
        Self { realm, seq }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.realm, self.seq)
    }
}

impl FromStr for ObjectId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (realm, seq) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("object id {:?} has no ':' separator", s))?;
        if realm.is_empty() {
            return Err(format!("object id {:?} has an empty realm", s));
        }
        let seq = seq
            .parse::<u64>()
            .map_err(|e| format!("object id {:?}: {}", s, e))?;
        Ok(ObjectId::new(RealmId(realm.to_string()), seq))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Ownership ──────────────────────────────────────────────────────

/// Where a composite's single owning edge comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holder {
    /// Allocated (or released) and held by nothing.
    Unattached,
    /// Bound to a named realm root; the binding counts as one reference.
    Root(String),
    /// Owned by field `slot` of `parent`.
    Slot { parent: NodeId, slot: usize },
    /// Escaped object whose owning slot was cleared while other
    /// references remain. Held by the realm; contributes no reference.
    Realm,
}

impl Holder {
    pub fn owning_slot(&self) -> Option<(NodeId, usize)> {
        match self {
            Holder::Slot { parent, slot } => Some((*parent, *slot)),
            _ => None,
        }
    }

    pub fn is_unattached(&self) -> bool {
        matches!(self, Holder::Unattached)
    }
}

/// Persistent bookkeeping of a composite that has an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub owner_id: Option<ObjectId>,
    pub mod_time: u64,
    pub is_escaped: bool,
    pub content_hash: Hashlet,
}

/// A composite value in the store arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub kind: CompositeKind,
    pub fields: Vec<Field>,
    pub holder: Holder,
    pub ref_count: u64,
    /// Present once the composite has an identity (escape or root binding).
    pub object: Option<ObjectInfo>,
}

impl Node {
    pub fn new(kind: CompositeKind, fields: Vec<Field>) -> Self {
        Self {
            kind,
            fields,
            holder: Holder::Unattached,
            ref_count: 0,
            object: None,
        }
    }

    pub fn is_object(&self) -> bool {
        self.object.is_some()
    }

    pub fn object_id(&self) -> Option<&ObjectId> {
        self.object.as_ref().map(|o| &o.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_id_is_forty_hex_chars_and_stable() {
        let a = RealmId::from_path("gno.land/r/test");
        let b = RealmId::from_path("gno.land/r/test");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 40);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, RealmId::from_path("gno.land/r/other"));
    }

    #[test]
    fn object_id_renders_and_parses() {
        let realm = RealmId::from_path("gno.land/r/test");
        let id = ObjectId::new(realm.clone(), 7);
        let text = id.to_string();
        assert_eq!(text, format!("{}:7", realm));
        assert_eq!(text.parse::<ObjectId>().unwrap(), id);
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{}\"", text));
    }

    #[test]
    fn object_id_rejects_garbage() {
        assert!("nocolon".parse::<ObjectId>().is_err());
        assert!(":3".parse::<ObjectId>().is_err());
        assert!("abc:x".parse::<ObjectId>().is_err());
    }
}
