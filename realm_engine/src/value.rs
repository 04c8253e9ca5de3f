/// RealmEngine v1 — Value Model
///
/// Tagged representation of every runtime value the engine tracks.
/// Composites live in the store arena and are linked through `Value::Ref`
/// slots; whether a slot owns or merely references its target is decided
/// by the target's holder, never by the slot itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::{Hashlet, ObjectId};

// ── Node handles ───────────────────────────────────────────────────

/// Arena handle of a composite value. Handles are handed out in
/// allocation order and never reused, so they are as deterministic as
/// the program that allocates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

// ── Type tags ──────────────────────────────────────────────────────

/// Static type of a field. Part of the canonical hash input.
///
/// Canonical text form: `bool`, `int`, `uint`, `string`, `#Name`,
/// `*T` (pointer to T), `[]T` (array of T).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeTag {
    Bool,
    Int,
    Uint,
    String,
    Named(String),
    Pointer(Box<TypeTag>),
    Array(Box<TypeTag>),
}

impl TypeTag {
    pub fn named(name: &str) -> Self {
        TypeTag::Named(name.to_string())
    }

    pub fn pointer_to(elem: TypeTag) -> Self {
        TypeTag::Pointer(Box::new(elem))
    }

    pub fn array_of(elem: TypeTag) -> Self {
        TypeTag::Array(Box::new(elem))
    }

    /// Whether a slot of this type may hold `value`.
    ///
    /// Primitive tags take exactly their primitive. Pointer and array tags
    /// take nil or a reference. Named types may wrap anything.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeTag::Bool, Value::Bool(_)) => true,
            (TypeTag::Int, Value::Int(_)) => true,
            (TypeTag::Uint, Value::Uint(_)) => true,
            (TypeTag::String, Value::Str(_)) => true,
            (TypeTag::Named(_), _) => true,
            (
                TypeTag::Pointer(_) | TypeTag::Array(_),
                Value::Nil | Value::Ref(_) | Value::Foreign { .. },
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Int => write!(f, "int"),
            TypeTag::Uint => write!(f, "uint"),
            TypeTag::String => write!(f, "string"),
            TypeTag::Named(name) => write!(f, "#{}", name),
            TypeTag::Pointer(elem) => write!(f, "*{}", elem),
            TypeTag::Array(elem) => write!(f, "[]{}", elem),
        }
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix('*') {
            return Ok(TypeTag::Pointer(Box::new(rest.parse()?)));
        }
        if let Some(rest) = s.strip_prefix("[]") {
            return Ok(TypeTag::Array(Box::new(rest.parse()?)));
        }
        if let Some(name) = s.strip_prefix('#') {
            if name.is_empty() {
                return Err("empty named type".to_string());
            }
            return Ok(TypeTag::Named(name.to_string()));
        }
        match s {
            "bool" => Ok(TypeTag::Bool),
            "int" => Ok(TypeTag::Int),
            "uint" => Ok(TypeTag::Uint),
            "string" => Ok(TypeTag::String),
            other => Err(format!("unknown type tag {:?}", other)),
        }
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Values ─────────────────────────────────────────────────────────

/// A single runtime value held in a field slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Str(String),
    /// Slot pointing at a composite in the same realm.
    Ref(NodeId),
    /// Object of another realm, carried by identity and hash verbatim.
    /// Resolution goes through an external realm registry.
    Foreign { id: ObjectId, hash: Hashlet },
}

impl Value {
    pub fn as_ref_node(&self) -> Option<NodeId> {
        match self {
            Value::Ref(node) => Some(*node),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Short label used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Str(_) => "string",
            Value::Ref(_) => "ref",
            Value::Foreign { .. } => "foreign",
        }
    }
}

/// One entry of a composite's ordered field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub tag: TypeTag,
    pub value: Value,
}

impl Field {
    pub fn new(tag: TypeTag, value: Value) -> Self {
        Self { tag, value }
    }

    pub fn bool(b: bool) -> Self {
        Self::new(TypeTag::Bool, Value::Bool(b))
    }

    pub fn int(i: i64) -> Self {
        Self::new(TypeTag::Int, Value::Int(i))
    }

    pub fn uint(u: u64) -> Self {
        Self::new(TypeTag::Uint, Value::Uint(u))
    }

    pub fn string(s: &str) -> Self {
        Self::new(TypeTag::String, Value::Str(s.to_string()))
    }

    /// Nil pointer slot to a named element type.
    pub fn nil_pointer(elem: &str) -> Self {
        Self::new(TypeTag::pointer_to(TypeTag::named(elem)), Value::Nil)
    }
}

/// Shape of a composite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeKind {
    Struct,
    Array,
    Map,
}

impl CompositeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeKind::Struct => "struct",
            CompositeKind::Array => "array",
            CompositeKind::Map => "map",
        }
    }
}

impl FromStr for CompositeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "struct" => Ok(CompositeKind::Struct),
            "array" => Ok(CompositeKind::Array),
            "map" => Ok(CompositeKind::Map),
            other => Err(format!("unknown composite kind {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_text_form_round_trips_nested_tags() {
        let tag = TypeTag::array_of(TypeTag::pointer_to(TypeTag::named("avl.Node")));
        assert_eq!(tag.to_string(), "[]*#avl.Node");
        assert_eq!("[]*#avl.Node".parse::<TypeTag>().unwrap(), tag);
    }

    #[test]
    fn type_tag_rejects_unknown_primitive() {
        assert!("float".parse::<TypeTag>().is_err());
        assert!("#".parse::<TypeTag>().is_err());
    }

    #[test]
    fn primitive_tags_admit_only_their_primitive() {
        assert!(TypeTag::Int.admits(&Value::Int(3)));
        assert!(!TypeTag::Int.admits(&Value::Uint(3)));
        assert!(!TypeTag::String.admits(&Value::Nil));
        assert!(!TypeTag::Bool.admits(&Value::Ref(NodeId(1))));
    }

    #[test]
    fn pointer_tags_admit_nil_and_refs() {
        let tag = TypeTag::pointer_to(TypeTag::named("T"));
        assert!(tag.admits(&Value::Nil));
        assert!(tag.admits(&Value::Ref(NodeId(7))));
        assert!(!tag.admits(&Value::Int(1)));
    }

    #[test]
    fn type_tag_serializes_as_text() {
        let f = Field::nil_pointer("T");
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, r##"{"tag":"*#T","value":"Nil"}"##);
        let back: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
