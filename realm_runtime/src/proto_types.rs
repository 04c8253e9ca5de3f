//! Hand-written protobuf types for the step log.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Field numbers are frozen; type tags and identities travel in their
//! canonical text form.

use prost::Message;

// ── Step Envelope ──────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoStepEnvelope {
    #[prost(uint32, tag = "1")]
    pub schema_version: u32,
    #[prost(uint64, tag = "2")]
    pub step: u64,
    #[prost(message, repeated, tag = "3")]
    pub events: Vec<ProtoMutation>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoMutation {
    #[prost(oneof = "MutationKind", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub kind: Option<MutationKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum MutationKind {
    #[prost(message, tag = "1")]
    Alloc(Alloc),
    #[prost(message, tag = "2")]
    BindRoot(BindRoot),
    #[prost(message, tag = "3")]
    UnbindRoot(UnbindRoot),
    #[prost(message, tag = "4")]
    Attach(Attach),
    #[prost(message, tag = "5")]
    Detach(Detach),
    #[prost(message, tag = "6")]
    AddReference(AddReference),
    #[prost(message, tag = "7")]
    RemoveReference(RemoveReference),
    #[prost(message, tag = "8")]
    SetValue(SetValue),
}

// ── Values ─────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoField {
    /// Canonical type tag text, e.g. `*#Node`.
    #[prost(string, tag = "1")]
    pub tag: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<ProtoValue>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoValue {
    #[prost(oneof = "ValueKind", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub kind: Option<ValueKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ValueKind {
    #[prost(bool, tag = "1")]
    Nil(bool),
    #[prost(bool, tag = "2")]
    Bool(bool),
    #[prost(sint64, tag = "3")]
    Int(i64),
    #[prost(uint64, tag = "4")]
    Uint(u64),
    #[prost(string, tag = "5")]
    Str(String),
    #[prost(uint64, tag = "6")]
    Ref(u64),
    #[prost(message, tag = "7")]
    Foreign(ProtoForeign),
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoForeign {
    /// `<realm>:<seq>`
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub hash: String,
}

// ── Mutation Types ─────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct Alloc {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(message, repeated, tag = "2")]
    pub fields: Vec<ProtoField>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BindRoot {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub value: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct UnbindRoot {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Attach {
    #[prost(uint64, tag = "1")]
    pub owner: u64,
    #[prost(uint64, tag = "2")]
    pub slot: u64,
    #[prost(uint64, tag = "3")]
    pub value: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Detach {
    #[prost(uint64, tag = "1")]
    pub owner: u64,
    #[prost(uint64, tag = "2")]
    pub slot: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct AddReference {
    #[prost(uint64, tag = "1")]
    pub from: u64,
    #[prost(uint64, tag = "2")]
    pub slot: u64,
    #[prost(uint64, tag = "3")]
    pub value: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoveReference {
    #[prost(uint64, tag = "1")]
    pub from: u64,
    #[prost(uint64, tag = "2")]
    pub slot: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetValue {
    #[prost(uint64, tag = "1")]
    pub node: u64,
    #[prost(uint64, tag = "2")]
    pub slot: u64,
    #[prost(message, optional, tag = "3")]
    pub value: Option<ProtoValue>,
}
