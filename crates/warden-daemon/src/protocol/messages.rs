//! Wire message types for daemon-client communication.
//!
//! Hand-maintained prost derives over a single request/response
//! envelope. Tags are frozen: the encoding is the protocol. Record
//! payloads reuse the storage schema types from `warden_core::proto`,
//! so a fetched entity crosses the wire in exactly the bytes it
//! persists as (minus the redacted secret).

use warden_core::proto::{Entity, EntityMeta, Group, KvPair, PubKey};

/// Canonical wire statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    NotFound = 1,
    AlreadyExists = 2,
    PermissionDenied = 3,
    Unauthenticated = 4,
    FailedPrecondition = 5,
    InvalidArgument = 6,
    Unimplemented = 7,
    Internal = 8,
}

/// Key-list actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum KeyActionKind {
    List = 0,
    Add = 1,
    Del = 2,
    Dropall = 3,
}

/// Untyped-metadata actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UntypedMetaKind {
    Read = 0,
    Upsert = 1,
    ClearFuzzy = 2,
    ClearExact = 3,
}

/// Expansion-rule actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RuleActionKind {
    Include = 0,
    Exclude = 1,
    Drop = 2,
}

/// The request envelope. Mutating verbs carry a bearer token; reads
/// leave it empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireRequest {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,

    #[prost(string, tag = "2")]
    pub token: String,

    #[prost(
        oneof = "wire_request::Body",
        tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37"
    )]
    pub body: Option<wire_request::Body>,
}

/// Request bodies.
pub mod wire_request {
    /// One verb per variant.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "10")]
        EntityCreate(super::EntityCreateRequest),
        #[prost(message, tag = "11")]
        EntityFetch(super::EntityFetchRequest),
        #[prost(message, tag = "12")]
        EntityDestroy(super::EntityDestroyRequest),
        #[prost(message, tag = "13")]
        EntityLock(super::EntityLockRequest),
        #[prost(message, tag = "14")]
        EntityUnlock(super::EntityUnlockRequest),
        #[prost(message, tag = "15")]
        EntitySetSecret(super::EntitySetSecretRequest),
        #[prost(message, tag = "16")]
        EntityMetaUpdate(super::EntityMetaUpdateRequest),
        #[prost(message, tag = "17")]
        EntityKeys(super::EntityKeysRequest),
        #[prost(message, tag = "18")]
        EntityUntypedMeta(super::EntityUntypedMetaRequest),
        #[prost(message, tag = "19")]
        EntityGroups(super::EntityGroupsRequest),
        #[prost(message, tag = "20")]
        GroupCreate(super::GroupCreateRequest),
        #[prost(message, tag = "21")]
        GroupFetch(super::GroupFetchRequest),
        #[prost(message, tag = "22")]
        GroupDestroy(super::GroupDestroyRequest),
        #[prost(message, tag = "23")]
        GroupMetaUpdate(super::GroupMetaUpdateRequest),
        #[prost(message, tag = "24")]
        GroupRule(super::GroupRuleRequest),
        #[prost(message, tag = "25")]
        GroupMembers(super::GroupMembersRequest),
        #[prost(message, tag = "26")]
        Membership(super::MembershipRequest),
        #[prost(message, tag = "27")]
        EntityCapability(super::EntityCapabilityRequest),
        #[prost(message, tag = "28")]
        GroupCapability(super::GroupCapabilityRequest),
        #[prost(message, tag = "29")]
        SearchEntities(super::SearchEntitiesRequest),
        #[prost(message, tag = "30")]
        SearchGroups(super::SearchGroupsRequest),
        #[prost(message, tag = "31")]
        AuthEntity(super::AuthEntityRequest),
        #[prost(message, tag = "32")]
        AuthGetToken(super::AuthGetTokenRequest),
        #[prost(message, tag = "33")]
        AuthValidateToken(super::AuthValidateTokenRequest),
        #[prost(message, tag = "34")]
        AuthChangeSecret(super::AuthChangeSecretRequest),
        #[prost(message, tag = "35")]
        SystemPing(super::SystemPingRequest),
        #[prost(message, tag = "36")]
        SystemStatus(super::SystemStatusRequest),
        #[prost(message, tag = "37")]
        SystemCapabilities(super::SystemCapabilitiesRequest),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityCreateRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    /// `-1` auto-allocates.
    #[prost(int32, tag = "2")]
    pub number: i32,
    #[prost(string, tag = "3")]
    pub secret: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityFetchRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityDestroyRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityLockRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityUnlockRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntitySetSecretRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub secret: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityMetaUpdateRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub meta: Option<EntityMeta>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityKeysRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(enumeration = "KeyActionKind", tag = "2")]
    pub action: i32,
    #[prost(string, tag = "3")]
    pub key_type: String,
    #[prost(string, tag = "4")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityUntypedMetaRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(enumeration = "UntypedMetaKind", tag = "2")]
    pub action: i32,
    #[prost(string, tag = "3")]
    pub key: String,
    #[prost(string, tag = "4")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityGroupsRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupCreateRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub display_name: String,
    #[prost(string, tag = "3")]
    pub managed_by: String,
    /// `-1` auto-allocates; 0 is reserved.
    #[prost(int32, tag = "4")]
    pub number: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupFetchRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupDestroyRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupMetaUpdateRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub group: Option<Group>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupRuleRequest {
    #[prost(string, tag = "1")]
    pub group: String,
    #[prost(string, tag = "2")]
    pub target: String,
    #[prost(enumeration = "RuleActionKind", tag = "3")]
    pub action: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupMembersRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MembershipRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub group: String,
    /// False adds the membership, true removes it.
    #[prost(bool, tag = "3")]
    pub drop: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityCapabilityRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub capability: String,
    #[prost(bool, tag = "3")]
    pub drop: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupCapabilityRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub capability: String,
    #[prost(bool, tag = "3")]
    pub drop: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchEntitiesRequest {
    #[prost(string, tag = "1")]
    pub expression: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchGroupsRequest {
    #[prost(string, tag = "1")]
    pub expression: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthEntityRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub secret: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthGetTokenRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub secret: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthValidateTokenRequest {
    #[prost(string, tag = "1")]
    pub token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthChangeSecretRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub old_secret: String,
    #[prost(string, tag = "3")]
    pub new_secret: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemPingRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemStatusRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemCapabilitiesRequest {}

/// The response envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireResponse {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,

    #[prost(enumeration = "Status", tag = "2")]
    pub status: i32,

    /// Human-readable outcome; error text for non-Ok statuses.
    #[prost(string, tag = "3")]
    pub message: String,

    #[prost(
        oneof = "wire_response::Body",
        tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19"
    )]
    pub body: Option<wire_response::Body>,
}

/// Response bodies.
pub mod wire_response {
    /// One payload shape per variant.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "10")]
        Entity(super::Entity),
        #[prost(message, tag = "11")]
        Group(super::Group),
        #[prost(message, tag = "12")]
        EntityList(super::EntityList),
        #[prost(message, tag = "13")]
        GroupList(super::GroupList),
        #[prost(message, tag = "14")]
        NameList(super::NameList),
        #[prost(message, tag = "15")]
        Token(super::TokenReply),
        #[prost(message, tag = "16")]
        Claims(super::ClaimsReply),
        #[prost(message, tag = "17")]
        KeyList(super::KeyList),
        #[prost(message, tag = "18")]
        PairList(super::PairList),
        #[prost(message, tag = "19")]
        SystemStatus(super::SystemStatusReply),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityList {
    #[prost(message, repeated, tag = "1")]
    pub entities: Vec<Entity>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupList {
    #[prost(message, repeated, tag = "1")]
    pub groups: Vec<Group>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NameList {
    #[prost(string, repeated, tag = "1")]
    pub names: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TokenReply {
    #[prost(string, tag = "1")]
    pub token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClaimsReply {
    #[prost(string, tag = "1")]
    pub entity_id: String,
    #[prost(string, repeated, tag = "2")]
    pub capabilities: Vec<String>,
    #[prost(int64, tag = "3")]
    pub issued_at: i64,
    #[prost(int64, tag = "4")]
    pub not_before: i64,
    #[prost(int64, tag = "5")]
    pub expires: i64,
    #[prost(string, tag = "6")]
    pub issuer: String,
    #[prost(string, tag = "7")]
    pub subject: String,
    #[prost(string, tag = "8")]
    pub audience: String,
    #[prost(string, tag = "9")]
    pub token_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyList {
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<PubKey>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PairList {
    #[prost(message, repeated, tag = "1")]
    pub pairs: Vec<KvPair>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubsystemReply {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub ok: bool,
    #[prost(string, tag = "3")]
    pub status: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemStatusReply {
    #[prost(bool, tag = "1")]
    pub healthy: bool,
    #[prost(string, tag = "2")]
    pub first_failure: String,
    #[prost(message, repeated, tag = "3")]
    pub subsystems: Vec<SubsystemReply>,
}
