//! Versioned binary record schema for entities and groups.
//!
//! Records persist in the KV store as protocol-buffer bytes. The message
//! types are hand-maintained prost derives so the build carries no protoc
//! dependency; tags are frozen and MUST NOT be renumbered: the encoding is
//! the storage format.
//!
//! Storage backends are forbidden from interpreting these bytes; only the
//! tree encodes and decodes them.

use prost::Message;

use crate::errors::{Error, Result};

/// A principal identity in the directory.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Entity {
    /// Immutable, unique, caller-chosen identifier.
    #[prost(string, tag = "1")]
    pub id: String,

    /// Unique positive number; `-1` in a request means auto-allocate.
    #[prost(int32, tag = "2")]
    pub number: i32,

    /// Hashed secret at rest; ALWAYS blank on any copy leaving the process.
    #[prost(string, tag = "3")]
    pub secret: String,

    /// Metadata bundle.
    #[prost(message, optional, tag = "4")]
    pub meta: Option<EntityMeta>,
}

/// Entity metadata bundle.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntityMeta {
    #[prost(string, tag = "1")]
    pub display_name: String,

    #[prost(string, tag = "2")]
    pub legal_name: String,

    #[prost(string, tag = "3")]
    pub shell: String,

    #[prost(string, tag = "4")]
    pub home: String,

    #[prost(string, tag = "5")]
    pub primary_group: String,

    /// Administrative lock flag.
    #[prost(bool, tag = "6")]
    pub locked: bool,

    /// Directly assigned capability tags.
    #[prost(enumeration = "Capability", repeated, tag = "7")]
    pub capabilities: Vec<i32>,

    /// Public keys of the form (type, value).
    #[prost(message, repeated, tag = "8")]
    pub keys: Vec<PubKey>,

    /// Ordered untyped key/value pairs; keys may repeat.
    #[prost(message, repeated, tag = "9")]
    pub untyped_meta: Vec<KvPair>,

    /// Direct group memberships by name.
    #[prost(string, repeated, tag = "10")]
    pub groups: Vec<String>,
}

/// A public key attached to an entity.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct PubKey {
    #[prost(string, tag = "1")]
    pub key_type: String,

    #[prost(string, tag = "2")]
    pub value: String,
}

/// One untyped key/value pair.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct KvPair {
    #[prost(string, tag = "1")]
    pub key: String,

    #[prost(string, tag = "2")]
    pub value: String,
}

/// A collection of entities with capabilities and expansion rules.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Group {
    /// Unique name.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Unique positive number; 0 is reserved, `-1` means auto-allocate.
    #[prost(int32, tag = "2")]
    pub number: i32,

    #[prost(string, tag = "3")]
    pub display_name: String,

    /// Name of a group whose members may administer this one. May dangle.
    #[prost(string, tag = "4")]
    pub managed_by: String,

    /// Capability tags carried by the group.
    #[prost(enumeration = "Capability", repeated, tag = "5")]
    pub capabilities: Vec<i32>,

    /// Expansion rules: union of these groups' members...
    #[prost(string, repeated, tag = "6")]
    pub rule_include: Vec<String>,

    /// ...minus the members of these.
    #[prost(string, repeated, tag = "7")]
    pub rule_exclude: Vec<String>,

    /// Ordered untyped key/value pairs.
    #[prost(message, repeated, tag = "8")]
    pub untyped_meta: Vec<KvPair>,
}

/// Closed enumeration of mutation rights.
///
/// `GlobalRoot` implies every other tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Capability {
    GlobalRoot = 0,
    CreateEntity = 1,
    DestroyEntity = 2,
    ModifyEntityMeta = 3,
    ModifyEntityKeys = 4,
    ChangeEntitySecret = 5,
    LockEntity = 6,
    UnlockEntity = 7,
    CreateGroup = 8,
    DestroyGroup = 9,
    ModifyGroupMeta = 10,
    ModifyGroupMembers = 11,
}

impl Capability {
    /// Every capability, in tag order.
    pub const ALL: [Self; 12] = [
        Self::GlobalRoot,
        Self::CreateEntity,
        Self::DestroyEntity,
        Self::ModifyEntityMeta,
        Self::ModifyEntityKeys,
        Self::ChangeEntitySecret,
        Self::LockEntity,
        Self::UnlockEntity,
        Self::CreateGroup,
        Self::DestroyGroup,
        Self::ModifyGroupMeta,
        Self::ModifyGroupMembers,
    ];

    /// The canonical tag string, as it appears in tokens and requests.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::GlobalRoot => "GLOBAL_ROOT",
            Self::CreateEntity => "CREATE_ENTITY",
            Self::DestroyEntity => "DESTROY_ENTITY",
            Self::ModifyEntityMeta => "MODIFY_ENTITY_META",
            Self::ModifyEntityKeys => "MODIFY_ENTITY_KEYS",
            Self::ChangeEntitySecret => "CHANGE_ENTITY_SECRET",
            Self::LockEntity => "LOCK_ENTITY",
            Self::UnlockEntity => "UNLOCK_ENTITY",
            Self::CreateGroup => "CREATE_GROUP",
            Self::DestroyGroup => "DESTROY_GROUP",
            Self::ModifyGroupMeta => "MODIFY_GROUP_META",
            Self::ModifyGroupMembers => "MODIFY_GROUP_MEMBERS",
        }
    }

    /// Parses a canonical tag string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCapability`] for anything outside the
    /// closed enumeration.
    pub fn parse(tag: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_tag() == tag)
            .ok_or(Error::UnknownCapability)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl Entity {
    /// Returns the metadata bundle, materializing a default if absent.
    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        self.meta.get_or_insert_with(EntityMeta::default)
    }

    /// Direct group memberships, empty when no metadata is present.
    #[must_use]
    pub fn direct_groups(&self) -> &[String] {
        self.meta.as_ref().map_or(&[], |m| m.groups.as_slice())
    }

    /// A copy with the stored secret blanked, safe to leave the process.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.secret.clear();
        copy
    }

    /// Serializes the record to its versioned binary encoding.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decodes a record from its binary encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for undecodable bytes; stored records
    /// are written by this module only, so this indicates corruption.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes).map_err(|e| Error::internal(format!("entity record corrupt: {e}")))
    }
}

impl Group {
    /// Serializes the record to its versioned binary encoding.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decodes a record from its binary encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for undecodable bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes).map_err(|e| Error::internal(format!("group record corrupt: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity() -> Entity {
        Entity {
            id: "entity1".to_string(),
            number: 7,
            secret: "$2b$hash".to_string(),
            meta: Some(EntityMeta {
                display_name: "Entity One".to_string(),
                shell: "/bin/sh".to_string(),
                capabilities: vec![Capability::CreateEntity as i32],
                groups: vec!["g1".to_string()],
                ..EntityMeta::default()
            }),
        }
    }

    #[test]
    fn entity_record_roundtrip() {
        let entity = sample_entity();
        let decoded = Entity::from_bytes(&entity.to_bytes()).unwrap();
        assert_eq!(decoded, entity);
    }

    #[test]
    fn redaction_blanks_only_the_secret() {
        let entity = sample_entity();
        let redacted = entity.redacted();
        assert!(redacted.secret.is_empty());
        assert_eq!(redacted.id, entity.id);
        assert_eq!(redacted.meta, entity.meta);
    }

    #[test]
    fn capability_tag_roundtrip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::parse(cap.as_tag()).unwrap(), cap);
        }
    }

    #[test]
    fn capability_parse_rejects_unknown_tags() {
        assert_eq!(
            Capability::parse("RESET_UNIVERSE"),
            Err(Error::UnknownCapability)
        );
        assert_eq!(Capability::parse(""), Err(Error::UnknownCapability));
    }

    #[test]
    fn group_decode_rejects_garbage() {
        // A truncated varint field cannot decode.
        assert!(Group::from_bytes(&[0x0a, 0xff]).is_err());
    }
}
