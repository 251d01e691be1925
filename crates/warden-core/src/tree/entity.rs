//! Entity operations.

use secrecy::SecretString;

use super::hooks::{
    EntityRequest, KeyAction, KeyOp, MetaOp, UntypedMetaAction,
};
use super::Tree;
use crate::context::OpContext;
use crate::errors::{Error, Result};
use crate::proto::{Capability, Entity, EntityMeta, KvPair, PubKey};

impl Tree {
    /// Creates an entity. `number == -1` auto-allocates the next free
    /// number; the secret is hashed before anything persists.
    ///
    /// # Errors
    ///
    /// `DuplicateEntity`, `DuplicateNumber`, `MalformedRequest`, or a
    /// storage failure.
    pub fn create_entity(&self, ctx: &OpContext, id: &str, number: i32, secret: &str) -> Result<()> {
        let _serial = self.alloc_guard();
        let request = EntityRequest {
            data: Entity {
                id: id.to_string(),
                number,
                secret: secret.to_string(),
                meta: None,
            },
            ..EntityRequest::default()
        };
        self.run_entity_chain(ctx, "create-entity", &request)?;
        Ok(())
    }

    /// Fetches a redacted copy of an entity.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` when absent.
    pub fn fetch_entity(&self, ctx: &OpContext, id: &str) -> Result<Entity> {
        Ok(self.load_entity_raw(ctx, id)?.redacted())
    }

    /// Destroys an entity and purges it from the resolver.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` when absent.
    pub fn destroy_entity(&self, ctx: &OpContext, id: &str) -> Result<()> {
        let request = request_for(id);
        self.run_entity_chain(ctx, "destroy-entity", &request)?;
        Ok(())
    }

    /// Sets the administrative lock flag.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` when absent.
    pub fn lock_entity(&self, ctx: &OpContext, id: &str) -> Result<()> {
        let request = request_for(id);
        self.run_entity_chain(ctx, "lock-entity", &request)?;
        Ok(())
    }

    /// Clears the administrative lock flag.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` when absent.
    pub fn unlock_entity(&self, ctx: &OpContext, id: &str) -> Result<()> {
        let request = request_for(id);
        self.run_entity_chain(ctx, "unlock-entity", &request)?;
        Ok(())
    }

    /// Replaces the stored secret hash.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` when absent.
    pub fn set_entity_secret(&self, ctx: &OpContext, id: &str, secret: &str) -> Result<()> {
        let request = EntityRequest {
            data: Entity {
                id: id.to_string(),
                number: 0,
                secret: secret.to_string(),
                meta: None,
            },
            ..EntityRequest::default()
        };
        self.run_entity_chain(ctx, "set-entity-secret", &request)?;
        Ok(())
    }

    /// Verifies a candidate secret. Locked entities never authenticate.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `EntityLocked`, or `AuthorizationFailure`.
    pub fn validate_entity_secret(&self, ctx: &OpContext, id: &str, secret: &str) -> Result<()> {
        let entity = self.load_entity_raw(ctx, id)?;
        if entity.meta.as_ref().is_some_and(|m| m.locked) {
            return Err(Error::EntityLocked);
        }
        self.crypto().verify_secret(
            ctx,
            &SecretString::from(secret.to_string()),
            &entity.secret,
        )
    }

    /// Merges mutable metadata fields. Identifier, number, groups,
    /// capabilities, keys, and untyped metadata are untouchable here.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` when absent.
    pub fn update_entity_meta(&self, ctx: &OpContext, id: &str, meta: EntityMeta) -> Result<()> {
        let request = EntityRequest {
            data: Entity {
                id: id.to_string(),
                number: 0,
                secret: String::new(),
                meta: Some(meta),
            },
            ..EntityRequest::default()
        };
        self.run_entity_chain(ctx, "update-entity-meta", &request)?;
        Ok(())
    }

    /// Lists or mutates the entity's public keys, returning the
    /// resulting key set.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `MalformedRequest` for an ADD without type or
    /// value.
    pub fn update_entity_keys(
        &self,
        ctx: &OpContext,
        id: &str,
        op: KeyOp,
        key_type: &str,
        value: &str,
    ) -> Result<Vec<PubKey>> {
        if op == KeyOp::List {
            let entity = self.load_entity_raw(ctx, id)?;
            return Ok(entity.meta.map(|m| m.keys).unwrap_or_default());
        }
        let request = EntityRequest {
            data: Entity {
                id: id.to_string(),
                ..Entity::default()
            },
            key_action: Some(KeyAction {
                op,
                key_type: key_type.to_string(),
                value: value.to_string(),
            }),
            ..EntityRequest::default()
        };
        let entity = self.run_entity_chain(ctx, "update-entity-keys", &request)?;
        Ok(entity.meta.map(|m| m.keys).unwrap_or_default())
    }

    /// Reads or mutates the ordered untyped key/value list, returning
    /// the pairs relevant to the action: matches for READ, the full
    /// resulting list otherwise.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `MalformedRequest` for an empty key on a
    /// mutating action.
    pub fn manage_untyped_meta(
        &self,
        ctx: &OpContext,
        id: &str,
        op: MetaOp,
        key: &str,
        value: &str,
    ) -> Result<Vec<KvPair>> {
        if op == MetaOp::Read {
            let entity = self.load_entity_raw(ctx, id)?;
            let pairs = entity.meta.map(|m| m.untyped_meta).unwrap_or_default();
            if key.is_empty() {
                return Ok(pairs);
            }
            return Ok(pairs.into_iter().filter(|p| p.key == key).collect());
        }
        let request = EntityRequest {
            data: Entity {
                id: id.to_string(),
                ..Entity::default()
            },
            meta_action: Some(UntypedMetaAction {
                op,
                key: key.to_string(),
                value: value.to_string(),
            }),
            ..EntityRequest::default()
        };
        let entity = self.run_entity_chain(ctx, "manage-entity-um", &request)?;
        Ok(entity.meta.map(|m| m.untyped_meta).unwrap_or_default())
    }

    /// Adds a direct group membership; idempotent on both ends.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `UnknownGroup`.
    pub fn add_entity_to_group(&self, ctx: &OpContext, id: &str, group: &str) -> Result<()> {
        let request = membership_request(id, group);
        self.run_entity_chain(ctx, "add-entity-to-group", &request)?;
        Ok(())
    }

    /// Removes a direct group membership; idempotent.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`.
    pub fn remove_entity_from_group(&self, ctx: &OpContext, id: &str, group: &str) -> Result<()> {
        let request = membership_request(id, group);
        self.run_entity_chain(ctx, "remove-entity-from-group", &request)?;
        Ok(())
    }

    /// Grants a directly-assigned capability tag; set semantics.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `UnknownCapability`.
    pub fn set_entity_capability(&self, ctx: &OpContext, id: &str, tag: &str) -> Result<()> {
        let capability = Capability::parse(tag)?;
        let request = capability_request(id, capability);
        self.run_entity_chain(ctx, "set-entity-capability", &request)?;
        Ok(())
    }

    /// Drops a directly-assigned capability tag; idempotent.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `UnknownCapability`.
    pub fn drop_entity_capability(&self, ctx: &OpContext, id: &str, tag: &str) -> Result<()> {
        let capability = Capability::parse(tag)?;
        let request = capability_request(id, capability);
        self.run_entity_chain(ctx, "drop-entity-capability", &request)?;
        Ok(())
    }
}

fn request_for(id: &str) -> EntityRequest {
    EntityRequest {
        data: Entity {
            id: id.to_string(),
            ..Entity::default()
        },
        ..EntityRequest::default()
    }
}

fn membership_request(id: &str, group: &str) -> EntityRequest {
    let mut data = Entity {
        id: id.to_string(),
        ..Entity::default()
    };
    data.meta_mut().groups = vec![group.to_string()];
    EntityRequest {
        data,
        ..EntityRequest::default()
    }
}

fn capability_request(id: &str, capability: Capability) -> EntityRequest {
    let mut data = Entity {
        id: id.to_string(),
        ..Entity::default()
    };
    data.meta_mut().capabilities = vec![capability as i32];
    EntityRequest {
        data,
        ..EntityRequest::default()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::memory_tree;
    use super::*;

    #[test]
    fn create_then_fetch_is_redacted_and_verifiable() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "admin", -1, "s3cret").unwrap();

        let fetched = tree.fetch_entity(&ctx, "admin").unwrap();
        assert!(fetched.secret.is_empty());
        assert!(fetched.number > 0);

        tree.validate_entity_secret(&ctx, "admin", "s3cret").unwrap();
        assert_eq!(
            tree.validate_entity_secret(&ctx, "admin", "wrong"),
            Err(Error::AuthorizationFailure)
        );
    }

    #[test]
    fn duplicate_ids_and_numbers_are_rejected() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "alice", 5, "x").unwrap();

        assert_eq!(
            tree.create_entity(&ctx, "alice", -1, "x"),
            Err(Error::DuplicateEntity)
        );
        assert_eq!(
            tree.create_entity(&ctx, "bob", 5, "x"),
            Err(Error::DuplicateNumber)
        );
    }

    #[test]
    fn auto_numbers_strictly_increase() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "a", -1, "x").unwrap();
        tree.create_entity(&ctx, "b", 40, "x").unwrap();
        tree.create_entity(&ctx, "c", -1, "x").unwrap();

        let a = tree.fetch_entity(&ctx, "a").unwrap().number;
        let c = tree.fetch_entity(&ctx, "c").unwrap().number;
        assert_eq!(a, 1);
        // Auto-allocation clears every previously used number.
        assert_eq!(c, 41);
    }

    #[test]
    fn destroy_forgets_the_entity_everywhere() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "", "", -1).unwrap();
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "ops").unwrap();

        tree.destroy_entity(&ctx, "alice").unwrap();
        assert_eq!(tree.fetch_entity(&ctx, "alice"), Err(Error::UnknownEntity));
        assert!(tree.group_member_ids("ops").is_empty());
        assert!(tree.search_entities("alice").unwrap().is_empty());
    }

    #[test]
    fn locked_entities_never_authenticate() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "alice", -1, "pw").unwrap();

        tree.lock_entity(&ctx, "alice").unwrap();
        assert_eq!(
            tree.validate_entity_secret(&ctx, "alice", "pw"),
            Err(Error::EntityLocked)
        );

        tree.unlock_entity(&ctx, "alice").unwrap();
        tree.validate_entity_secret(&ctx, "alice", "pw").unwrap();
    }

    #[test]
    fn set_secret_rehashes() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "alice", -1, "old").unwrap();
        tree.set_entity_secret(&ctx, "alice", "new").unwrap();

        tree.validate_entity_secret(&ctx, "alice", "new").unwrap();
        assert_eq!(
            tree.validate_entity_secret(&ctx, "alice", "old"),
            Err(Error::AuthorizationFailure)
        );
    }

    #[test]
    fn meta_merge_never_touches_dedicated_fields() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "", "", -1).unwrap();
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "ops").unwrap();
        tree.set_entity_capability(&ctx, "alice", "LOCK_ENTITY").unwrap();

        let number = tree.fetch_entity(&ctx, "alice").unwrap().number;
        let delta = EntityMeta {
            shell: "/bin/zsh".to_string(),
            display_name: "Alice".to_string(),
            // A hostile delta trying to smuggle groups and capabilities.
            groups: vec!["victims".to_string()],
            capabilities: vec![Capability::GlobalRoot as i32],
            locked: true,
            ..EntityMeta::default()
        };
        tree.update_entity_meta(&ctx, "alice", delta).unwrap();

        let after = tree.fetch_entity(&ctx, "alice").unwrap();
        let meta = after.meta.unwrap();
        assert_eq!(after.number, number);
        assert_eq!(meta.shell, "/bin/zsh");
        assert_eq!(meta.display_name, "Alice");
        assert_eq!(meta.groups, vec!["ops".to_string()]);
        assert_eq!(meta.capabilities, vec![Capability::LockEntity as i32]);
        assert!(!meta.locked);
    }

    #[test]
    fn key_lifecycle() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();

        let keys = tree
            .update_entity_keys(&ctx, "alice", KeyOp::Add, "SSH", "ssh-ed25519 AAAA")
            .unwrap();
        assert_eq!(keys.len(), 1);

        tree.update_entity_keys(&ctx, "alice", KeyOp::Add, "PGP", "pgp-block")
            .unwrap();
        assert_eq!(
            tree.update_entity_keys(&ctx, "alice", KeyOp::List, "", "")
                .unwrap()
                .len(),
            2
        );

        let keys = tree
            .update_entity_keys(&ctx, "alice", KeyOp::Del, "SSH", "ssh-ed25519 AAAA")
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_type, "PGP");

        assert!(tree
            .update_entity_keys(&ctx, "alice", KeyOp::DropAll, "", "")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn untyped_meta_lifecycle_with_repeating_keys() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();

        tree.manage_untyped_meta(&ctx, "alice", MetaOp::Upsert, "mail.addr", "a@x")
            .unwrap();
        tree.manage_untyped_meta(&ctx, "alice", MetaOp::Upsert, "mail.quota", "10G")
            .unwrap();
        tree.manage_untyped_meta(&ctx, "alice", MetaOp::Upsert, "phone", "555")
            .unwrap();

        let read = tree
            .manage_untyped_meta(&ctx, "alice", MetaOp::Read, "mail.addr", "")
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].value, "a@x");

        // Prefix clear takes both mail.* pairs, leaves phone.
        let left = tree
            .manage_untyped_meta(&ctx, "alice", MetaOp::ClearFuzzy, "mail.", "")
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, "phone");

        let left = tree
            .manage_untyped_meta(&ctx, "alice", MetaOp::ClearExact, "phone", "")
            .unwrap();
        assert!(left.is_empty());
    }

    #[test]
    fn membership_roundtrip_preserves_order() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        for group in ["g1", "g2", "g3"] {
            tree.create_group(&ctx, group, "", "", -1).unwrap();
        }
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "g1").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "g2").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "g3").unwrap();

        let before = tree.fetch_entity(&ctx, "alice").unwrap().meta.unwrap().groups;

        tree.add_entity_to_group(&ctx, "alice", "g2").unwrap();
        tree.remove_entity_from_group(&ctx, "alice", "g2").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "g2").unwrap();
        tree.remove_entity_from_group(&ctx, "alice", "g2").unwrap();

        let after = tree.fetch_entity(&ctx, "alice").unwrap().meta.unwrap().groups;
        assert_eq!(
            after,
            before
                .into_iter()
                .filter(|g| g != "g2")
                .collect::<Vec<_>>()
        );
        // Remaining order intact.
        assert_eq!(after, vec!["g1".to_string(), "g3".to_string()]);
    }

    #[test]
    fn membership_add_requires_known_group() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();
        assert_eq!(
            tree.add_entity_to_group(&ctx, "alice", "ghost"),
            Err(Error::UnknownGroup)
        );
    }

    #[test]
    fn capability_set_semantics() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();

        tree.set_entity_capability(&ctx, "alice", "CREATE_ENTITY").unwrap();
        tree.set_entity_capability(&ctx, "alice", "CREATE_ENTITY").unwrap();

        let meta = tree.fetch_entity(&ctx, "alice").unwrap().meta.unwrap();
        assert_eq!(meta.capabilities, vec![Capability::CreateEntity as i32]);

        tree.drop_entity_capability(&ctx, "alice", "CREATE_ENTITY").unwrap();
        tree.drop_entity_capability(&ctx, "alice", "CREATE_ENTITY").unwrap();
        let meta = tree.fetch_entity(&ctx, "alice").unwrap().meta.unwrap();
        assert!(meta.capabilities.is_empty());

        assert_eq!(
            tree.set_entity_capability(&ctx, "alice", "MAKE_COFFEE"),
            Err(Error::UnknownCapability)
        );
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        assert_eq!(
            tree.create_entity(&ctx, "", -1, "x"),
            Err(Error::MalformedRequest)
        );
        assert_eq!(
            tree.create_entity(&ctx, "a/b", -1, "x"),
            Err(Error::MalformedRequest)
        );
        assert_eq!(
            tree.create_entity(&ctx, "a", 0, "x"),
            Err(Error::MalformedRequest)
        );
        assert_eq!(
            tree.create_entity(&ctx, "a", -7, "x"),
            Err(Error::MalformedRequest)
        );
    }
}
