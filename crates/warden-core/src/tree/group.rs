//! Group operations.

use super::hooks::{GroupRequest, RuleAction, RuleOp};
use super::Tree;
use crate::context::OpContext;
use crate::errors::Result;
use crate::proto::{Capability, Entity, Group};

impl Tree {
    /// Creates a group. `number == -1` auto-allocates; number 0 is
    /// reserved. The managed-by pointer may name a group that does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// `DuplicateGroup`, `DuplicateNumber`, `MalformedRequest`, or a
    /// storage failure.
    pub fn create_group(
        &self,
        ctx: &OpContext,
        name: &str,
        display_name: &str,
        managed_by: &str,
        number: i32,
    ) -> Result<()> {
        let _serial = self.alloc_guard();
        let request = GroupRequest {
            data: Group {
                name: name.to_string(),
                number,
                display_name: display_name.to_string(),
                managed_by: managed_by.to_string(),
                ..Group::default()
            },
            rule_action: None,
        };
        self.run_group_chain(ctx, "create-group", &request)?;
        Ok(())
    }

    /// Fetches a group record.
    ///
    /// # Errors
    ///
    /// `UnknownGroup` when absent.
    pub fn fetch_group(&self, ctx: &OpContext, name: &str) -> Result<Group> {
        self.load_group_raw(ctx, name)
    }

    /// Destroys a group: removes the record, purges the resolver, and
    /// scrubs the group from every entity's direct-membership list.
    ///
    /// # Errors
    ///
    /// `UnknownGroup` when absent.
    pub fn destroy_group(&self, ctx: &OpContext, name: &str) -> Result<()> {
        let request = request_for(name);
        self.run_group_chain(ctx, "destroy-group", &request)?;
        Ok(())
    }

    /// Merges mutable group metadata (display name, managed-by).
    ///
    /// # Errors
    ///
    /// `UnknownGroup` when absent.
    pub fn update_group_meta(&self, ctx: &OpContext, name: &str, delta: Group) -> Result<()> {
        let request = GroupRequest {
            data: Group {
                name: name.to_string(),
                ..delta
            },
            rule_action: None,
        };
        self.run_group_chain(ctx, "update-group-meta", &request)?;
        Ok(())
    }

    /// Applies an expansion-rule edit and pushes the result to the
    /// resolver.
    ///
    /// # Errors
    ///
    /// `UnknownGroup` for a missing group or add target, `RuleCycle`
    /// when the add would loop, `ExistingExpansion` when the opposite
    /// rule kind already carries the target.
    pub fn modify_group_rule(
        &self,
        ctx: &OpContext,
        group: &str,
        target: &str,
        op: RuleOp,
    ) -> Result<()> {
        let request = GroupRequest {
            data: Group {
                name: group.to_string(),
                ..Group::default()
            },
            rule_action: Some(RuleAction {
                target: target.to_string(),
                op,
            }),
        };
        self.run_group_chain(ctx, "modify-group-rule", &request)?;
        Ok(())
    }

    /// Grants a capability tag on the group; set semantics.
    ///
    /// # Errors
    ///
    /// `UnknownGroup`, `UnknownCapability`.
    pub fn set_group_capability(&self, ctx: &OpContext, name: &str, tag: &str) -> Result<()> {
        let capability = Capability::parse(tag)?;
        let request = capability_request(name, capability);
        self.run_group_chain(ctx, "set-group-capability", &request)?;
        Ok(())
    }

    /// Drops a capability tag from the group; idempotent.
    ///
    /// # Errors
    ///
    /// `UnknownGroup`, `UnknownCapability`.
    pub fn drop_group_capability(&self, ctx: &OpContext, name: &str, tag: &str) -> Result<()> {
        let capability = Capability::parse(tag)?;
        let request = capability_request(name, capability);
        self.run_group_chain(ctx, "drop-group-capability", &request)?;
        Ok(())
    }

    /// Redacted records for every resolver-computed member of `group`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; members that vanished mid-read are
    /// skipped.
    pub fn group_members(&self, ctx: &OpContext, group: &str) -> Result<Vec<Entity>> {
        let mut members = Vec::new();
        for id in self.group_member_ids(group) {
            match self.fetch_entity(ctx, &id) {
                Ok(entity) => members.push(entity),
                Err(crate::errors::Error::UnknownEntity) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(members)
    }
}

fn request_for(name: &str) -> GroupRequest {
    GroupRequest {
        data: Group {
            name: name.to_string(),
            ..Group::default()
        },
        rule_action: None,
    }
}

fn capability_request(name: &str, capability: Capability) -> GroupRequest {
    GroupRequest {
        data: Group {
            name: name.to_string(),
            capabilities: vec![capability as i32],
            ..Group::default()
        },
        rule_action: None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::memory_tree;
    use super::*;
    use crate::errors::Error;

    #[test]
    fn create_fetch_destroy_roundtrip() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "Operations", "root-admins", -1)
            .unwrap();

        let group = tree.fetch_group(&ctx, "ops").unwrap();
        assert_eq!(group.display_name, "Operations");
        assert_eq!(group.managed_by, "root-admins");
        assert!(group.number > 0);

        tree.destroy_group(&ctx, "ops").unwrap();
        assert_eq!(tree.fetch_group(&ctx, "ops"), Err(Error::UnknownGroup));
    }

    #[test]
    fn duplicate_names_and_numbers_rejected() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "", "", 7).unwrap();

        assert_eq!(
            tree.create_group(&ctx, "ops", "", "", -1),
            Err(Error::DuplicateGroup)
        );
        assert_eq!(
            tree.create_group(&ctx, "dev", "", "", 7),
            Err(Error::DuplicateNumber)
        );
        assert_eq!(
            tree.create_group(&ctx, "dev", "", "", 0),
            Err(Error::DuplicateNumber)
        );
    }

    #[test]
    fn dangling_managed_by_is_tolerated() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "", "nonexistent-admins", -1)
            .unwrap();
        assert_eq!(
            tree.fetch_group(&ctx, "ops").unwrap().managed_by,
            "nonexistent-admins"
        );
    }

    #[test]
    fn group_expansion_scenario() {
        // g1 plain, g2 includes g1, g3 includes g2; e1 direct in g1.
        let tree = memory_tree();
        let ctx = OpContext::background();
        for group in ["g1", "g2", "g3"] {
            tree.create_group(&ctx, group, "", "", -1).unwrap();
        }
        tree.modify_group_rule(&ctx, "g2", "g1", RuleOp::Include).unwrap();
        tree.modify_group_rule(&ctx, "g3", "g2", RuleOp::Include).unwrap();
        tree.create_entity(&ctx, "e1", -1, "x").unwrap();
        tree.add_entity_to_group(&ctx, "e1", "g1").unwrap();

        assert_eq!(tree.entity_group_names("e1"), vec!["g1", "g2", "g3"]);

        // Flip g2 to also exclude g3.
        tree.modify_group_rule(&ctx, "g2", "g3", RuleOp::Exclude).unwrap();
        assert_eq!(tree.entity_group_names("e1"), vec!["g1"]);
        assert!(tree.group_member_ids("g2").is_empty());
    }

    #[test]
    fn rule_cycle_is_refused_and_lists_untouched() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "g1", "", "", -1).unwrap();
        tree.create_group(&ctx, "g2", "", "", -1).unwrap();
        tree.modify_group_rule(&ctx, "g2", "g1", RuleOp::Include).unwrap();

        assert_eq!(
            tree.modify_group_rule(&ctx, "g1", "g2", RuleOp::Include),
            Err(Error::RuleCycle)
        );
        assert_eq!(
            tree.modify_group_rule(&ctx, "g1", "g1", RuleOp::Include),
            Err(Error::RuleCycle)
        );

        let g1 = tree.fetch_group(&ctx, "g1").unwrap();
        assert!(g1.rule_include.is_empty());
        assert!(g1.rule_exclude.is_empty());
    }

    #[test]
    fn rule_add_target_must_exist() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "g1", "", "", -1).unwrap();
        assert_eq!(
            tree.modify_group_rule(&ctx, "g1", "ghost", RuleOp::Include),
            Err(Error::UnknownGroup)
        );
    }

    #[test]
    fn rule_lists_never_hold_duplicates() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "g1", "", "", -1).unwrap();
        tree.create_group(&ctx, "g2", "", "", -1).unwrap();

        tree.modify_group_rule(&ctx, "g2", "g1", RuleOp::Include).unwrap();
        // Adding the same rule again is a no-op.
        tree.modify_group_rule(&ctx, "g2", "g1", RuleOp::Include).unwrap();
        assert_eq!(
            tree.fetch_group(&ctx, "g2").unwrap().rule_include,
            vec!["g1".to_string()]
        );

        // The opposite kind for the same target is refused.
        assert_eq!(
            tree.modify_group_rule(&ctx, "g2", "g1", RuleOp::Exclude),
            Err(Error::ExistingExpansion)
        );

        // Drop is idempotent.
        tree.modify_group_rule(&ctx, "g2", "g1", RuleOp::Drop).unwrap();
        tree.modify_group_rule(&ctx, "g2", "g1", RuleOp::Drop).unwrap();
        assert!(tree.fetch_group(&ctx, "g2").unwrap().rule_include.is_empty());
    }

    #[test]
    fn destroy_group_scrubs_members_and_resolver() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "", "", -1).unwrap();
        tree.create_entity(&ctx, "alice", -1, "x").unwrap();
        tree.create_entity(&ctx, "bob", -1, "x").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "ops").unwrap();
        tree.add_entity_to_group(&ctx, "bob", "ops").unwrap();

        tree.destroy_group(&ctx, "ops").unwrap();

        assert!(tree.group_member_ids("ops").is_empty());
        for entity in ["alice", "bob"] {
            assert!(tree.entity_group_names(entity).is_empty());
            assert!(tree
                .fetch_entity(&ctx, entity)
                .unwrap()
                .meta
                .unwrap()
                .groups
                .is_empty());
        }
    }

    #[test]
    fn group_capability_set_semantics() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "", "", -1).unwrap();

        tree.set_group_capability(&ctx, "ops", "CREATE_GROUP").unwrap();
        tree.set_group_capability(&ctx, "ops", "CREATE_GROUP").unwrap();
        assert_eq!(
            tree.fetch_group(&ctx, "ops").unwrap().capabilities,
            vec![Capability::CreateGroup as i32]
        );

        tree.drop_group_capability(&ctx, "ops", "CREATE_GROUP").unwrap();
        assert!(tree.fetch_group(&ctx, "ops").unwrap().capabilities.is_empty());

        assert_eq!(
            tree.set_group_capability(&ctx, "ops", "SUDO"),
            Err(Error::UnknownCapability)
        );
    }

    #[test]
    fn update_meta_merges_but_preserves_rules() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "g1", "", "", -1).unwrap();
        tree.create_group(&ctx, "ops", "Old", "", -1).unwrap();
        tree.modify_group_rule(&ctx, "ops", "g1", RuleOp::Include).unwrap();

        tree.update_group_meta(
            &ctx,
            "ops",
            Group {
                display_name: "New".to_string(),
                managed_by: "root-admins".to_string(),
                // Hostile delta trying to smuggle rules and capabilities.
                rule_include: vec!["victims".to_string()],
                capabilities: vec![Capability::GlobalRoot as i32],
                number: 999,
                ..Group::default()
            },
        )
        .unwrap();

        let group = tree.fetch_group(&ctx, "ops").unwrap();
        assert_eq!(group.display_name, "New");
        assert_eq!(group.managed_by, "root-admins");
        assert_eq!(group.rule_include, vec!["g1".to_string()]);
        assert!(group.capabilities.is_empty());
        assert_ne!(group.number, 999);
    }

    #[test]
    fn group_members_returns_redacted_records() {
        let tree = memory_tree();
        let ctx = OpContext::background();
        tree.create_group(&ctx, "ops", "", "", -1).unwrap();
        tree.create_entity(&ctx, "alice", -1, "pw").unwrap();
        tree.add_entity_to_group(&ctx, "alice", "ops").unwrap();

        let members = tree.group_members(&ctx, "ops").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "alice");
        assert!(members[0].secret.is_empty());
    }
}
