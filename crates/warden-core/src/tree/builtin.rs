//! Built-in hooks.
//!
//! Every primitive the tree performs (existence preconditions,
//! duplicate rejection, number allocation, secret hashing, field merges,
//! persistence, resolver synchronization) is a hook in a chain, so
//! external hooks can interleave anywhere by priority.

use std::collections::HashSet;
use std::sync::Arc;

use secrecy::SecretString;

use super::hooks::{
    EntityHook, EntityRequest, GroupHook, GroupRequest, KeyOp, MetaOp, RuleOp,
};
use crate::context::OpContext;
use crate::crypto::Crypto;
use crate::errors::{Error, Result};
use crate::kv::{ENTITY_PREFIX, GROUP_PREFIX, KvStore, entity_key, group_key};
use crate::proto::{Entity, Group, PubKey};
use crate::resolver::MembershipResolver;

// ---------------------------------------------------------------------
// Entity hooks
// ---------------------------------------------------------------------

/// Validates the request record and seeds the in-flight entity.
pub struct InitializeEntity;

impl EntityHook for InitializeEntity {
    fn name(&self) -> &str {
        "initialize-entity"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let data = &request.data;
        if data.id.is_empty() || data.id.contains('/') {
            return Err(Error::MalformedRequest);
        }
        if data.number != -1 && data.number <= 0 {
            return Err(Error::MalformedRequest);
        }
        entity.id = data.id.clone();
        entity.number = data.number;
        entity.meta_mut();
        Ok(())
    }
}

/// Rejects creation over an existing entity.
pub struct FailOnExistingEntity {
    pub kv: Arc<dyn KvStore>,
}

impl EntityHook for FailOnExistingEntity {
    fn name(&self) -> &str {
        "fail-on-existing-entity"
    }

    fn run(&self, ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        match self.kv.get(ctx, &entity_key(&entity.id)) {
            Ok(_) => Err(Error::DuplicateEntity),
            Err(Error::NoValue) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Loads the stored record into the in-flight entity.
pub struct LoadEntity {
    pub kv: Arc<dyn KvStore>,
}

impl EntityHook for LoadEntity {
    fn name(&self) -> &str {
        "load-entity"
    }

    fn run(&self, ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let bytes = match self.kv.get(ctx, &entity_key(&request.data.id)) {
            Ok(bytes) => bytes,
            Err(Error::NoValue) => return Err(Error::UnknownEntity),
            Err(e) => return Err(e),
        };
        *entity = Entity::from_bytes(&bytes)?;
        Ok(())
    }
}

/// Auto-allocates the entity number, or checks a requested one for
/// uniqueness. Callers serialize create chains behind the tree's
/// allocation lock; the scan itself is not transactional.
pub struct NextEntityNumber {
    pub kv: Arc<dyn KvStore>,
}

impl EntityHook for NextEntityNumber {
    fn name(&self) -> &str {
        "next-entity-number"
    }

    fn run(&self, ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        let used = used_numbers(ctx, self.kv.as_ref(), ENTITY_PREFIX)?;
        if entity.number == -1 {
            entity.number = used.iter().max().copied().unwrap_or(0) + 1;
        } else if used.contains(&entity.number) {
            return Err(Error::DuplicateNumber);
        }
        Ok(())
    }
}

/// Hashes the request secret into the in-flight record.
pub struct SecureSecret {
    pub crypto: Arc<dyn Crypto>,
}

impl EntityHook for SecureSecret {
    fn name(&self) -> &str {
        "secure-secret"
    }

    fn run(&self, ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let plain = SecretString::from(request.data.secret.clone());
        entity.secret = self.crypto.secure_secret(ctx, &plain)?;
        Ok(())
    }
}

/// Merges mutable metadata fields; identifiers, numbers, groups,
/// capabilities, keys, and untyped metadata have dedicated operations
/// and are never touched here. Empty request fields leave the stored
/// value alone.
pub struct MergeEntityMeta;

impl EntityHook for MergeEntityMeta {
    fn name(&self) -> &str {
        "merge-entity-meta"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let Some(delta) = request.data.meta.as_ref() else {
            return Ok(());
        };
        let meta = entity.meta_mut();
        if !delta.display_name.is_empty() {
            meta.display_name = delta.display_name.clone();
        }
        if !delta.legal_name.is_empty() {
            meta.legal_name = delta.legal_name.clone();
        }
        if !delta.shell.is_empty() {
            meta.shell = delta.shell.clone();
        }
        if !delta.home.is_empty() {
            meta.home = delta.home.clone();
        }
        if !delta.primary_group.is_empty() {
            meta.primary_group = delta.primary_group.clone();
        }
        Ok(())
    }
}

/// Sets the administrative lock flag.
pub struct SetLockFlag;

impl EntityHook for SetLockFlag {
    fn name(&self) -> &str {
        "lock-entity-flag"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        entity.meta_mut().locked = true;
        Ok(())
    }
}

/// Clears the administrative lock flag.
pub struct ClearLockFlag;

impl EntityHook for ClearLockFlag {
    fn name(&self) -> &str {
        "unlock-entity-flag"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        entity.meta_mut().locked = false;
        Ok(())
    }
}

/// Applies an ADD/DEL/DROPALL key mutation.
pub struct ApplyKeyChange;

impl EntityHook for ApplyKeyChange {
    fn name(&self) -> &str {
        "apply-key-change"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let action = request.key_action.as_ref().ok_or(Error::MalformedRequest)?;
        let keys = &mut entity.meta_mut().keys;
        match action.op {
            KeyOp::List => {}
            KeyOp::Add => {
                if action.key_type.is_empty() || action.value.is_empty() {
                    return Err(Error::MalformedRequest);
                }
                let candidate = PubKey {
                    key_type: action.key_type.clone(),
                    value: action.value.clone(),
                };
                if !keys.contains(&candidate) {
                    keys.push(candidate);
                }
            }
            KeyOp::Del => {
                keys.retain(|k| !(k.key_type == action.key_type && k.value == action.value));
            }
            KeyOp::DropAll => keys.clear(),
        }
        Ok(())
    }
}

/// Applies an UPSERT/CLEARFUZZY/CLEAREXACT untyped-metadata mutation.
/// UPSERT replaces the first pair with a matching key, else appends;
/// CLEARFUZZY drops pairs whose key starts with the given prefix;
/// CLEAREXACT drops exact key matches only.
pub struct ApplyUntypedMeta;

impl EntityHook for ApplyUntypedMeta {
    fn name(&self) -> &str {
        "apply-untyped-meta"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let action = request.meta_action.as_ref().ok_or(Error::MalformedRequest)?;
        if action.key.is_empty() {
            return Err(Error::MalformedRequest);
        }
        let pairs = &mut entity.meta_mut().untyped_meta;
        match action.op {
            MetaOp::Read => {}
            MetaOp::Upsert => {
                match pairs.iter_mut().find(|p| p.key == action.key) {
                    Some(pair) => pair.value = action.value.clone(),
                    None => pairs.push(crate::proto::KvPair {
                        key: action.key.clone(),
                        value: action.value.clone(),
                    }),
                }
            }
            MetaOp::ClearFuzzy => pairs.retain(|p| !p.key.starts_with(&action.key)),
            MetaOp::ClearExact => pairs.retain(|p| p.key != action.key),
        }
        Ok(())
    }
}

/// Confirms every group named by the request exists.
pub struct EnsureGroupsExist {
    pub kv: Arc<dyn KvStore>,
}

impl EntityHook for EnsureGroupsExist {
    fn name(&self) -> &str {
        "must-know-group"
    }

    fn run(&self, ctx: &OpContext, _entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        for group in request.data.direct_groups() {
            match self.kv.get(ctx, &group_key(group)) {
                Ok(_) => {}
                Err(Error::NoValue) => return Err(Error::UnknownGroup),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Appends the requested groups to the direct-membership list;
/// idempotent and order preserving.
pub struct AddDirectMembership;

impl EntityHook for AddDirectMembership {
    fn name(&self) -> &str {
        "add-direct-membership"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let wanted: Vec<String> = request.data.direct_groups().to_vec();
        let groups = &mut entity.meta_mut().groups;
        for group in wanted {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        Ok(())
    }
}

/// Removes the requested groups from the direct-membership list;
/// idempotent.
pub struct DelDirectMembership;

impl EntityHook for DelDirectMembership {
    fn name(&self) -> &str {
        "del-direct-membership"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let unwanted: HashSet<&String> = request.data.direct_groups().iter().collect();
        entity
            .meta_mut()
            .groups
            .retain(|g| !unwanted.contains(g));
        Ok(())
    }
}

/// Grants the requested capabilities with set semantics.
pub struct GrantEntityCapability;

impl EntityHook for GrantEntityCapability {
    fn name(&self) -> &str {
        "grant-entity-capability"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let wanted: Vec<i32> = request
            .data
            .meta
            .as_ref()
            .map(|m| m.capabilities.clone())
            .unwrap_or_default();
        let capabilities = &mut entity.meta_mut().capabilities;
        for capability in wanted {
            if !capabilities.contains(&capability) {
                capabilities.push(capability);
            }
        }
        Ok(())
    }
}

/// Strips the requested capabilities; idempotent.
pub struct StripEntityCapability;

impl EntityHook for StripEntityCapability {
    fn name(&self) -> &str {
        "strip-entity-capability"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, request: &EntityRequest) -> Result<()> {
        let unwanted: Vec<i32> = request
            .data
            .meta
            .as_ref()
            .map(|m| m.capabilities.clone())
            .unwrap_or_default();
        entity
            .meta_mut()
            .capabilities
            .retain(|c| !unwanted.contains(c));
        Ok(())
    }
}

/// The persistence hook for entity mutations.
pub struct SaveEntity {
    pub kv: Arc<dyn KvStore>,
}

impl EntityHook for SaveEntity {
    fn name(&self) -> &str {
        "save-entity"
    }

    fn run(&self, ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        self.kv.put(ctx, &entity_key(&entity.id), &entity.to_bytes())
    }
}

/// The persistence hook for entity destruction.
pub struct DestroyEntity {
    pub kv: Arc<dyn KvStore>,
}

impl EntityHook for DestroyEntity {
    fn name(&self) -> &str {
        "destroy-entity"
    }

    fn run(&self, ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        self.kv.delete(ctx, &entity_key(&entity.id))
    }
}

/// Post-persistence: pushes the direct-membership set to the resolver.
pub struct SyncEntityResolver {
    pub resolver: Arc<MembershipResolver>,
}

impl EntityHook for SyncEntityResolver {
    fn name(&self) -> &str {
        "sync-entity-resolver"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        self.resolver
            .sync_direct_groups(&entity.id, entity.direct_groups().to_vec());
        Ok(())
    }
}

/// Post-persistence: purges a destroyed entity from the resolver.
pub struct PurgeEntityResolver {
    pub resolver: Arc<MembershipResolver>,
}

impl EntityHook for PurgeEntityResolver {
    fn name(&self) -> &str {
        "purge-entity-resolver"
    }

    fn run(&self, _ctx: &OpContext, entity: &mut Entity, _request: &EntityRequest) -> Result<()> {
        self.resolver.remove_entity(&entity.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Group hooks
// ---------------------------------------------------------------------

/// Validates the request record and seeds the in-flight group. Number 0
/// is reserved and may never be assigned.
pub struct InitializeGroup;

impl GroupHook for InitializeGroup {
    fn name(&self) -> &str {
        "initialize-group"
    }

    fn run(&self, _ctx: &OpContext, group: &mut Group, request: &GroupRequest) -> Result<()> {
        let data = &request.data;
        if data.name.is_empty() || data.name.contains('/') {
            return Err(Error::MalformedRequest);
        }
        if data.number == 0 {
            return Err(Error::DuplicateNumber);
        }
        if data.number != -1 && data.number < 0 {
            return Err(Error::MalformedRequest);
        }
        group.name = data.name.clone();
        group.number = data.number;
        group.display_name = data.display_name.clone();
        group.managed_by = data.managed_by.clone();
        Ok(())
    }
}

/// Rejects creation over an existing group.
pub struct FailOnExistingGroup {
    pub kv: Arc<dyn KvStore>,
}

impl GroupHook for FailOnExistingGroup {
    fn name(&self) -> &str {
        "fail-on-existing-group"
    }

    fn run(&self, ctx: &OpContext, group: &mut Group, _request: &GroupRequest) -> Result<()> {
        match self.kv.get(ctx, &group_key(&group.name)) {
            Ok(_) => Err(Error::DuplicateGroup),
            Err(Error::NoValue) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Loads the stored record into the in-flight group.
pub struct LoadGroup {
    pub kv: Arc<dyn KvStore>,
}

impl GroupHook for LoadGroup {
    fn name(&self) -> &str {
        "load-group"
    }

    fn run(&self, ctx: &OpContext, group: &mut Group, request: &GroupRequest) -> Result<()> {
        let bytes = match self.kv.get(ctx, &group_key(&request.data.name)) {
            Ok(bytes) => bytes,
            Err(Error::NoValue) => return Err(Error::UnknownGroup),
            Err(e) => return Err(e),
        };
        *group = Group::from_bytes(&bytes)?;
        Ok(())
    }
}

/// Auto-allocates the group number, or checks a requested one.
pub struct NextGroupNumber {
    pub kv: Arc<dyn KvStore>,
}

impl GroupHook for NextGroupNumber {
    fn name(&self) -> &str {
        "next-group-number"
    }

    fn run(&self, ctx: &OpContext, group: &mut Group, _request: &GroupRequest) -> Result<()> {
        let used = used_numbers(ctx, self.kv.as_ref(), GROUP_PREFIX)?;
        if group.number == -1 {
            group.number = used.iter().max().copied().unwrap_or(0) + 1;
        } else if used.contains(&group.number) {
            return Err(Error::DuplicateNumber);
        }
        Ok(())
    }
}

/// Merges mutable group metadata (display name and managed-by pointer).
/// Names, numbers, capabilities, rules, and untyped metadata have
/// dedicated operations. A managed-by pointer may name a group that
/// does not exist; the effect is simply no delegation.
pub struct MergeGroupMeta;

impl GroupHook for MergeGroupMeta {
    fn name(&self) -> &str {
        "merge-group-meta"
    }

    fn run(&self, _ctx: &OpContext, group: &mut Group, request: &GroupRequest) -> Result<()> {
        if !request.data.display_name.is_empty() {
            group.display_name = request.data.display_name.clone();
        }
        if !request.data.managed_by.is_empty() {
            group.managed_by = request.data.managed_by.clone();
        }
        Ok(())
    }
}

/// Applies an INCLUDE/EXCLUDE/DROP expansion-rule mutation.
///
/// - the target must exist for adds
/// - adding a rule that is already present is a no-op
/// - adding when the opposite rule kind holds the target is
///   `ExistingExpansion`
/// - an INCLUDE that would close a loop in the stored rule graph
///   (found by simulated resolution) is `RuleCycle`; an EXCLUDE may
///   reference a group that expands through this one: subtracting a
///   containing group is well defined and resolves against the
///   target's current expansion
/// - DROP removes the target from both lists and is idempotent
pub struct ApplyGroupRule {
    pub kv: Arc<dyn KvStore>,
}

impl GroupHook for ApplyGroupRule {
    fn name(&self) -> &str {
        "apply-group-rule"
    }

    fn run(&self, ctx: &OpContext, group: &mut Group, request: &GroupRequest) -> Result<()> {
        let action = request.rule_action.as_ref().ok_or(Error::MalformedRequest)?;
        let target = action.target.as_str();
        if target.is_empty() {
            return Err(Error::MalformedRequest);
        }

        match action.op {
            RuleOp::Include | RuleOp::Exclude => {
                if target == group.name {
                    return Err(Error::RuleCycle);
                }
                match self.kv.get(ctx, &group_key(target)) {
                    Ok(_) => {}
                    Err(Error::NoValue) => return Err(Error::UnknownGroup),
                    Err(e) => return Err(e),
                }

                let already_present = match action.op {
                    RuleOp::Include => group.rule_include.iter().any(|t| t == target),
                    _ => group.rule_exclude.iter().any(|t| t == target),
                };
                if already_present {
                    return Ok(());
                }
                let opposite_holds = match action.op {
                    RuleOp::Include => group.rule_exclude.iter().any(|t| t == target),
                    _ => group.rule_include.iter().any(|t| t == target),
                };
                if opposite_holds {
                    return Err(Error::ExistingExpansion);
                }
                if action.op == RuleOp::Include
                    && creates_cycle(ctx, self.kv.as_ref(), &group.name, target)?
                {
                    return Err(Error::RuleCycle);
                }

                match action.op {
                    RuleOp::Include => group.rule_include.push(target.to_string()),
                    _ => group.rule_exclude.push(target.to_string()),
                }
            }
            RuleOp::Drop => {
                group.rule_include.retain(|t| t != target);
                group.rule_exclude.retain(|t| t != target);
            }
        }
        Ok(())
    }
}

/// Grants the requested capabilities with set semantics.
pub struct GrantGroupCapability;

impl GroupHook for GrantGroupCapability {
    fn name(&self) -> &str {
        "grant-group-capability"
    }

    fn run(&self, _ctx: &OpContext, group: &mut Group, request: &GroupRequest) -> Result<()> {
        for capability in &request.data.capabilities {
            if !group.capabilities.contains(capability) {
                group.capabilities.push(*capability);
            }
        }
        Ok(())
    }
}

/// Strips the requested capabilities; idempotent.
pub struct StripGroupCapability;

impl GroupHook for StripGroupCapability {
    fn name(&self) -> &str {
        "strip-group-capability"
    }

    fn run(&self, _ctx: &OpContext, group: &mut Group, request: &GroupRequest) -> Result<()> {
        group
            .capabilities
            .retain(|c| !request.data.capabilities.contains(c));
        Ok(())
    }
}

/// The persistence hook for group mutations.
pub struct SaveGroup {
    pub kv: Arc<dyn KvStore>,
}

impl GroupHook for SaveGroup {
    fn name(&self) -> &str {
        "save-group"
    }

    fn run(&self, ctx: &OpContext, group: &mut Group, _request: &GroupRequest) -> Result<()> {
        self.kv.put(ctx, &group_key(&group.name), &group.to_bytes())
    }
}

/// The persistence hook for group destruction.
pub struct DestroyGroup {
    pub kv: Arc<dyn KvStore>,
}

impl GroupHook for DestroyGroup {
    fn name(&self) -> &str {
        "destroy-group"
    }

    fn run(&self, ctx: &OpContext, group: &mut Group, _request: &GroupRequest) -> Result<()> {
        self.kv.delete(ctx, &group_key(&group.name))
    }
}

/// Post-persistence: pushes the rule to the resolver.
pub struct SyncGroupResolver {
    pub resolver: Arc<MembershipResolver>,
}

impl GroupHook for SyncGroupResolver {
    fn name(&self) -> &str {
        "sync-group-resolver"
    }

    fn run(&self, _ctx: &OpContext, group: &mut Group, _request: &GroupRequest) -> Result<()> {
        self.resolver
            .sync_group(
                &group.name,
                group.rule_include.clone(),
                group.rule_exclude.clone(),
            )
            .map_err(|e| Error::internal(format!("resolver sync failed: {e}")))
    }
}

/// Post-persistence: purges a destroyed group from the resolver.
pub struct PurgeGroupResolver {
    pub resolver: Arc<MembershipResolver>,
}

impl GroupHook for PurgeGroupResolver {
    fn name(&self) -> &str {
        "purge-group-resolver"
    }

    fn run(&self, _ctx: &OpContext, group: &mut Group, _request: &GroupRequest) -> Result<()> {
        self.resolver.remove_group(&group.name);
        Ok(())
    }
}

/// Post-persistence: removes a destroyed group from every entity's
/// direct-membership list and resyncs those entities.
pub struct ScrubGroupMembers {
    pub kv: Arc<dyn KvStore>,
    pub resolver: Arc<MembershipResolver>,
}

impl GroupHook for ScrubGroupMembers {
    fn name(&self) -> &str {
        "scrub-group-members"
    }

    fn run(&self, ctx: &OpContext, group: &mut Group, _request: &GroupRequest) -> Result<()> {
        let keys = self.kv.keys(ctx, &format!("{ENTITY_PREFIX}*"))?;
        for key in keys {
            let bytes = match self.kv.get(ctx, &key) {
                Ok(bytes) => bytes,
                Err(Error::NoValue) => continue,
                Err(e) => return Err(e),
            };
            let mut entity = Entity::from_bytes(&bytes)?;
            let groups = &mut entity.meta_mut().groups;
            let before = groups.len();
            groups.retain(|g| g != &group.name);
            if groups.len() == before {
                continue;
            }
            self.kv.put(ctx, &key, &entity.to_bytes())?;
            self.resolver
                .sync_direct_groups(&entity.id, entity.direct_groups().to_vec());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------

/// Numbers currently assigned under a record prefix.
fn used_numbers(ctx: &OpContext, kv: &dyn KvStore, prefix: &str) -> Result<Vec<i32>> {
    let keys = kv.keys(ctx, &format!("{prefix}*"))?;
    let mut numbers = Vec::with_capacity(keys.len());
    for key in keys {
        let bytes = match kv.get(ctx, &key) {
            Ok(bytes) => bytes,
            Err(Error::NoValue) => continue,
            Err(e) => return Err(e),
        };
        let number = if prefix == ENTITY_PREFIX {
            Entity::from_bytes(&bytes)?.number
        } else {
            Group::from_bytes(&bytes)?.number
        };
        numbers.push(number);
    }
    Ok(numbers)
}

/// Simulated resolution over the stored rule graph: does an edge
/// `origin -> target` close a loop? Dangling references are skipped,
/// matching the resolver's tolerance for unknown groups.
fn creates_cycle(
    ctx: &OpContext,
    kv: &dyn KvStore,
    origin: &str,
    target: &str,
) -> Result<bool> {
    let mut stack = vec![target.to_string()];
    let mut visited: HashSet<String> = HashSet::new();
    while let Some(next) = stack.pop() {
        if next == origin {
            return Ok(true);
        }
        if !visited.insert(next.clone()) {
            continue;
        }
        let bytes = match kv.get(ctx, &group_key(&next)) {
            Ok(bytes) => bytes,
            Err(Error::NoValue) => continue,
            Err(e) => return Err(e),
        };
        let group = Group::from_bytes(&bytes)?;
        stack.extend(group.rule_include);
        stack.extend(group.rule_exclude);
    }
    Ok(false)
}
